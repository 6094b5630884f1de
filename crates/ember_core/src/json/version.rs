//! The version document: everything Mojang says about one version of the
//! game. Field names stay camelCase to match the wire format.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::OS_NAME;
use crate::{file_utils, IntoIoError, IntoJsonError, JsonFileError};

#[allow(non_snake_case)]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VersionDetails {
    /// Which asset index this version reads, and where to fetch it.
    pub assetIndex: AssetIndexRef,
    /// Id of the asset index, repeated for `--assetIndex`.
    pub assets: String,
    pub downloads: Downloads,
    /// Name of the version.
    pub id: String,
    /// Version of Java required.
    pub javaVersion: Option<JavaVersionJson>,
    /// Library dependencies of the version that need to be downloaded.
    pub libraries: Vec<Library>,
    /// Which is the main class in the jar that has the main function.
    pub mainClass: String,

    /// Single-string argument list used by 1.12.2 and below.
    pub minecraftArguments: Option<String>,
    /// Structured arguments used by 1.13 and above.
    pub arguments: Option<Arguments>,

    pub releaseTime: String,
    pub time: String,
    /// Type of version, such as alpha, beta or release.
    pub r#type: String,
}

impl VersionDetails {
    /// `versions/<id>/<id>.json` below the given versions dir.
    #[must_use]
    pub fn json_path(versions_dir: &Path, id: &str) -> PathBuf {
        versions_dir.join(id).join(format!("{id}.json"))
    }

    /// `versions/<id>/<id>.jar`.
    #[must_use]
    pub fn jar_path(versions_dir: &Path, id: &str) -> PathBuf {
        versions_dir.join(id).join(format!("{id}.jar"))
    }

    pub async fn load(versions_dir: &Path, id: &str) -> Result<Self, JsonFileError> {
        let path = Self::json_path(versions_dir, id);
        let text = tokio::fs::read_to_string(&path).await.path(path)?;
        Ok(serde_json::from_str(&text).json(text)?)
    }

    pub async fn save(&self, versions_dir: &Path) -> Result<(), JsonFileError> {
        let path = Self::json_path(versions_dir, &self.id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.path(parent)?;
        }
        let text = serde_json::to_string_pretty(self).json(String::new())?;
        file_utils::atomic_write(&path, text.as_bytes()).await?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Arguments {
    pub game: Vec<Value>,
    pub jvm: Vec<Value>,
}

/// Reference to the asset index from a version document.
#[allow(non_snake_case)]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AssetIndexRef {
    pub id: String,
    pub sha1: String,
    pub size: u64,
    pub totalSize: Option<u64>,
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Downloads {
    pub client: Download,
    pub server: Option<Download>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Download {
    pub sha1: String,
    pub size: u64,
    pub url: String,
}

#[allow(non_snake_case)]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JavaVersionJson {
    pub component: Option<String>,
    pub majorVersion: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Library {
    pub name: Option<String>,
    pub downloads: Option<LibraryDownloads>,
    pub rules: Option<Vec<LibraryRule>>,
    /// Old-style natives: OS name to classifier key, e.g.
    /// `"linux" -> "natives-linux"`.
    pub natives: Option<BTreeMap<String, String>>,
    pub extract: Option<LibraryExtract>,
    pub url: Option<String>,
}

impl Library {
    /// Whether this library participates on the current OS, per its rules.
    /// No rules means allowed everywhere.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        let Some(rules) = &self.rules else {
            return true;
        };
        let mut allowed = false;
        for rule in rules {
            match &rule.os {
                None => allowed = rule.action == "allow",
                Some(os) if os.name == OS_NAME => allowed = rule.action == "allow",
                Some(_) => {}
            }
        }
        allowed
    }

    /// The old-style native variant of this library for the current OS.
    #[must_use]
    pub fn native_classifier(&self) -> Option<&LibraryClassifier> {
        let natives = self.natives.as_ref()?;
        let key = natives.get(OS_NAME)?;
        let key = key.replace(
            "${arch}",
            if cfg!(target_pointer_width = "64") {
                "64"
            } else {
                "32"
            },
        );
        self.downloads.as_ref()?.classifiers.as_ref()?.get(&key)
    }

    /// Modern manifests ship natives as separate library entries whose
    /// name carries a `natives-<os>` classifier suffix.
    #[must_use]
    pub fn is_modern_native(&self) -> bool {
        let Some(name) = &self.name else {
            return false;
        };
        let Some(classifier) = name.rsplit(':').next() else {
            return false;
        };
        match OS_NAME {
            "windows" => classifier.starts_with("natives-windows"),
            "osx" => classifier.starts_with("natives-macos") || classifier.starts_with("natives-osx"),
            _ => classifier.starts_with("natives-linux"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LibraryDownloads {
    pub artifact: Option<LibraryDownloadArtifact>,
    pub classifiers: Option<BTreeMap<String, LibraryClassifier>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LibraryDownloadArtifact {
    pub path: Option<String>,
    /// Mojang always declares these; loader metadata sometimes doesn't.
    pub sha1: Option<String>,
    pub size: Option<u64>,
    pub url: String,
}

impl LibraryDownloadArtifact {
    /// Path of the artifact below `libraries/`. Derived from the URL when
    /// the manifest omits it.
    #[must_use]
    pub fn get_path(&self) -> String {
        self.path.clone().unwrap_or_else(|| {
            let url = self
                .url
                .strip_prefix("https://")
                .or_else(|| self.url.strip_prefix("http://"))
                .unwrap_or(&self.url);
            match url.find('/') {
                Some(pos) => url[pos + 1..].to_string(),
                None => url.to_string(),
            }
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LibraryClassifier {
    pub path: Option<String>,
    pub sha1: Option<String>,
    pub size: Option<u64>,
    pub url: String,
}

impl LibraryClassifier {
    #[must_use]
    pub fn get_path(&self) -> String {
        self.path.clone().unwrap_or_else(|| {
            let url = self
                .url
                .strip_prefix("https://")
                .or_else(|| self.url.strip_prefix("http://"))
                .unwrap_or(&self.url);
            match url.find('/') {
                Some(pos) => url[pos + 1..].to_string(),
                None => url.to_string(),
            }
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LibraryRule {
    pub action: String,
    pub os: Option<LibraryRuleOS>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LibraryRuleOS {
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LibraryExtract {
    pub exclude: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(action: &str, os: Option<&str>) -> LibraryRule {
        LibraryRule {
            action: action.to_owned(),
            os: os.map(|name| LibraryRuleOS {
                name: name.to_owned(),
            }),
        }
    }

    fn library(rules: Option<Vec<LibraryRule>>) -> Library {
        Library {
            name: None,
            downloads: None,
            rules,
            natives: None,
            extract: None,
            url: None,
        }
    }

    #[test]
    fn no_rules_means_allowed() {
        assert!(library(None).is_allowed());
    }

    #[test]
    fn allow_all_then_disallow_current_os() {
        let lib = library(Some(vec![rule("allow", None), rule("disallow", Some(OS_NAME))]));
        assert!(!lib.is_allowed());
    }

    #[test]
    fn allow_only_other_os() {
        let other = if OS_NAME == "windows" { "linux" } else { "windows" };
        let lib = library(Some(vec![rule("allow", Some(other))]));
        assert!(!lib.is_allowed());
    }

    #[test]
    fn allow_only_current_os() {
        let lib = library(Some(vec![rule("allow", Some(OS_NAME))]));
        assert!(lib.is_allowed());
    }

    #[test]
    fn artifact_path_derived_from_url() {
        let artifact = LibraryDownloadArtifact {
            path: None,
            sha1: None,
            size: None,
            url: "https://libraries.minecraft.net/net/java/jinput/2.0.5/jinput-2.0.5.jar"
                .to_owned(),
        };
        assert_eq!(artifact.get_path(), "net/java/jinput/2.0.5/jinput-2.0.5.jar");

        let artifact = LibraryDownloadArtifact {
            path: Some("a/b/c.jar".to_owned()),
            sha1: None,
            size: None,
            url: "https://whatever".to_owned(),
        };
        assert_eq!(artifact.get_path(), "a/b/c.jar");
    }

    #[test]
    fn native_classifier_lookup() {
        let mut natives = BTreeMap::new();
        natives.insert(OS_NAME.to_owned(), format!("natives-{OS_NAME}"));

        let mut classifiers = BTreeMap::new();
        classifiers.insert(
            format!("natives-{OS_NAME}"),
            LibraryClassifier {
                path: Some("native.jar".to_owned()),
                sha1: Some("aa".to_owned()),
                size: Some(1),
                url: "https://example/native.jar".to_owned(),
            },
        );

        let lib = Library {
            name: Some("org.lwjgl:lwjgl-platform:2.9.4".to_owned()),
            downloads: Some(LibraryDownloads {
                artifact: None,
                classifiers: Some(classifiers),
            }),
            rules: None,
            natives: Some(natives),
            extract: None,
            url: None,
        };
        let classifier = lib.native_classifier().unwrap();
        assert_eq!(classifier.path.as_deref(), Some("native.jar"));
    }
}
