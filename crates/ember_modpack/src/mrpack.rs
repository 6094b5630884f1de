//! Parsing `.mrpack` archives.
//!
//! A `.mrpack` is a zip holding `modrinth.index.json` at its root plus
//! optional `overrides/` and `client-overrides/` subtrees. The index
//! enumerates the pack's files by hash and download URL; the overrides
//! are copied verbatim into the instance.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use ember_core::{IntoIoError, IntoJsonError, Loader};
use ember_instances::Modloader;

use crate::ModpackError;

pub const INDEX_FILE_NAME: &str = "modrinth.index.json";
const SUPPORTED_FORMAT_VERSION: u32 = 1;

#[allow(non_snake_case)]
#[derive(Deserialize, Debug, Clone)]
pub struct MrpackIndex {
    pub formatVersion: u32,
    pub name: String,
    pub versionId: String,
    #[serde(default)]
    pub summary: Option<String>,
    /// `minecraft` plus at most one loader key
    /// (`fabric-loader`, `quilt-loader`, `forge`, `neoforge`).
    pub dependencies: BTreeMap<String, String>,
    pub files: Vec<MrpackFile>,
}

#[allow(non_snake_case)]
#[derive(Deserialize, Debug, Clone)]
pub struct MrpackFile {
    /// Destination path relative to the instance directory.
    pub path: String,
    pub hashes: MrpackHashes,
    /// Mirror URLs, tried in order.
    pub downloads: Vec<String>,
    pub fileSize: u64,
    #[serde(default)]
    pub env: Option<MrpackEnv>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MrpackHashes {
    pub sha1: String,
    #[serde(default)]
    pub sha512: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MrpackEnv {
    pub client: MrpackEnvSupport,
    pub server: MrpackEnvSupport,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MrpackEnvSupport {
    Required,
    Optional,
    Unsupported,
}

impl MrpackFile {
    /// Whether this file belongs in a client install. Files without an
    /// `env` block are required; optional files install unless the user
    /// opted out.
    #[must_use]
    pub fn client_included(&self, include_optional: bool) -> bool {
        match self.env.as_ref().map(|env| env.client) {
            None | Some(MrpackEnvSupport::Required) => true,
            Some(MrpackEnvSupport::Optional) => include_optional,
            Some(MrpackEnvSupport::Unsupported) => false,
        }
    }
}

impl MrpackIndex {
    pub fn minecraft_version(&self) -> Result<&str, ModpackError> {
        self.dependencies
            .get("minecraft")
            .map(String::as_str)
            .ok_or_else(|| ModpackError::MissingDependency("minecraft".to_owned()))
    }

    /// The declared loader. A dependency key that is neither `minecraft`
    /// nor a known loader is rejected rather than silently skipped.
    pub fn loader(&self) -> Result<Modloader, ModpackError> {
        let mut found = Modloader::vanilla();
        for (key, version) in &self.dependencies {
            if key == "minecraft" {
                continue;
            }
            match Loader::from_dependency_key(key) {
                Some(kind) => {
                    found = Modloader {
                        kind,
                        version: Some(version.clone()),
                    };
                }
                None => return Err(ModpackError::UnsupportedLoader(key.clone())),
            }
        }
        Ok(found)
    }
}

/// A relative path from pack data, checked against traversal. Absolute
/// paths and `..` components are how a malicious pack escapes the
/// instance directory.
pub fn sanitize_rel_path(raw: &str) -> Result<PathBuf, ModpackError> {
    let path = Path::new(raw);
    if path.is_absolute() {
        return Err(ModpackError::UnsafePath(raw.to_owned()));
    }
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(ModpackError::UnsafePath(raw.to_owned())),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(ModpackError::UnsafePath(raw.to_owned()));
    }
    Ok(clean)
}

/// Reads and validates `modrinth.index.json` out of the archive.
pub async fn read_index(archive: &Path) -> Result<MrpackIndex, ModpackError> {
    let archive = archive.to_path_buf();
    let result = tokio::task::spawn_blocking(move || -> Result<MrpackIndex, ModpackError> {
        let file = std::fs::File::open(&archive).path(&archive)?;
        let mut zip = zip::ZipArchive::new(file)?;
        let mut entry = zip.by_name(INDEX_FILE_NAME).map_err(|_| {
            ModpackError::MalformedArchive(format!("no {INDEX_FILE_NAME} at archive root"))
        })?;
        let mut text = String::new();
        entry.read_to_string(&mut text).path(&archive)?;
        let index: MrpackIndex = serde_json::from_str(&text).json(text)?;
        if index.formatVersion != SUPPORTED_FORMAT_VERSION {
            return Err(ModpackError::MalformedArchive(format!(
                "unsupported format version {}",
                index.formatVersion
            )));
        }
        Ok(index)
    })
    .await;
    match result {
        Ok(result) => result,
        Err(err) => Err(ModpackError::MalformedArchive(err.to_string())),
    }
}

/// Copies one override subtree (`overrides/` or `client-overrides/`) of
/// the archive into `dest`, overwriting anything already there: files
/// from the pack take precedence. Returns how many files were written.
pub async fn extract_overrides(
    archive: &Path,
    dest: &Path,
    subtree: &str,
) -> Result<usize, ModpackError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    let prefix = format!("{subtree}/");

    let result = tokio::task::spawn_blocking(move || -> Result<usize, ModpackError> {
        let file = std::fs::File::open(&archive).path(&archive)?;
        let mut zip = zip::ZipArchive::new(file)?;
        let mut written = 0;

        for index in 0..zip.len() {
            let mut entry = zip.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let Some(rel) = entry.name().strip_prefix(prefix.as_str()) else {
                continue;
            };
            let rel = sanitize_rel_path(&rel.to_owned())?;
            let target = dest.join(rel);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).path(parent)?;
            }
            let mut out = std::fs::File::create(&target).path(&target)?;
            std::io::copy(&mut entry, &mut out).path(&target)?;
            written += 1;
        }
        Ok(written)
    })
    .await;
    match result {
        Ok(result) => result,
        Err(err) => Err(ModpackError::MalformedArchive(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    const SAMPLE_INDEX: &str = r#"{
        "formatVersion": 1,
        "game": "minecraft",
        "versionId": "1.0.0",
        "name": "Test Pack",
        "summary": "A pack for tests",
        "dependencies": {"minecraft": "1.21.1", "fabric-loader": "0.16.5"},
        "files": [
            {
                "path": "mods/sodium.jar",
                "hashes": {"sha1": "aaaa", "sha512": "bbbb"},
                "downloads": ["https://cdn.modrinth.com/sodium.jar"],
                "fileSize": 1234,
                "env": {"client": "required", "server": "unsupported"}
            },
            {
                "path": "mods/server-only.jar",
                "hashes": {"sha1": "cccc"},
                "downloads": ["https://cdn.modrinth.com/server-only.jar"],
                "fileSize": 99,
                "env": {"client": "unsupported", "server": "required"}
            },
            {
                "path": "resourcepacks/extras.zip",
                "hashes": {"sha1": "dddd"},
                "downloads": ["https://cdn.modrinth.com/extras.zip"],
                "fileSize": 55,
                "env": {"client": "optional", "server": "optional"}
            }
        ]
    }"#;

    fn write_test_mrpack(path: &Path) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        zip.start_file(INDEX_FILE_NAME, options).unwrap();
        zip.write_all(SAMPLE_INDEX.as_bytes()).unwrap();
        zip.start_file("overrides/config/sodium.toml", options).unwrap();
        zip.write_all(b"render_distance = 12").unwrap();
        zip.start_file("client-overrides/options.txt", options).unwrap();
        zip.write_all(b"fov:90").unwrap();
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn parses_index_and_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("test.mrpack");
        write_test_mrpack(&pack);

        let index = read_index(&pack).await.unwrap();
        assert_eq!(index.name, "Test Pack");
        assert_eq!(index.versionId, "1.0.0");
        assert_eq!(index.minecraft_version().unwrap(), "1.21.1");

        let loader = index.loader().unwrap();
        assert_eq!(loader.kind, Loader::Fabric);
        assert_eq!(loader.version.as_deref(), Some("0.16.5"));
        assert_eq!(index.files.len(), 3);
    }

    #[tokio::test]
    async fn env_filtering_follows_client_support() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("test.mrpack");
        write_test_mrpack(&pack);
        let index = read_index(&pack).await.unwrap();

        let included: Vec<&str> = index
            .files
            .iter()
            .filter(|file| file.client_included(true))
            .map(|file| file.path.as_str())
            .collect();
        assert_eq!(included, vec!["mods/sodium.jar", "resourcepacks/extras.zip"]);

        // Opting out of optional files drops the resource pack.
        let required_only: Vec<&str> = index
            .files
            .iter()
            .filter(|file| file.client_included(false))
            .map(|file| file.path.as_str())
            .collect();
        assert_eq!(required_only, vec!["mods/sodium.jar"]);
    }

    #[tokio::test]
    async fn extracts_override_trees() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("test.mrpack");
        write_test_mrpack(&pack);

        let dest = dir.path().join("instance");
        let count = extract_overrides(&pack, &dest, "overrides").await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            std::fs::read_to_string(dest.join("config/sodium.toml")).unwrap(),
            "render_distance = 12"
        );

        let count = extract_overrides(&pack, &dest, "client-overrides")
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            std::fs::read_to_string(dest.join("options.txt")).unwrap(),
            "fov:90"
        );
    }

    #[tokio::test]
    async fn missing_index_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("empty.mrpack");
        let file = std::fs::File::create(&pack).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("whatever.txt", SimpleFileOptions::default())
            .unwrap();
        zip.finish().unwrap();

        let err = read_index(&pack).await.unwrap_err();
        assert!(matches!(err, ModpackError::MalformedArchive(_)));
    }

    #[test]
    fn unknown_loader_key_is_rejected() {
        let index: MrpackIndex = serde_json::from_str(
            r#"{
                "formatVersion": 1, "name": "x", "versionId": "1",
                "dependencies": {"minecraft": "1.20.1", "liteloader": "1.0"},
                "files": []
            }"#,
        )
        .unwrap();
        assert!(matches!(
            index.loader(),
            Err(ModpackError::UnsupportedLoader(key)) if key == "liteloader"
        ));
    }

    #[test]
    fn path_sanitizing_blocks_traversal() {
        assert!(sanitize_rel_path("mods/a.jar").is_ok());
        assert!(sanitize_rel_path("./config/x.toml").is_ok());
        assert!(sanitize_rel_path("../escape.jar").is_err());
        assert!(sanitize_rel_path("mods/../../escape.jar").is_err());
        assert!(sanitize_rel_path("/etc/passwd").is_err());
        assert!(sanitize_rel_path("").is_err());
    }
}
