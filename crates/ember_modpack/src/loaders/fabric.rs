//! Fabric and Quilt. The two share a meta API shape; only the host and
//! default maven differ.

use serde::Deserialize;

use ember_core::json::version::{Library, LibraryDownloadArtifact, LibraryDownloads};
use ember_core::json::VersionDetails;
use ember_core::{file_utils, info, Loader, LAUNCHER_DIR};
use ember_instances::Modloader;

use crate::loaders::maven_artifact_path;
use crate::ModpackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Fabric,
    Quilt,
}

impl Backend {
    fn meta_url(self) -> &'static str {
        match self {
            Self::Fabric => "https://meta.fabricmc.net/v2",
            Self::Quilt => "https://meta.quiltmc.org/v3",
        }
    }

    fn default_maven(self) -> &'static str {
        match self {
            Self::Fabric => "https://maven.fabricmc.net/",
            Self::Quilt => "https://maven.quiltmc.org/repository/release/",
        }
    }

    fn loader(self) -> Loader {
        match self {
            Self::Fabric => Loader::Fabric,
            Self::Quilt => Loader::Quilt,
        }
    }
}

#[derive(Deserialize, Debug)]
struct LoaderListEntry {
    loader: LoaderVersion,
}

#[derive(Deserialize, Debug)]
struct LoaderVersion {
    version: String,
}

#[allow(non_snake_case)]
#[derive(Deserialize, Debug)]
struct LoaderProfile {
    mainClass: String,
    #[serde(default)]
    libraries: Vec<ProfileLibrary>,
}

#[derive(Deserialize, Debug)]
struct ProfileLibrary {
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    sha1: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

/// Latest loader version compatible with `minecraft_version`.
pub async fn latest_version(
    minecraft_version: &str,
    backend: Backend,
) -> Result<String, ModpackError> {
    let url = format!("{}/versions/loader/{minecraft_version}", backend.meta_url());
    let entries: Vec<LoaderListEntry> = file_utils::download_file_to_json(&url, true).await?;
    entries
        .into_iter()
        .next()
        .map(|entry| entry.loader.version)
        .ok_or_else(|| {
            ModpackError::MissingDependency(format!(
                "no {:?} loader published for {minecraft_version}",
                backend
            ))
        })
}

/// Builds the augmented version document: the vanilla document with the
/// loader's main class and its libraries prepended.
pub async fn build_augmented(
    minecraft_version: &str,
    loader_version: &str,
    backend: Backend,
) -> Result<VersionDetails, ModpackError> {
    let url = format!(
        "{}/versions/loader/{minecraft_version}/{loader_version}/profile/json",
        backend.meta_url()
    );
    info!("Fetching {:?} profile {loader_version} for {minecraft_version}", backend);
    let profile: LoaderProfile = file_utils::download_file_to_json(&url, true).await?;

    let base = VersionDetails::load(&LAUNCHER_DIR.join("versions"), minecraft_version).await?;
    let modloader = Modloader {
        kind: backend.loader(),
        version: Some(loader_version.to_owned()),
    };
    let augmented_id = modloader
        .version_doc_id(minecraft_version)
        .unwrap_or_else(|| minecraft_version.to_owned());

    let mut libraries = Vec::with_capacity(profile.libraries.len() + base.libraries.len());
    for library in &profile.libraries {
        libraries.push(to_mojang_library(library, backend)?);
    }
    // Vanilla libraries load after the loader's, which lets the loader
    // pin its own versions of shared dependencies.
    libraries.extend(base.libraries.iter().cloned());

    let mut augmented = base;
    augmented.id = augmented_id;
    augmented.mainClass = profile.mainClass;
    augmented.libraries = libraries;
    Ok(augmented)
}

fn to_mojang_library(library: &ProfileLibrary, backend: Backend) -> Result<Library, ModpackError> {
    let path = maven_artifact_path(&library.name).ok_or_else(|| {
        ModpackError::MalformedArchive(format!("bad maven name: {}", library.name))
    })?;
    let base_url = library
        .url
        .clone()
        .unwrap_or_else(|| backend.default_maven().to_owned());
    let url = format!("{}{path}", ensure_trailing_slash(&base_url));

    Ok(Library {
        name: Some(library.name.clone()),
        downloads: Some(LibraryDownloads {
            artifact: Some(LibraryDownloadArtifact {
                path: Some(path),
                sha1: library.sha1.clone(),
                size: library.size,
                url,
            }),
            classifiers: None,
        }),
        rules: None,
        natives: None,
        extract: None,
        url: None,
    })
}

fn ensure_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_owned()
    } else {
        format!("{url}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_library_converts_to_mojang_shape() {
        let library = ProfileLibrary {
            name: "net.fabricmc:fabric-loader:0.16.5".to_owned(),
            url: Some("https://maven.fabricmc.net".to_owned()),
            sha1: Some("abc".to_owned()),
            size: Some(42),
        };
        let converted = to_mojang_library(&library, Backend::Fabric).unwrap();
        let artifact = converted.downloads.unwrap().artifact.unwrap();
        assert_eq!(
            artifact.url,
            "https://maven.fabricmc.net/net/fabricmc/fabric-loader/0.16.5/fabric-loader-0.16.5.jar"
        );
        assert_eq!(
            artifact.path.as_deref(),
            Some("net/fabricmc/fabric-loader/0.16.5/fabric-loader-0.16.5.jar")
        );
        assert_eq!(artifact.sha1.as_deref(), Some("abc"));
    }

    #[test]
    fn missing_url_falls_back_to_backend_maven() {
        let library = ProfileLibrary {
            name: "org.quiltmc:quilt-loader:0.26.0".to_owned(),
            url: None,
            sha1: None,
            size: None,
        };
        let converted = to_mojang_library(&library, Backend::Quilt).unwrap();
        let artifact = converted.downloads.unwrap().artifact.unwrap();
        assert!(artifact
            .url
            .starts_with("https://maven.quiltmc.org/repository/release/"));
    }
}
