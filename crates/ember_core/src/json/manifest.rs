//! The Mojang version manifest: the list of every published version and
//! where its version document lives.

use serde::{Deserialize, Serialize};

use crate::cache::ResponseCache;
use crate::{err, file_utils, JsonDownloadError};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Manifest {
    pub latest: ManifestLatest,
    pub versions: Vec<ManifestVersion>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ManifestLatest {
    pub release: String,
    pub snapshot: String,
}

#[allow(non_snake_case)]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ManifestVersion {
    pub id: String,
    /// `release`, `snapshot`, `old_beta` or `old_alpha`.
    pub r#type: String,
    pub url: String,
    pub releaseTime: String,
    pub sha1: Option<String>,
}

impl Manifest {
    pub const URL: &'static str =
        "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";

    pub async fn download() -> Result<Self, JsonDownloadError> {
        file_utils::download_file_to_json(Self::URL, false).await
    }

    /// Fetches through the response cache. `force_refresh` bypasses a
    /// cached copy; the fresh result still gets written back.
    pub async fn fetch_cached(
        cache: &ResponseCache,
        force_refresh: bool,
    ) -> Result<Self, JsonDownloadError> {
        if !force_refresh {
            if let Some(manifest) = cache.get::<Manifest>(Self::URL).await {
                return Ok(manifest);
            }
        }
        let manifest = Self::download().await?;
        if let Err(error) = cache.put(Self::URL, &manifest).await {
            err!("Couldn't cache version manifest: {error}");
        }
        Ok(manifest)
    }

    #[must_use]
    pub fn find_name(&self, name: &str) -> Option<&ManifestVersion> {
        self.versions.iter().find(|version| version.id == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "latest": {"release": "1.20.4", "snapshot": "24w07a"},
        "versions": [
            {"id": "24w07a", "type": "snapshot", "url": "https://meta/24w07a.json",
             "releaseTime": "2024-02-14T12:00:00+00:00", "sha1": "aa"},
            {"id": "1.20.4", "type": "release", "url": "https://meta/1.20.4.json",
             "releaseTime": "2023-12-07T12:00:00+00:00", "sha1": "bb"},
            {"id": "b1.7.3", "type": "old_beta", "url": "https://meta/b1.7.3.json",
             "releaseTime": "2011-07-08T12:00:00+00:00", "sha1": null}
        ]
    }"#;

    #[test]
    fn parses_and_finds_versions() {
        let manifest: Manifest = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(manifest.latest.release, "1.20.4");
        assert_eq!(manifest.versions.len(), 3);

        let found = manifest.find_name("1.20.4").unwrap();
        assert_eq!(found.r#type, "release");
        assert_eq!(found.url, "https://meta/1.20.4.json");
        assert!(manifest.find_name("1.99.0").is_none());
    }
}
