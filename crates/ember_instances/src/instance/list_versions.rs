//! Listing installable versions, categorized the way the UI's version
//! picker wants them.

use serde::Serialize;

use ember_core::cache::ResponseCache;
use ember_core::json::Manifest;
use ember_core::LAUNCHER_DIR;

use crate::download::GameDownloadError;

#[derive(Serialize, Debug, Clone)]
pub struct VersionCategories {
    pub release: Vec<String>,
    pub snapshot: Vec<String>,
    pub old_beta: Vec<String>,
    pub old_alpha: Vec<String>,
    pub latest: LatestVersions,
}

#[derive(Serialize, Debug, Clone)]
pub struct LatestVersions {
    pub release: String,
    pub snapshot: String,
}

impl VersionCategories {
    #[must_use]
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut categories = Self {
            release: Vec::new(),
            snapshot: Vec::new(),
            old_beta: Vec::new(),
            old_alpha: Vec::new(),
            latest: LatestVersions {
                release: manifest.latest.release.clone(),
                snapshot: manifest.latest.snapshot.clone(),
            },
        };
        for version in &manifest.versions {
            let bucket = match version.r#type.as_str() {
                "release" => &mut categories.release,
                "snapshot" => &mut categories.snapshot,
                "old_beta" => &mut categories.old_beta,
                "old_alpha" => &mut categories.old_alpha,
                // Anything Mojang invents later shows up with snapshots.
                _ => &mut categories.snapshot,
            };
            bucket.push(version.id.clone());
        }
        categories
    }
}

/// The full categorized version list, resolved through the response cache
/// (1 hour TTL) unless a refresh is forced.
pub async fn list_versions(force_refresh: bool) -> Result<VersionCategories, GameDownloadError> {
    let cache = ResponseCache::open(LAUNCHER_DIR.join("cache/responses")).await?;
    let manifest = Manifest::fetch_cached(&cache, force_refresh).await?;
    Ok(VersionCategories::from_manifest(&manifest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_by_type() {
        let manifest: Manifest = serde_json::from_str(
            r#"{
                "latest": {"release": "1.20.4", "snapshot": "24w07a"},
                "versions": [
                    {"id": "24w07a", "type": "snapshot", "url": "u", "releaseTime": "t", "sha1": null},
                    {"id": "1.20.4", "type": "release", "url": "u", "releaseTime": "t", "sha1": null},
                    {"id": "1.20.3", "type": "release", "url": "u", "releaseTime": "t", "sha1": null},
                    {"id": "b1.7.3", "type": "old_beta", "url": "u", "releaseTime": "t", "sha1": null},
                    {"id": "a1.2.6", "type": "old_alpha", "url": "u", "releaseTime": "t", "sha1": null}
                ]
            }"#,
        )
        .unwrap();

        let categories = VersionCategories::from_manifest(&manifest);
        assert_eq!(categories.release, vec!["1.20.4", "1.20.3"]);
        assert_eq!(categories.snapshot, vec!["24w07a"]);
        assert_eq!(categories.old_beta, vec!["b1.7.3"]);
        assert_eq!(categories.old_alpha, vec!["a1.2.6"]);
        assert_eq!(categories.latest.release, "1.20.4");
    }
}
