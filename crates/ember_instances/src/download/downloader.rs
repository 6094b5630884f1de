//! Phases A and B: the version document and the client jar.

use std::path::PathBuf;
use std::sync::Arc;

use ember_core::cache::ResponseCache;
use ember_core::download::{self, FetchOptions};
use ember_core::event::{EventBus, LauncherEvent};
use ember_core::json::{Manifest, VersionDetails};
use ember_core::operation::Operations;
use ember_core::{file_utils, info, pt, IntoIoError, IntoJsonError, LAUNCHER_DIR};

use super::GameDownloadError;

pub struct GameDownloader {
    pub version_json: VersionDetails,
    pub(crate) versions_dir: PathBuf,
    pub(crate) libraries_dir: PathBuf,
    pub(crate) assets_dir: PathBuf,
    pub(crate) operations: Arc<Operations>,
    pub(crate) bus: Arc<EventBus>,
}

impl GameDownloader {
    /// Phase A: loads the version document from disk, fetching it through
    /// the Mojang manifest when absent.
    pub async fn new(
        version_id: &str,
        operations: Arc<Operations>,
        bus: Arc<EventBus>,
    ) -> Result<Self, GameDownloadError> {
        let versions_dir = LAUNCHER_DIR.join("versions");
        let version_json = Self::ensure_version_json(&versions_dir, version_id).await?;

        Ok(Self {
            version_json,
            versions_dir,
            libraries_dir: LAUNCHER_DIR.join("libraries"),
            assets_dir: LAUNCHER_DIR.join("assets"),
            operations,
            bus,
        })
    }

    /// Wraps an already-loaded version document (used for augmented
    /// loader documents, whose id is not in the Mojang manifest).
    #[must_use]
    pub fn with_version_json(
        version_json: VersionDetails,
        operations: Arc<Operations>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            version_json,
            versions_dir: LAUNCHER_DIR.join("versions"),
            libraries_dir: LAUNCHER_DIR.join("libraries"),
            assets_dir: LAUNCHER_DIR.join("assets"),
            operations,
            bus,
        }
    }

    #[must_use]
    pub fn into_version_json(self) -> VersionDetails {
        self.version_json
    }

    async fn ensure_version_json(
        versions_dir: &std::path::Path,
        version_id: &str,
    ) -> Result<VersionDetails, GameDownloadError> {
        let path = VersionDetails::json_path(versions_dir, version_id);
        if file_utils::exists(&path).await {
            return Ok(VersionDetails::load(versions_dir, version_id).await?);
        }

        info!("Fetching version document for {version_id}");
        let cache = ResponseCache::open(LAUNCHER_DIR.join("cache/responses")).await?;
        let manifest = Manifest::fetch_cached(&cache, false).await?;
        let entry = manifest
            .find_name(version_id)
            .ok_or_else(|| GameDownloadError::UnknownVersion(version_id.to_owned()))?;

        let text = file_utils::download_file_to_string(&entry.url, false).await?;
        let version_json: VersionDetails = serde_json::from_str(&text).json(text.clone())?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.path(parent)?;
        }
        file_utils::atomic_write(&path, text.as_bytes()).await?;
        Ok(version_json)
    }

    /// Phase B: the client jar, hash-checked against the version document.
    pub async fn ensure_client_jar(&self) -> Result<(), GameDownloadError> {
        let client = &self.version_json.downloads.client;
        let jar_path = VersionDetails::jar_path(&self.versions_dir, &self.version_json.id);

        self.bus.publish(LauncherEvent::LaunchProgress {
            task: "client".to_owned(),
            message: format!("Checking client jar for {}", self.version_json.id),
            current: None,
            total: None,
        });

        let fetched = download::fetch(
            &client.url,
            &jar_path,
            FetchOptions::default()
                .sha1(client.sha1.clone())
                .size(client.size)
                .large_file(),
        )
        .await?;
        if !fetched.cached {
            pt!("Downloaded client jar: {jar_path:?}");
        }
        Ok(())
    }

    pub(crate) fn natives_dir(&self) -> PathBuf {
        self.versions_dir
            .join(&self.version_json.id)
            .join("natives")
    }
}
