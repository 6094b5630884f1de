//! The asset acquisition engine.
//!
//! [`ensure_version`] materializes everything one version of the game
//! needs, in dependency order: version document, client jar, libraries,
//! extracted natives, asset index, asset objects. Every phase verifies
//! what is already on disk before fetching, so the whole operation is
//! idempotent and self-healing.

use std::sync::Arc;

use thiserror::Error;

use ember_core::download::DownloadError;
use ember_core::event::EventBus;
use ember_core::operation::Operations;
use ember_core::{
    info, IoError, JsonDownloadError, JsonError, JsonFileError, RequestError,
};

mod assets;
mod downloader;
mod libraries;

pub use downloader::GameDownloader;

/// Libraries, natives jars and assets all fetch with this many downloads
/// in flight. Higher values trip the Mojang CDN's rate limiting.
pub(crate) const DOWNLOAD_CONCURRENCY: usize = 3;

const DL_ERR_PREFIX: &str = "while downloading the game:\n";

#[derive(Debug, Error)]
pub enum GameDownloadError {
    #[error("unknown Minecraft version: {0}")]
    UnknownVersion(String),

    #[error("{DL_ERR_PREFIX}{0}")]
    Io(#[from] IoError),
    #[error("{DL_ERR_PREFIX}{0}")]
    Json(#[from] JsonError),
    #[error("{DL_ERR_PREFIX}{0}")]
    Request(#[from] RequestError),
    #[error("{DL_ERR_PREFIX}{0}")]
    Download(#[from] DownloadError),

    #[error("{DL_ERR_PREFIX}couldn't extract natives:\n{0}")]
    NativeExtraction(String),
    #[error("{DL_ERR_PREFIX}{failed} of {total} assets could not be fetched")]
    AssetsIncomplete { failed: usize, total: usize },
    #[error("the operation was cancelled")]
    Cancelled,
}

impl From<JsonDownloadError> for GameDownloadError {
    fn from(err: JsonDownloadError) -> Self {
        match err {
            JsonDownloadError::SerdeError(err) => err.into(),
            JsonDownloadError::Request(err) => err.into(),
        }
    }
}

impl From<JsonFileError> for GameDownloadError {
    fn from(err: JsonFileError) -> Self {
        match err {
            JsonFileError::SerdeError(err) => err.into(),
            JsonFileError::Io(err) => err.into(),
        }
    }
}

/// Makes sure `version_id` is fully present on disk: document, jar,
/// libraries, natives and assets. Returns the parsed version document.
///
/// Natives are always cleared and rebuilt, per launch; everything else is
/// verified in place and only missing or corrupt files are fetched.
pub async fn ensure_version(
    version_id: &str,
    operations: &Arc<Operations>,
    bus: &Arc<EventBus>,
) -> Result<ember_core::json::VersionDetails, GameDownloadError> {
    let downloader = GameDownloader::new(version_id, operations.clone(), bus.clone()).await?;

    downloader.ensure_client_jar().await?;
    downloader.ensure_libraries().await?;
    downloader.extract_natives().await?;

    let index = downloader.ensure_asset_index().await?;
    downloader.ensure_assets(&index).await?;

    info!("Version {version_id} is ready");
    Ok(downloader.into_version_json())
}
