//! # Modpack installation for Ember Launcher
//!
//! Everything `.mrpack`: parsing the archive, resolving its declared
//! files into the instance directory, installing the declared modloader,
//! applying overrides, and talking to the Modrinth API for search and
//! version listings.

use std::path::PathBuf;

use thiserror::Error;

use ember_core::download::DownloadError;
use ember_core::{IoError, JsonDownloadError, JsonError, JsonFileError, RequestError};
use ember_instances::download::GameDownloadError;

pub mod install;
pub mod loaders;
pub mod mrpack;
pub mod store;

pub use install::{install_from_path, update_from_path, InstallOptions};
pub use mrpack::{MrpackFile, MrpackIndex};

const PACK_ERR_PREFIX: &str = "while working with the modpack:\n";

#[derive(Debug, Error)]
pub enum ModpackError {
    #[error("malformed modpack archive:\n{0}")]
    MalformedArchive(String),
    #[error("unsupported modloader: {0}")]
    UnsupportedLoader(String),
    #[error("modpack is missing required dependency: {0}")]
    MissingDependency(String),
    #[error("modpack declares an unsafe path: {0}")]
    UnsafePath(String),
    #[error("no download for {path} succeeded")]
    FileUnavailable { path: String },
    #[error("no installable file on modpack version {0}")]
    NoPackFile(String),

    #[error("{PACK_ERR_PREFIX}{0}")]
    Io(#[from] IoError),
    #[error("{PACK_ERR_PREFIX}{0}")]
    Json(#[from] JsonError),
    #[error("{PACK_ERR_PREFIX}{0}")]
    Request(#[from] RequestError),
    #[error("{PACK_ERR_PREFIX}{0}")]
    Download(#[from] DownloadError),
    #[error("{PACK_ERR_PREFIX}while dealing with zip:\n{0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("{PACK_ERR_PREFIX}while installing the Minecraft base:\n{0}")]
    GameDownload(#[from] GameDownloadError),

    #[error("{PACK_ERR_PREFIX}instance directory went missing: {0:?}")]
    InstanceDirMissing(PathBuf),
}

impl From<JsonFileError> for ModpackError {
    fn from(err: JsonFileError) -> Self {
        match err {
            JsonFileError::SerdeError(err) => err.into(),
            JsonFileError::Io(err) => err.into(),
        }
    }
}

impl From<JsonDownloadError> for ModpackError {
    fn from(err: JsonDownloadError) -> Self {
        match err {
            JsonDownloadError::SerdeError(err) => err.into(),
            JsonDownloadError::Request(err) => err.into(),
        }
    }
}
