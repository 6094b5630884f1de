//! Small filesystem and HTTP helpers used across the workspace.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::{
    IntoIoError, IntoJsonError, IoError, JsonDownloadError, RequestError, CLIENT,
    LAUNCHER_VERSION_NAME,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn exists(path: impl AsRef<Path>) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn send_get(url: &str, user_agent: bool) -> Result<reqwest::Response, RequestError> {
    let mut request = CLIENT.get(url);
    if user_agent {
        request = request.header(
            "User-Agent",
            format!("EmberLauncher/{LAUNCHER_VERSION_NAME}"),
        );
    }
    let response = match tokio::time::timeout(REQUEST_TIMEOUT, request.send()).await {
        Ok(response) => response?,
        Err(_) => {
            return Err(RequestError::Timeout {
                url: url.to_owned(),
            })
        }
    };
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(RequestError::DownloadError {
            code: response.status(),
            url: url.to_owned(),
        })
    }
}

pub async fn download_file_to_bytes(url: &str, user_agent: bool) -> Result<Vec<u8>, RequestError> {
    let response = send_get(url, user_agent).await?;
    Ok(response.bytes().await?.to_vec())
}

pub async fn download_file_to_string(url: &str, user_agent: bool) -> Result<String, RequestError> {
    let response = send_get(url, user_agent).await?;
    Ok(response.text().await?)
}

pub async fn download_file_to_json<T: DeserializeOwned>(
    url: &str,
    user_agent: bool,
) -> Result<T, JsonDownloadError> {
    let text = download_file_to_string(url, user_agent).await?;
    Ok(serde_json::from_str(&text).json(text)?)
}

/// SHA-1 of a file's contents as lowercase hex. Hashing happens on a
/// blocking thread; asset stores get large.
pub async fn sha1_file(path: &Path) -> Result<String, IoError> {
    let owned = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || -> Result<String, IoError> {
        let mut file = std::fs::File::open(&owned).path(&owned)?;
        let mut hasher = Sha1::new();
        std::io::copy(&mut file, &mut hasher).path(&owned)?;
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await;
    match result {
        Ok(hash) => hash,
        Err(err) => Err(IoError::Io {
            error: err.to_string(),
            path: path.to_path_buf(),
        }),
    }
}

/// Writes a file through a temporary sibling and a rename, so readers never
/// observe a half-written document.
pub async fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), IoError> {
    let Some(file_name) = path.file_name() else {
        return Err(IoError::PathNotFound {
            path: path.to_path_buf(),
        });
    };
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp, contents).await.path(&tmp)?;
    tokio::fs::rename(&tmp, path).await.path(path)?;
    Ok(())
}

pub async fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), IoError> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    let src_for_err = src.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<(), IoError> {
        for entry in walkdir::WalkDir::new(&src) {
            let entry = entry.map_err(|err| IoError::Io {
                error: err.to_string(),
                path: src.clone(),
            })?;
            let rel = entry.path().strip_prefix(&src).unwrap_or(entry.path());
            let target = dst.join(rel);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target).path(&target)?;
            } else {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).path(parent)?;
                }
                std::fs::copy(entry.path(), &target).path(&target)?;
            }
        }
        Ok(())
    })
    .await;
    match result {
        Ok(result) => result,
        Err(err) => Err(IoError::Io {
            error: err.to_string(),
            path: src_for_err,
        }),
    }
}

/// Total size in bytes of all regular files under `path`. Unreadable
/// entries are skipped rather than failing the walk.
pub async fn dir_size(path: &Path) -> u64 {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.metadata().ok())
            .map(|metadata| metadata.len())
            .sum()
    })
    .await
    .unwrap_or(0)
}

/// Removes `path` if present and recreates it empty.
pub async fn clean_dir(path: &Path) -> Result<(), IoError> {
    if exists(path).await {
        tokio::fs::remove_dir_all(path).await.path(path)?;
    }
    tokio::fs::create_dir_all(path).await.path(path)?;
    Ok(())
}

#[cfg(target_family = "unix")]
pub async fn set_executable(path: &Path) -> Result<(), IoError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = tokio::fs::metadata(path).await.path(path)?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    tokio::fs::set_permissions(path, permissions)
        .await
        .path(path)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum ZipExtractError {
    #[error("zip extraction failed:\n{0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("{0}")]
    Io(#[from] IoError),
}

/// Extracts a whole zip archive into `dest`.
pub async fn extract_zip(archive: &Path, dest: &Path) -> Result<(), ZipExtractError> {
    let archive = archive.to_path_buf();
    let dest_owned = dest.to_path_buf();
    let result = tokio::task::spawn_blocking(move || -> Result<(), ZipExtractError> {
        let file = std::fs::File::open(&archive).path(&archive)?;
        let mut zip = zip::ZipArchive::new(file)?;
        zip.extract(&dest_owned)?;
        Ok(())
    })
    .await;
    match result {
        Ok(result) => result,
        Err(err) => Err(ZipExtractError::Io(IoError::Io {
            error: err.to_string(),
            path: dest.to_path_buf(),
        })),
    }
}

/// Names of the entries directly inside a directory.
pub async fn read_filenames_from_dir(path: &Path) -> Result<Vec<String>, IoError> {
    let mut entries = tokio::fs::read_dir(path).await.path(path)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.path(path)? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}
