//! Verified file downloads.
//!
//! One fetch per destination path at a time, enforced by a global lock map.
//! Every download streams to disk while hashing, then the size and SHA-1
//! are checked before the file counts as resident. Failed attempts delete
//! the partial file and back off exponentially.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use rand::Rng;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::{file_utils, pt, ByteProgress, IntoIoError, IoError, RequestError, CLIENT};

pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout used for client jars, JREs and other large files.
pub const LARGE_FILE_TIMEOUT: Duration = Duration::from_secs(300);

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 10_000;
const BACKOFF_JITTER_MS: u64 = 250;

static FILE_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn lock_for(path: &Path) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = FILE_LOCKS.lock().unwrap();
    locks.entry(path.to_path_buf()).or_default().clone()
}

fn release_lock(path: &Path, lock: &Arc<tokio::sync::Mutex<()>>) {
    let mut locks = FILE_LOCKS.lock().unwrap();
    // Two strong references mean nobody else is waiting: ours and the map's.
    if Arc::strong_count(lock) <= 2 {
        locks.remove(path);
    }
}

pub struct FetchOptions {
    pub expected_sha1: Option<String>,
    pub expected_size: Option<u64>,
    pub retries: u32,
    pub timeout: Duration,
    pub progress: Option<Sender<ByteProgress>>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            expected_sha1: None,
            expected_size: None,
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            progress: None,
        }
    }
}

impl FetchOptions {
    #[must_use]
    pub fn sha1(mut self, sha1: impl Into<String>) -> Self {
        self.expected_sha1 = Some(sha1.into());
        self
    }

    #[must_use]
    pub fn size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    #[must_use]
    pub fn large_file(mut self) -> Self {
        self.timeout = LARGE_FILE_TIMEOUT;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Fetched {
    /// True when the destination already held verified bytes and no
    /// request was made.
    pub cached: bool,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download failed after {attempts} attempts\nurl: {url}\nlast error: {last_error}")]
    Failed {
        url: String,
        attempts: u32,
        last_error: String,
    },
    #[error("hash mismatch\nurl: {url}\nexpected: {expected}\ngot: {got}")]
    HashMismatch {
        url: String,
        expected: String,
        got: String,
    },
    #[error("size mismatch\nurl: {url}\nexpected: {expected}\ngot: {got}")]
    SizeMismatch { url: String, expected: u64, got: u64 },
    #[error("{0}")]
    Request(#[from] RequestError),
    #[error("{0}")]
    Io(#[from] IoError),
}

/// Downloads `url` to `dest`, verifying against the expected hash and size.
///
/// If `dest` already exists with the expected hash, no request is made.
/// Concurrent fetches to the same destination serialize; fetches to
/// different destinations proceed in parallel.
pub async fn fetch(url: &str, dest: &Path, options: FetchOptions) -> Result<Fetched, DownloadError> {
    let lock = lock_for(dest);
    let result = {
        let _guard = lock.lock().await;
        fetch_locked(url, dest, &options).await
    };
    release_lock(dest, &lock);
    result
}

async fn fetch_locked(
    url: &str,
    dest: &Path,
    options: &FetchOptions,
) -> Result<Fetched, DownloadError> {
    if existing_is_valid(dest, options.expected_sha1.as_deref()).await? {
        return Ok(Fetched { cached: true });
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.path(parent)?;
    }

    let mut last_error = String::new();
    for attempt in 1..=options.retries.max(1) {
        match attempt_download(url, dest, options).await {
            Ok(()) => return Ok(Fetched { cached: false }),
            Err(err) => {
                _ = tokio::fs::remove_file(dest).await;
                last_error = err.to_string();
                if attempt < options.retries {
                    let delay = backoff_delay(attempt);
                    pt!(
                        "Download attempt {attempt} failed ({url}), retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(DownloadError::Failed {
        url: url.to_owned(),
        attempts: options.retries.max(1),
        last_error,
    })
}

/// `base * 2^(attempt-1) + jitter`, capped at 10 seconds.
fn backoff_delay(attempt: u32) -> Duration {
    let exponential = BACKOFF_BASE_MS.saturating_mul(1u64 << (attempt - 1).min(16));
    let jitter = rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
    Duration::from_millis(exponential.min(BACKOFF_CAP_MS).saturating_add(jitter))
}

async fn existing_is_valid(
    dest: &Path,
    expected_sha1: Option<&str>,
) -> Result<bool, DownloadError> {
    let Ok(metadata) = tokio::fs::metadata(dest).await else {
        return Ok(false);
    };
    if !metadata.is_file() || metadata.len() == 0 {
        return Ok(false);
    }
    let Some(expected) = expected_sha1 else {
        // No hash to check against, assume the cached file is good.
        return Ok(true);
    };
    let got = file_utils::sha1_file(dest).await?;
    if got.eq_ignore_ascii_case(expected) {
        return Ok(true);
    }
    pt!("Cached file has wrong hash, re-downloading: {dest:?}");
    tokio::fs::remove_file(dest).await.path(dest)?;
    Ok(false)
}

async fn attempt_download(
    url: &str,
    dest: &Path,
    options: &FetchOptions,
) -> Result<(), DownloadError> {
    let deadline = tokio::time::Instant::now() + options.timeout;

    let response = match tokio::time::timeout_at(deadline, CLIENT.get(url).send()).await {
        Ok(response) => response.map_err(RequestError::from)?,
        Err(_) => {
            return Err(RequestError::Timeout {
                url: url.to_owned(),
            }
            .into())
        }
    };
    if !response.status().is_success() {
        return Err(RequestError::DownloadError {
            code: response.status(),
            url: url.to_owned(),
        }
        .into());
    }

    let total = response.content_length().or(options.expected_size);
    let mut response = response;
    let mut file = tokio::fs::File::create(dest).await.path(dest)?;
    let mut hasher = Sha1::new();
    let mut written: u64 = 0;

    loop {
        let chunk = match tokio::time::timeout_at(deadline, response.chunk()).await {
            Ok(chunk) => chunk.map_err(RequestError::from)?,
            Err(_) => {
                return Err(RequestError::Timeout {
                    url: url.to_owned(),
                }
                .into())
            }
        };
        let Some(chunk) = chunk else { break };

        hasher.update(&chunk);
        written += chunk.len() as u64;
        file.write_all(&chunk).await.path(dest)?;

        if let Some(progress) = &options.progress {
            _ = progress.send(ByteProgress {
                bytes: written,
                total,
            });
        }
    }
    file.flush().await.path(dest)?;
    drop(file);

    if let Some(expected) = options.expected_size {
        if written != expected {
            return Err(DownloadError::SizeMismatch {
                url: url.to_owned(),
                expected,
                got: written,
            });
        }
    }
    if let Some(expected) = options.expected_sha1.as_deref() {
        let got = format!("{:x}", hasher.finalize());
        if !got.eq_ignore_ascii_case(expected) {
            return Err(DownloadError::HashMismatch {
                url: url.to_owned(),
                expected: expected.to_owned(),
                got,
            });
        }
    }
    Ok(())
}

/// Checks whether a file on disk matches the given hash (and size, when
/// known). Any mismatch or read failure counts as invalid, not an error.
pub async fn verify_file(path: &Path, expected_sha1: &str, expected_size: Option<u64>) -> bool {
    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    if let Some(expected) = expected_size {
        if metadata.len() != expected {
            return false;
        }
    }
    match file_utils::sha1_file(path).await {
        Ok(got) => got.eq_ignore_ascii_case(expected_sha1),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA1: &str = "d3486ae9136e7856bc42212385ea797094475802";

    #[test]
    fn backoff_grows_and_caps() {
        let first = backoff_delay(1);
        assert!(first >= Duration::from_millis(500));
        assert!(first < Duration::from_millis(500 + BACKOFF_JITTER_MS));

        let second = backoff_delay(2);
        assert!(second >= Duration::from_millis(1000));

        // Far past the cap.
        let large = backoff_delay(12);
        assert!(large <= Duration::from_millis(BACKOFF_CAP_MS + BACKOFF_JITTER_MS));
    }

    #[tokio::test]
    async fn fetch_downloads_and_verifies() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/file.bin")
            .with_status(200)
            .with_body("Hello world!")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let url = format!("{}/file.bin", server.url());

        let result = fetch(
            &url,
            &dest,
            FetchOptions::default().sha1(HELLO_SHA1).size(12),
        )
        .await
        .unwrap();
        assert!(!result.cached);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"Hello world!");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_short_circuits_on_valid_cached_file() {
        let server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        tokio::fs::write(&dest, b"Hello world!").await.unwrap();

        // No mock registered: a request would fail the test.
        let url = format!("{}/file.bin", server.url());
        let result = fetch(&url, &dest, FetchOptions::default().sha1(HELLO_SHA1))
            .await
            .unwrap();
        assert!(result.cached);
    }

    #[tokio::test]
    async fn fetch_replaces_corrupt_cached_file() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/file.bin")
            .with_status(200)
            .with_body("Hello world!")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        tokio::fs::write(&dest, b"corrupted bytes").await.unwrap();

        let url = format!("{}/file.bin", server.url());
        let result = fetch(&url, &dest, FetchOptions::default().sha1(HELLO_SHA1))
            .await
            .unwrap();
        assert!(!result.cached);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"Hello world!");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_fails_after_exhausting_retries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing.bin")
            .with_status(404)
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.bin");
        let url = format!("{}/missing.bin", server.url());

        let options = FetchOptions {
            retries: 2,
            ..FetchOptions::default()
        };
        let err = fetch(&url, &dest, options).await.unwrap_err();
        assert!(matches!(err, DownloadError::Failed { attempts: 2, .. }));
        assert!(!dest.exists());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_rejects_wrong_size() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/short.bin")
            .with_status(200)
            .with_body("Hello wo..")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("short.bin");
        let url = format!("{}/short.bin", server.url());

        let options = FetchOptions {
            expected_size: Some(12),
            retries: 1,
            ..FetchOptions::default()
        };
        let err = fetch(&url, &dest, options).await.unwrap_err();
        assert!(matches!(err, DownloadError::Failed { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn verify_file_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, b"Hello world!").await.unwrap();

        assert!(verify_file(&path, HELLO_SHA1, Some(12)).await);
        assert!(!verify_file(&path, HELLO_SHA1, Some(13)).await);
        assert!(!verify_file(&path, "0000000000000000000000000000000000000000", None).await);

        tokio::fs::write(&path, b"Hello vorld!").await.unwrap();
        assert!(!verify_file(&path, HELLO_SHA1, Some(12)).await);
    }
}
