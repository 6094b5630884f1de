//! The two caches of the launcher.
//!
//! The object store is the content-addressed tree under `assets/objects/`;
//! a file named by its SHA-1 is its own index, so the only helpers needed
//! are path computation and verification.
//!
//! The response cache keeps JSON API responses (version manifests, loader
//! version lists, search results) on disk with a TTL, so repeated UI
//! refreshes don't hammer the metadata servers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::{err, file_utils, IntoIoError, IoError};

/// Physical location of a content-addressed object: `<hh>/<hash>` below
/// the objects directory, where `hh` is the first two hex chars.
#[must_use]
pub fn object_path(objects_dir: &Path, hash: &str) -> PathBuf {
    let prefix = hash.get(..2).unwrap_or(hash);
    objects_dir.join(prefix).join(hash)
}

fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    /// Unix seconds at write time.
    timestamp: i64,
    payload: serde_json::Value,
}

/// Disk-backed JSON cache keyed by URL, entries expiring after a TTL.
pub struct ResponseCache {
    dir: PathBuf,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
    pub const DEFAULT_MAX_ENTRIES: usize = 100;

    /// Opens (creating if needed) the cache directory and sweeps out
    /// entries that have already expired.
    pub async fn open(dir: PathBuf) -> Result<Self, IoError> {
        tokio::fs::create_dir_all(&dir).await.path(&dir)?;
        let cache = Self {
            dir,
            ttl: Self::DEFAULT_TTL,
            max_entries: Self::DEFAULT_MAX_ENTRIES,
        };
        cache.sweep_expired().await;
        Ok(cache)
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sha1_hex(key.as_bytes())))
    }

    fn is_expired(&self, timestamp: i64) -> bool {
        let age = Utc::now().timestamp().saturating_sub(timestamp);
        age < 0 || age as u64 > self.ttl.as_secs()
    }

    /// Returns the cached payload for `key`, or `None` on miss. An expired
    /// entry is deleted and reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.entry_path(key);
        let text = tokio::fs::read_to_string(&path).await.ok()?;
        let entry: CacheEntry = serde_json::from_str(&text).ok()?;
        if entry.key != key || self.is_expired(entry.timestamp) {
            _ = tokio::fs::remove_file(&path).await;
            return None;
        }
        serde_json::from_value(entry.payload).ok()
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), IoError> {
        let path = self.entry_path(key);
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(error) => {
                return Err(IoError::Io {
                    error: error.to_string(),
                    path,
                })
            }
        };
        let entry = CacheEntry {
            key: key.to_owned(),
            timestamp: Utc::now().timestamp(),
            payload,
        };
        let text = serde_json::to_string(&entry).unwrap_or_default();
        file_utils::atomic_write(&path, text.as_bytes()).await?;
        self.evict_over_capacity().await;
        Ok(())
    }

    async fn entries(&self) -> Vec<(PathBuf, i64)> {
        let mut found = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return found;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Ok(text) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            match serde_json::from_str::<CacheEntry>(&text) {
                Ok(parsed) => found.push((path, parsed.timestamp)),
                // Unreadable entries are garbage, not data.
                Err(_) => _ = tokio::fs::remove_file(&path).await,
            }
        }
        found
    }

    async fn sweep_expired(&self) {
        for (path, timestamp) in self.entries().await {
            if self.is_expired(timestamp) {
                if let Err(error) = tokio::fs::remove_file(&path).await {
                    err!("Couldn't sweep expired cache entry {path:?}: {error}");
                }
            }
        }
    }

    async fn evict_over_capacity(&self) {
        let mut entries = self.entries().await;
        if entries.len() <= self.max_entries {
            return;
        }
        entries.sort_by_key(|(_, timestamp)| *timestamp);
        let excess = entries.len() - self.max_entries;
        for (path, _) in entries.into_iter().take(excess) {
            _ = tokio::fs::remove_file(&path).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_uses_two_char_prefix() {
        let path = object_path(Path::new("/assets/objects"), "abcdef0123456789");
        assert_eq!(path, Path::new("/assets/objects/ab/abcdef0123456789"));
    }

    #[tokio::test]
    async fn response_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path().to_path_buf()).await.unwrap();

        assert_eq!(cache.get::<Vec<u32>>("https://example/a").await, None);

        cache.put("https://example/a", &vec![1u32, 2, 3]).await.unwrap();
        assert_eq!(
            cache.get::<Vec<u32>>("https://example/a").await,
            Some(vec![1, 2, 3])
        );

        // A different key misses even though a file exists.
        assert_eq!(cache.get::<Vec<u32>>("https://example/b").await, None);
    }

    #[tokio::test]
    async fn response_cache_expires_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path().to_path_buf())
            .await
            .unwrap()
            .with_ttl(Duration::from_secs(0));

        cache.put("https://example/a", &"payload").await.unwrap();
        // TTL of zero: anything older than this instant is expired.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(cache.get::<String>("https://example/a").await, None);
        // The expired entry was deleted on read.
        let names = file_utils::read_filenames_from_dir(dir.path()).await.unwrap();
        assert!(names.is_empty());
    }
}
