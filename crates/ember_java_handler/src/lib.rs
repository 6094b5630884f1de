//! Quick, easy cross-platform Java.
//!
//! Finds a Java installation that satisfies a Minecraft version's
//! requirement, or installs one. Detection order:
//!
//! 1. The persisted resolver cache (valid for 7 days, revalidated)
//! 2. Executables on `PATH`
//! 3. `JAVA_HOME`
//! 4. Well-known installation directories per platform
//! 5. The official launcher's bundled runtimes
//! 6. A JRE downloaded from Eclipse Adoptium (with pinned GitHub release
//!    URLs as a fallback when the API is unreachable)
//!
//! Every candidate is validated by actually running `java -version` and
//! parsing the reported version, so a stale cache or a broken install
//! falls through to the next source instead of breaking launches.

use std::env::consts::ARCH;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ember_core::constants::OS_NAME;
use ember_core::download::DownloadError;
use ember_core::file_utils::{self, ZipExtractError};
use ember_core::{
    err, info, GenericProgress, IntoIoError, IntoJsonError, IoError, JsonDownloadError,
    RequestError, LAUNCHER_DIR,
};

mod compression;
mod find;
mod install;

pub use find::{parse_major, probe_java};

/// Name of the Java executable to launch the game with.
///
/// `javaw` on Windows to avoid a second console window popping up behind
/// the game; plain `java` everywhere else.
pub const JAVA: &str = if cfg!(target_os = "windows") { "javaw" } else { "java" };

/// How long a cached resolver result stays trusted before revalidation
/// alone isn't enough.
const CACHE_VALID_DAYS: i64 = 7;

/// A validated Java installation.
#[derive(Debug, Clone)]
pub struct JavaInstall {
    pub path: PathBuf,
    pub major_version: u32,
}

/// The Java major version a Minecraft version needs.
///
/// 1.17 officially wants 16, but 17 runs it fine and is what we can
/// actually obtain, so it maps to 17. 1.18 and newer want 17. Everything
/// older runs on 8.
#[must_use]
pub fn required_java_major(minecraft_version: &str) -> u32 {
    // Betas, alphas, classic and infdev all predate 1.17.
    if minecraft_version.starts_with(|c: char| !c.is_ascii_digit()) {
        return 8;
    }
    let mut parts = minecraft_version.split('.');
    let (Some("1"), Some(minor)) = (parts.next(), parts.next()) else {
        // Snapshots ("24w07a") and oddly named versions get the modern default.
        return 17;
    };
    let minor: u32 = minor
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .unwrap_or(0);
    if minor >= 17 {
        17
    } else {
        8
    }
}

const JAVA_ERR_PREFIX: &str = "while resolving Java: ";

#[derive(Debug, Error)]
pub enum JavaError {
    #[error("no Java {required}+ installation found, and none could be installed (OS: {OS_NAME} {ARCH})")]
    JavaUnavailable { required: u32 },

    #[error("{JAVA_ERR_PREFIX}{0}")]
    Io(#[from] IoError),
    #[error("{JAVA_ERR_PREFIX}{0}")]
    JsonDownload(#[from] JsonDownloadError),
    #[error("{JAVA_ERR_PREFIX}{0}")]
    Request(#[from] RequestError),
    #[error("{JAVA_ERR_PREFIX}{0}")]
    Download(#[from] DownloadError),
    #[error("{JAVA_ERR_PREFIX}{0}")]
    Zip(#[from] ZipExtractError),
    #[error("{JAVA_ERR_PREFIX}couldn't extract Java tar.gz:\n{0}")]
    TarGzExtract(std::io::Error),
    #[error("{JAVA_ERR_PREFIX}downloaded JRE archive failed its checksum")]
    ChecksumMismatch,
    #[error("{JAVA_ERR_PREFIX}extracted a JRE but couldn't find its java binary in {0:?}")]
    NoJavaBinFound(PathBuf),
}

#[derive(Serialize, Deserialize)]
struct CachedJava {
    path: PathBuf,
    major_version: u32,
    /// Unix seconds at resolve time.
    timestamp: i64,
}

fn cache_path() -> PathBuf {
    LAUNCHER_DIR.join("cache").join("java_path.json")
}

async fn load_cached(min_major: u32) -> Option<JavaInstall> {
    let path = cache_path();
    let text = tokio::fs::read_to_string(&path).await.ok()?;
    let cached: CachedJava = serde_json::from_str(&text).ok()?;

    let age_days = (chrono::Utc::now().timestamp() - cached.timestamp) / (60 * 60 * 24);
    if !(0..=CACHE_VALID_DAYS).contains(&age_days) || cached.major_version < min_major {
        return None;
    }
    // The path must still validate; installations get removed.
    let major = probe_java(&cached.path).await?;
    (major >= min_major).then_some(JavaInstall {
        path: cached.path,
        major_version: major,
    })
}

async fn store_cached(install: &JavaInstall) -> Result<(), IoError> {
    let path = cache_path();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.path(parent)?;
    }
    let cached = CachedJava {
        path: install.path.clone(),
        major_version: install.major_version,
        timestamp: chrono::Utc::now().timestamp(),
    };
    let text = serde_json::to_string(&cached).json(String::new()).map_err(
        |error| IoError::Io {
            error: error.to_string(),
            path: path.clone(),
        },
    )?;
    file_utils::atomic_write(&path, text.as_bytes()).await
}

/// Returns a Java installation with `major_version >= min_major`,
/// installing a bundled JRE as a last resort.
///
/// # Errors
/// [`JavaError::JavaUnavailable`] when neither the requested major nor the
/// 17 fallback can be found or installed. Install failures along the way
/// are logged, not returned, because the next source may still succeed.
pub async fn resolve_java(
    min_major: u32,
    progress: Option<&Sender<GenericProgress>>,
) -> Result<JavaInstall, JavaError> {
    if let Some(cached) = load_cached(min_major).await {
        return Ok(cached);
    }

    if let Some(found) = find::find_system_java(min_major).await {
        info!(
            "Using system Java {} at {:?}",
            found.major_version, found.path
        );
        if let Err(error) = store_cached(&found).await {
            err!("Couldn't save Java path cache: {error}");
        }
        return Ok(found);
    }

    info!("No suitable system Java found, installing a bundled JRE {min_major}");
    match install::install_jre(min_major, progress).await {
        Ok(installed) => {
            if let Err(error) = store_cached(&installed).await {
                err!("Couldn't save Java path cache: {error}");
            }
            return Ok(installed);
        }
        Err(error) => err!("Couldn't install Java {min_major}: {error}"),
    }

    // Last chance: 17 runs every modern version and most loaders.
    if min_major != 17 {
        if let Ok(installed) = install::install_jre(17, progress).await {
            if let Err(error) = store_cached(&installed).await {
                err!("Couldn't save Java path cache: {error}");
            }
            return Ok(installed);
        }
    }

    Err(JavaError::JavaUnavailable {
        required: min_major,
    })
}

/// Deletes all the auto-installed JREs. They reinstall on demand.
pub async fn delete_java_installs() {
    info!("Clearing Java installs");
    let java_installs = LAUNCHER_DIR.join("java_installs");
    if !java_installs.exists() {
        return;
    }
    if let Err(error) = tokio::fs::remove_dir_all(&java_installs).await {
        err!("Could not delete `java_installs` dir: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_major_per_version() {
        assert_eq!(required_java_major("1.8.9"), 8);
        assert_eq!(required_java_major("1.12.2"), 8);
        assert_eq!(required_java_major("1.16.5"), 8);
        assert_eq!(required_java_major("1.17"), 17);
        assert_eq!(required_java_major("1.17.1"), 17);
        assert_eq!(required_java_major("1.18"), 17);
        assert_eq!(required_java_major("1.20.4"), 17);
        assert_eq!(required_java_major("1.21.1"), 17);
        // Snapshots fall back to modern Java.
        assert_eq!(required_java_major("24w07a"), 17);
        // Pre-release-era versions run on 8.
        assert_eq!(required_java_major("b1.7.3"), 8);
        assert_eq!(required_java_major("a1.2.6"), 8);
        assert_eq!(required_java_major("c0.30"), 8);
    }
}
