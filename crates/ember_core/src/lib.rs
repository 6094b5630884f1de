//! # Core plumbing for Ember Launcher
//!
//! Shared foundation used by every other crate in the workspace:
//! - verified, retrying downloads with per-destination locking ([`download`])
//! - the content-addressed object store and the TTL'd response cache ([`cache`])
//! - progress reporting and the launcher event bus ([`operation`], [`event`])
//! - Mojang-shaped JSON models ([`json`])
//! - the error taxonomy and conversion traits ([`error`])
//!
//! Nothing in here knows what an instance or a modpack is; those live in
//! `ember_instances` and `ember_modpack`.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

pub mod cache;
pub mod download;
mod error;
pub mod event;
pub mod file_utils;
pub mod json;
mod loader;
pub mod operation;
pub mod print;
mod progress;

pub use error::{
    IntoIoError, IntoJsonError, IntoStringError, IoError, JsonDownloadError, JsonError,
    JsonFileError, RequestError,
};
pub use loader::Loader;
pub use progress::{ByteProgress, GenericProgress};

pub const LAUNCHER_VERSION_NAME: &str = "0.1.0";

/// Separator between classpath entries, passed to `java -cp`.
pub const CLASSPATH_SEPARATOR: char = if cfg!(target_os = "windows") { ';' } else { ':' };

/// Root directory of the launcher. Everything (versions, libraries, assets,
/// instances, caches) lives below this.
///
/// Defaults to the platform data dir; `EMBER_LAUNCHER_DIR` overrides it,
/// which is also how tests get a hermetic root.
pub static LAUNCHER_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
    if let Ok(dir) = std::env::var("EMBER_LAUNCHER_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .map(|dir| dir.join("EmberLauncher"))
        .unwrap_or_else(|| PathBuf::from("EmberLauncher"))
});

/// Process-wide HTTP client. No default User-Agent; helpers in
/// [`file_utils`] add one for APIs that require it (Modrinth does).
pub static CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
});

pub mod constants {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "windows")] {
            /// OS name as spelled in Mojang library rules.
            pub const OS_NAME: &str = "windows";
        } else if #[cfg(target_os = "macos")] {
            pub const OS_NAME: &str = "osx";
        } else {
            pub const OS_NAME: &str = "linux";
        }
    }

    cfg_if::cfg_if! {
        if #[cfg(target_arch = "x86_64")] {
            /// Architecture name as spelled by the Adoptium API.
            pub const ARCH_NAME: &str = "x64";
        } else if #[cfg(target_arch = "aarch64")] {
            pub const ARCH_NAME: &str = "aarch64";
        } else if #[cfg(target_arch = "x86")] {
            pub const ARCH_NAME: &str = "x86";
        } else {
            pub const ARCH_NAME: &str = "unknown";
        }
    }

    /// File extensions of native shared objects worth extracting.
    pub const NATIVE_EXTENSIONS: &[&str] = &["so", "dll", "dylib", "jnilib"];
}

/// Runs the given fallible futures with at most `limit` in flight at once.
/// Bails out on the first error.
pub async fn do_jobs_with_limit<T, E>(
    jobs: impl Iterator<Item = impl std::future::Future<Output = Result<T, E>>>,
    limit: usize,
) -> Result<Vec<T>, E> {
    use futures::StreamExt;

    let stream = futures::stream::iter(jobs).buffer_unordered(limit);
    futures::pin_mut!(stream);

    let mut results = Vec::new();
    while let Some(result) = stream.next().await {
        results.push(result?);
    }
    Ok(results)
}

/// [`do_jobs_with_limit`] with a limit high enough to not matter.
pub async fn do_jobs<T, E>(
    jobs: impl Iterator<Item = impl std::future::Future<Output = Result<T, E>>>,
) -> Result<Vec<T>, E> {
    do_jobs_with_limit(jobs, 64).await
}
