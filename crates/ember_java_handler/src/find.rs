//! Locating and validating Java installations already on the system.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use ember_core::pt;

use crate::JavaInstall;

/// How long a `java -version` probe may take before the candidate is
/// written off as broken.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"version "([^"]+)""#).unwrap());

/// Parses a Java version string into its major version.
///
/// Accepts the legacy form `1.8.0_392` (major 8) and the modern forms
/// `17.0.1` / `21` (major 17 / 21).
#[must_use]
pub fn parse_major(version: &str) -> Option<u32> {
    let mut parts = version.split(['.', '_', '-', '+']);
    let first: u32 = parts.next()?.parse().ok()?;
    if first == 1 {
        // Legacy "1.major.minor_update" scheme.
        parts.next()?.parse().ok()
    } else {
        Some(first)
    }
}

/// Runs `<path> -version` and returns the parsed major version, or `None`
/// if the executable is missing, broken, slow, or prints something
/// unrecognizable.
pub async fn probe_java(path: &Path) -> Option<u32> {
    if !ember_core::file_utils::exists(path).await {
        return None;
    }
    let output = tokio::time::timeout(
        PROBE_TIMEOUT,
        tokio::process::Command::new(path).arg("-version").output(),
    )
    .await
    .ok()?
    .ok()?;
    if !output.status.success() {
        return None;
    }

    // The JVM reports its version on stderr; some vendors use stdout.
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let captures = VERSION_RE
        .captures(&stderr)
        .or_else(|| VERSION_RE.captures(&stdout))?;
    parse_major(captures.get(1)?.as_str())
}

fn executable_names() -> &'static [&'static str] {
    if cfg!(target_os = "windows") {
        &["javaw.exe", "java.exe"]
    } else {
        &["java"]
    }
}

/// Directories that commonly contain Java installations, each expected to
/// hold one subdirectory per install.
fn well_known_roots() -> Vec<PathBuf> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "windows")] {
            vec![
                PathBuf::from(r"C:\Program Files\Java"),
                PathBuf::from(r"C:\Program Files (x86)\Java"),
                PathBuf::from(r"C:\Program Files\Eclipse Adoptium"),
                PathBuf::from(r"C:\Program Files\Microsoft"),
            ]
        } else if #[cfg(target_os = "macos")] {
            vec![PathBuf::from("/Library/Java/JavaVirtualMachines")]
        } else {
            vec![PathBuf::from("/usr/lib/jvm"), PathBuf::from("/opt")]
        }
    }
}

/// Where the official launcher keeps its bundled runtimes.
fn mojang_runtime_roots() -> Vec<PathBuf> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "windows")] {
            vec![
                PathBuf::from(r"C:\Program Files (x86)\Minecraft Launcher\runtime"),
                PathBuf::from(r"C:\Program Files\Minecraft Launcher\runtime"),
            ]
        } else if #[cfg(target_os = "macos")] {
            dirs::home_dir()
                .map(|home| home.join("Library/Application Support/minecraft/runtime"))
                .into_iter()
                .collect()
        } else {
            dirs::home_dir()
                .map(|home| home.join(".minecraft/runtime"))
                .into_iter()
                .collect()
        }
    }
}

fn push_bin_candidates(dir: &Path, out: &mut Vec<PathBuf>) {
    for name in executable_names() {
        out.push(dir.join("bin").join(name));
        // macOS bundles nest the real home.
        out.push(dir.join("Contents/Home/bin").join(name));
    }
}

fn subdirectories(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect()
}

fn collect_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // PATH entries hold the executable directly.
    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            for name in executable_names() {
                candidates.push(dir.join(name));
            }
        }
    }

    if let Some(java_home) = std::env::var_os("JAVA_HOME") {
        push_bin_candidates(Path::new(&java_home), &mut candidates);
    }

    for root in well_known_roots() {
        for install in subdirectories(&root) {
            push_bin_candidates(&install, &mut candidates);
        }
    }

    // Mojang runtimes: runtime/<component>/<platform>/<component>/bin/java
    for root in mojang_runtime_roots() {
        for component in subdirectories(&root) {
            push_bin_candidates(&component, &mut candidates);
            for platform in subdirectories(&component) {
                push_bin_candidates(&platform, &mut candidates);
                for nested in subdirectories(&platform) {
                    push_bin_candidates(&nested, &mut candidates);
                }
            }
        }
    }

    candidates
}

/// Probes every known location, returning the first installation whose
/// major version satisfies `min_major`.
pub async fn find_system_java(min_major: u32) -> Option<JavaInstall> {
    for candidate in collect_candidates() {
        let Some(major) = probe_java(&candidate).await else {
            continue;
        };
        if major >= min_major {
            return Some(JavaInstall {
                path: candidate,
                major_version: major,
            });
        }
        pt!("Skipping Java {major} at {candidate:?}, need {min_major}+");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_versions() {
        assert_eq!(parse_major("1.8.0_392"), Some(8));
        assert_eq!(parse_major("1.8.0"), Some(8));
        assert_eq!(parse_major("1.7.0_80"), Some(7));
    }

    #[test]
    fn parses_modern_versions() {
        assert_eq!(parse_major("17.0.1"), Some(17));
        assert_eq!(parse_major("21"), Some(21));
        assert_eq!(parse_major("21.0.3+9"), Some(21));
        assert_eq!(parse_major("16-ea"), Some(16));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_major("not a version"), None);
        assert_eq!(parse_major(""), None);
    }

    #[test]
    fn version_regex_matches_jvm_banner() {
        let banner = "openjdk version \"17.0.11\" 2024-04-16\nOpenJDK Runtime Environment";
        let captures = VERSION_RE.captures(banner).unwrap();
        assert_eq!(&captures[1], "17.0.11");
        assert_eq!(parse_major(&captures[1]), Some(17));

        let legacy = "java version \"1.8.0_392\"\nJava(TM) SE Runtime Environment";
        let captures = VERSION_RE.captures(legacy).unwrap();
        assert_eq!(parse_major(&captures[1]), Some(8));
    }

    #[tokio::test]
    async fn probe_rejects_missing_file() {
        assert_eq!(probe_java(Path::new("/nonexistent/java")).await, None);
    }
}
