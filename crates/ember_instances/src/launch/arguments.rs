//! Composing the exact argument vector the game is spawned with.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use ember_core::json::VersionDetails;
use ember_core::{file_utils, CLASSPATH_SEPARATOR};

use super::LaunchError;

/// Reported to the game as `--versionType`; shows up on the F3 screen.
pub const LAUNCHER_BRAND: &str = "ember";

/// Namespace for offline player UUIDs, so the same name always maps to
/// the same identity.
const UUID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0x2d, 0x5c, 0x1a, 0x8e, 0x41, 0x4c, 0x09, 0x9b, 0x7e, 0x31, 0xd2, 0x44, 0x5a, 0x10,
    0x7c,
]);

/// Heap bounds in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBounds {
    pub min_mb: u32,
    pub max_mb: u32,
}

/// Picks heap bounds from the machine's RAM and the instance's mod count.
/// Explicit user overrides take precedence over both.
#[must_use]
pub fn auto_tune_memory(system_ram_mb: u64, mod_count: usize) -> MemoryBounds {
    let ram_gb = system_ram_mb / 1024;
    let (min_gb, max_gb) = if ram_gb <= 4 {
        (1, 2)
    } else if ram_gb <= 8 {
        (2, if mod_count > 50 { 4 } else { 3 })
    } else if ram_gb <= 16 {
        (2, if mod_count > 100 { 6 } else { 4 })
    } else {
        (3, if mod_count > 150 { 8 } else { 6 })
    };
    MemoryBounds {
        min_mb: min_gb * 1024,
        max_mb: max_gb * 1024,
    }
}

/// Garbage collector flags by Java generation. Modern JVMs get tuned G1;
/// Java 8 still runs best on CMS for a game of Minecraft's allocation
/// pattern.
#[must_use]
pub fn gc_args(java_major: u32) -> Vec<String> {
    if java_major >= 17 {
        vec![
            "-XX:+UnlockExperimentalVMOptions".to_owned(),
            "-XX:+UseG1GC".to_owned(),
            "-XX:G1NewSizePercent=20".to_owned(),
            "-XX:G1ReservePercent=20".to_owned(),
            "-XX:MaxGCPauseMillis=50".to_owned(),
            "-XX:G1HeapRegionSize=32M".to_owned(),
        ]
    } else {
        vec![
            "-XX:+UseConcMarkSweepGC".to_owned(),
            "-XX:-UseAdaptiveSizePolicy".to_owned(),
            "-Xmn128M".to_owned(),
        ]
    }
}

/// Flags every launch gets, independent of GC choice.
#[must_use]
pub fn common_jvm_args(cpu_count: usize) -> Vec<String> {
    let parallel_threads = cpu_count.max(1);
    let conc_threads = (cpu_count / 4).max(1);
    vec![
        "-XX:+ParallelRefProcEnabled".to_owned(),
        "-XX:+DisableExplicitGC".to_owned(),
        "-XX:+AlwaysPreTouch".to_owned(),
        "-XX:+PerfDisableSharedMem".to_owned(),
        format!("-XX:ParallelGCThreads={parallel_threads}"),
        format!("-XX:ConcGCThreads={conc_threads}"),
        // Log4Shell mitigation, unconditional.
        "-Dlog4j2.formatMsgNoLookups=true".to_owned(),
    ]
}

/// Deterministic offline identity: the same player name always produces
/// the same UUID.
#[must_use]
pub fn offline_uuid(username: &str) -> Uuid {
    Uuid::new_v5(&UUID_NAMESPACE, username.as_bytes())
}

fn path_str(path: &Path) -> Result<&str, LaunchError> {
    path.to_str()
        .ok_or_else(|| LaunchError::PathBufToString(path.to_path_buf()))
}

/// Joins every admitted library artifact plus the client jar into the
/// `-cp` value, deduplicating and keeping manifest order. A missing
/// artifact aborts the launch; phase C should have fetched it.
pub async fn build_classpath(
    version_json: &VersionDetails,
    libraries_dir: &Path,
    client_jar: &Path,
) -> Result<String, LaunchError> {
    let mut class_path = String::new();
    let mut seen = std::collections::HashSet::new();

    for library in &version_json.libraries {
        if !library.is_allowed() || library.is_modern_native() {
            continue;
        }
        let Some(artifact) = library.downloads.as_ref().and_then(|d| d.artifact.as_ref())
        else {
            continue;
        };
        let path = libraries_dir.join(artifact.get_path());
        if !seen.insert(path.clone()) {
            continue;
        }
        if !file_utils::exists(&path).await {
            return Err(LaunchError::MissingArtifact(path));
        }
        class_path.push_str(path_str(&path)?);
        class_path.push(CLASSPATH_SEPARATOR);
    }

    if !file_utils::exists(client_jar).await {
        return Err(LaunchError::MissingArtifact(client_jar.to_path_buf()));
    }
    class_path.push_str(path_str(client_jar)?);
    Ok(class_path)
}

pub struct GameArgsConfig<'a> {
    pub username: &'a str,
    pub version_id: &'a str,
    pub game_dir: &'a Path,
    pub assets_dir: &'a Path,
    pub asset_index_id: &'a str,
    pub window: Option<(u32, u32)>,
    pub fullscreen: bool,
    pub server: Option<(&'a str, Option<u16>)>,
}

/// The game-side half of the argument vector.
pub fn build_game_args(config: &GameArgsConfig<'_>) -> Result<Vec<String>, LaunchError> {
    let mut args = vec![
        "--username".to_owned(),
        config.username.to_owned(),
        "--version".to_owned(),
        config.version_id.to_owned(),
        "--gameDir".to_owned(),
        path_str(config.game_dir)?.to_owned(),
        "--assetsDir".to_owned(),
        path_str(config.assets_dir)?.to_owned(),
        "--assetIndex".to_owned(),
        config.asset_index_id.to_owned(),
        "--uuid".to_owned(),
        offline_uuid(config.username).to_string(),
        "--accessToken".to_owned(),
        "null".to_owned(),
        "--userType".to_owned(),
        "legacy".to_owned(),
        "--versionType".to_owned(),
        LAUNCHER_BRAND.to_owned(),
    ];

    if config.fullscreen {
        args.push("--fullscreen".to_owned());
    } else if let Some((width, height)) = config.window {
        args.push("--width".to_owned());
        args.push(width.to_string());
        args.push("--height".to_owned());
        args.push(height.to_string());
    }

    if let Some((host, port)) = config.server {
        args.push("--server".to_owned());
        args.push(host.to_owned());
        if let Some(port) = port {
            args.push("--port".to_owned());
            args.push(port.to_string());
        }
    }

    Ok(args)
}

/// The JVM-side half: heap, GC, natives path, classpath, main class.
pub fn build_jvm_args(
    memory: MemoryBounds,
    java_major: u32,
    cpu_count: usize,
    natives_dir: &Path,
    class_path: &str,
    main_class: &str,
    extra_args: &[String],
) -> Result<Vec<String>, LaunchError> {
    let natives = path_str(natives_dir)?;
    let mut args = vec![
        format!("-Xms{}M", memory.min_mb),
        format!("-Xmx{}M", memory.max_mb),
    ];
    args.extend(gc_args(java_major));
    args.extend(common_jvm_args(cpu_count));
    args.push(format!("-Djava.library.path={natives}"));
    args.push(format!("-Dminecraft.launcher.brand={LAUNCHER_BRAND}"));
    args.extend(extra_args.iter().filter(|arg| !arg.trim().is_empty()).cloned());
    if cfg!(target_os = "macos") {
        args.push("-XstartOnFirstThread".to_owned());
    }
    args.push("-cp".to_owned());
    args.push(class_path.to_owned());
    args.push(main_class.to_owned());
    Ok(args)
}
