//! Launching the game: compose the argument vector, spawn, supervise.

pub mod arguments;
pub mod read_log;
pub mod supervisor;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use ember_core::event::{EventBus, LauncherEvent};
use ember_core::json::VersionDetails;
use ember_core::operation::Operations;
use ember_core::{info, IoError, JsonError, JsonFileError, LAUNCHER_DIR};
use ember_java_handler::{required_java_major, resolve_java, JavaError};

use crate::download::{ensure_version, GameDownloadError, GameDownloader};
use arguments::{GameArgsConfig, MemoryBounds};
use supervisor::Supervisor;

#[derive(Debug, Clone)]
pub struct ServerAddress {
    pub host: String,
    pub port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// The base Minecraft version, e.g. `1.20.4`.
    pub version: String,
    /// Id of an augmented loader version document under `versions/`,
    /// when launching a modded instance.
    pub loader_version_id: Option<String>,
    /// Instance receiving playtime accounting, if any.
    pub instance_id: Option<String>,
    /// Working directory of the game. Defaults to the launcher root for
    /// bare version launches.
    pub game_dir: Option<PathBuf>,
    pub username: String,
    pub min_memory_mb: Option<u32>,
    pub max_memory_mb: Option<u32>,
    pub window_width: Option<u32>,
    pub window_height: Option<u32>,
    pub fullscreen: bool,
    pub server: Option<ServerAddress>,
    pub extra_jvm_args: Vec<String>,
}

const LAUNCH_ERR_PREFIX: &str = "while launching the game:\n";

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("a launch is already in progress")]
    LaunchInProgress,
    #[error("no game is currently running")]
    NotRunning,
    #[error("couldn't spawn the game process:\n{0}")]
    SpawnFailed(String),
    #[error("the game did not reach the running state in time")]
    LaunchTimeout,
    #[error("the game crashed (exit code {exit_code:?}):\n{reason}")]
    GameCrashed {
        exit_code: Option<i32>,
        reason: String,
    },
    #[error("the game process tree could not be stopped")]
    StopFailed,

    #[error("classpath entry missing from disk: {0:?}")]
    MissingArtifact(PathBuf),
    #[error("path contains invalid unicode: {0:?}")]
    PathBufToString(PathBuf),

    #[error("{LAUNCH_ERR_PREFIX}{0}")]
    Download(#[from] GameDownloadError),
    #[error("{LAUNCH_ERR_PREFIX}{0}")]
    Java(#[from] JavaError),
    #[error("{LAUNCH_ERR_PREFIX}{0}")]
    Io(#[from] IoError),
    #[error("{LAUNCH_ERR_PREFIX}{0}")]
    Json(#[from] JsonError),
}

impl From<JsonFileError> for LaunchError {
    fn from(err: JsonFileError) -> Self {
        match err {
            JsonFileError::SerdeError(err) => err.into(),
            JsonFileError::Io(err) => err.into(),
        }
    }
}

/// Launches the game described by `options`. Returns the child PID once
/// the process is spawned; progress toward RUNNING is observable through
/// the event bus and `Supervisor::status`.
pub async fn launch(
    supervisor: &Arc<Supervisor>,
    operations: &Arc<Operations>,
    bus: &Arc<EventBus>,
    options: LaunchOptions,
) -> Result<u32, LaunchError> {
    let epoch = supervisor.begin_launch(options.instance_id.clone())?;
    match prepare_and_spawn(supervisor, operations, bus, epoch, &options).await {
        Ok(pid) => Ok(pid),
        Err(error) => {
            supervisor.fail_launch(epoch, &error.to_string());
            Err(error)
        }
    }
}

async fn prepare_and_spawn(
    supervisor: &Arc<Supervisor>,
    operations: &Arc<Operations>,
    bus: &Arc<EventBus>,
    epoch: u64,
    options: &LaunchOptions,
) -> Result<u32, LaunchError> {
    bus.publish(LauncherEvent::LaunchProgress {
        task: "prepare".to_owned(),
        message: format!("Preparing {}", options.version),
        current: None,
        total: None,
    });

    // Everything on disk before anything is spawned.
    let base_json = ensure_version(&options.version, operations, bus).await?;

    let effective_json = match &options.loader_version_id {
        Some(loader_id) => {
            let versions_dir = LAUNCHER_DIR.join("versions");
            let loader_json = VersionDetails::load(&versions_dir, loader_id).await?;
            // Loader libraries may have been added since install; make
            // sure every artifact in the augmented document is resident.
            GameDownloader::with_version_json(
                loader_json.clone(),
                operations.clone(),
                bus.clone(),
            )
            .ensure_libraries()
            .await?;
            loader_json
        }
        None => base_json.clone(),
    };

    bus.publish(LauncherEvent::LaunchProgress {
        task: "java".to_owned(),
        message: "Resolving Java".to_owned(),
        current: None,
        total: None,
    });
    let required_major = base_json
        .javaVersion
        .as_ref()
        .map_or_else(|| required_java_major(&options.version), |v| v.majorVersion);
    let java = resolve_java(required_major, None).await?;

    let game_dir = options
        .game_dir
        .clone()
        .unwrap_or_else(|| LAUNCHER_DIR.to_path_buf());
    let mod_count = count_mods(&game_dir).await;
    let memory = resolve_memory(options, mod_count);

    let versions_dir = LAUNCHER_DIR.join("versions");
    let libraries_dir = LAUNCHER_DIR.join("libraries");
    let assets_dir = LAUNCHER_DIR.join("assets");
    let client_jar = VersionDetails::jar_path(&versions_dir, &base_json.id);
    // Natives were rebuilt by ensure_version; the path belongs to the
    // base version even for modded launches.
    let natives_dir = versions_dir.join(&base_json.id).join("natives");

    let class_path =
        arguments::build_classpath(&effective_json, &libraries_dir, &client_jar).await?;

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4);
    let mut args = arguments::build_jvm_args(
        memory,
        java.major_version,
        cpu_count,
        &natives_dir,
        &class_path,
        &effective_json.mainClass,
        &options.extra_jvm_args,
    )?;

    let window = match (options.window_width, options.window_height) {
        (Some(width), Some(height)) => Some((width, height)),
        _ => None,
    };
    args.extend(arguments::build_game_args(&GameArgsConfig {
        username: &options.username,
        version_id: &effective_json.id,
        game_dir: &game_dir,
        assets_dir: &assets_dir,
        asset_index_id: &base_json.assetIndex.id,
        window,
        fullscreen: options.fullscreen,
        server: options
            .server
            .as_ref()
            .map(|server| (server.host.as_str(), server.port)),
    })?);

    info!(
        "Launching {} with Java {} ({}M-{}M heap, {mod_count} mods)",
        effective_json.id, java.major_version, memory.min_mb, memory.max_mb
    );
    supervisor
        .spawn_game(epoch, &java.path, &args, &game_dir)
        .await
}

fn resolve_memory(options: &LaunchOptions, mod_count: usize) -> MemoryBounds {
    let auto = arguments::auto_tune_memory(system_ram_mb(), mod_count);
    MemoryBounds {
        min_mb: options.min_memory_mb.unwrap_or(auto.min_mb),
        max_mb: options.max_memory_mb.unwrap_or(auto.max_mb),
    }
}

fn system_ram_mb() -> u64 {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    system.total_memory() / (1024 * 1024)
}

async fn count_mods(game_dir: &std::path::Path) -> usize {
    ember_core::file_utils::read_filenames_from_dir(&game_dir.join("mods"))
        .await
        .map(|names| {
            names
                .iter()
                .filter(|name| name.ends_with(".jar"))
                .count()
        })
        .unwrap_or(0)
}
