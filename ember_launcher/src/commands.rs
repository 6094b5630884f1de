//! Command handlers: each takes typed inputs, runs the core crates, and
//! produces one JSON response with a `success` flag.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use ember_core::download::{self, FetchOptions};
use ember_core::event::{EventBus, LauncherEvent};
use ember_core::operation::Operations;
use ember_core::{err, Loader, LAUNCHER_DIR};
use ember_instances::instance::list_versions::list_versions;
use ember_instances::launch::{self, LaunchOptions, ServerAddress};
use ember_instances::{list_instances, Instance, Supervisor};
use ember_modpack::store::{self, SearchQuery};
use ember_modpack::{install_from_path, InstallOptions};

/// The explicit dependency set threaded through every command; built
/// once at startup, no module-level mutable state.
pub struct CommandContext {
    pub supervisor: Arc<Supervisor>,
    pub operations: Arc<Operations>,
    pub bus: Arc<EventBus>,
}

impl CommandContext {
    #[must_use]
    pub fn new() -> Arc<Self> {
        let bus = Arc::new(EventBus::new());
        let operations = Operations::new(bus.clone());
        let supervisor = Supervisor::new(bus.clone());

        tokio::spawn(operations.clone().run_sweeper());
        tokio::spawn(supervisor.clone().run_reaper());

        Arc::new(Self {
            supervisor,
            operations,
            bus,
        })
    }
}

fn ok(mut payload: Value) -> Value {
    if let Some(object) = payload.as_object_mut() {
        object.insert("success".to_owned(), Value::Bool(true));
    }
    payload
}

fn fail(error: impl std::fmt::Display) -> Value {
    json!({ "success": false, "error": error.to_string() })
}

/// Parses "4G" / "4096M" / "4096" (MB) into megabytes.
pub fn parse_memory_mb(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    let (digits, unit) = match trimmed.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((pos, _)) => trimmed.split_at(pos),
        None => (trimmed, ""),
    };
    let value: u32 = digits.parse().ok()?;
    match unit.trim().to_ascii_uppercase().as_str() {
        "G" | "GB" => Some(value * 1024),
        "M" | "MB" | "" => Some(value),
        _ => None,
    }
}

/// Parses "host" or "host:port".
pub fn parse_server(raw: &str) -> Option<ServerAddress> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().ok()?;
            Some(ServerAddress {
                host: host.to_owned(),
                port: Some(port),
            })
        }
        None => Some(ServerAddress {
            host: trimmed.to_owned(),
            port: None,
        }),
    }
}

fn parse_loader(raw: &str) -> Option<Loader> {
    match raw.to_ascii_lowercase().as_str() {
        "vanilla" => Some(Loader::Vanilla),
        "fabric" => Some(Loader::Fabric),
        "forge" => Some(Loader::Forge),
        "neoforge" => Some(Loader::Neoforge),
        "quilt" => Some(Loader::Quilt),
        _ => None,
    }
}

/// The `launch-game` option document. Exactly these keys; anything else
/// is an `InvalidOptions` error at the boundary.
#[derive(Deserialize, Default, Debug)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct LaunchGameDocument {
    pub version: Option<String>,
    pub username: Option<String>,
    pub max_memory: Option<String>,
    pub min_memory: Option<String>,
    pub window_width: Option<u32>,
    pub window_height: Option<u32>,
    pub fullscreen: Option<bool>,
    pub server: Option<ServerDocument>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerDocument {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
}

pub struct LaunchGameInputs {
    pub version: Option<String>,
    pub username: String,
    pub max_memory: Option<String>,
    pub min_memory: Option<String>,
    pub window_width: Option<u32>,
    pub window_height: Option<u32>,
    pub fullscreen: bool,
    pub server: Option<String>,
    pub options_json: Option<String>,
}

pub async fn get_available_versions(force_refresh: bool) -> Value {
    match list_versions(force_refresh).await {
        Ok(categories) => match serde_json::to_value(&categories) {
            Ok(value) => ok(value),
            Err(error) => fail(error),
        },
        Err(error) => fail(error),
    }
}

pub async fn launch_game(context: &Arc<CommandContext>, inputs: LaunchGameInputs) -> Value {
    // The JSON document fills in whatever the flags left unset.
    let document = match &inputs.options_json {
        Some(text) => match serde_json::from_str::<LaunchGameDocument>(text) {
            Ok(document) => document,
            Err(error) => return fail(format!("invalid options: {error}")),
        },
        None => LaunchGameDocument::default(),
    };

    let Some(version) = inputs.version.clone().or(document.version) else {
        return fail("invalid options: no version given");
    };

    let max_memory = inputs.max_memory.or(document.max_memory);
    let min_memory = inputs.min_memory.or(document.min_memory);
    let max_memory_mb = match max_memory.as_deref().map(parse_memory_mb) {
        Some(None) => return fail("invalid options: unparseable maxMemory"),
        other => other.flatten(),
    };
    let min_memory_mb = match min_memory.as_deref().map(parse_memory_mb) {
        Some(None) => return fail("invalid options: unparseable minMemory"),
        other => other.flatten(),
    };

    let server = match inputs.server.as_deref() {
        Some(raw) => match parse_server(raw) {
            Some(server) => Some(server),
            None => return fail("invalid options: unparseable server address"),
        },
        None => document.server.map(|server| ServerAddress {
            host: server.host,
            port: server.port,
        }),
    };

    let options = LaunchOptions {
        version,
        loader_version_id: None,
        instance_id: None,
        game_dir: None,
        username: document.username.unwrap_or(inputs.username),
        min_memory_mb,
        max_memory_mb,
        window_width: inputs.window_width.or(document.window_width),
        window_height: inputs.window_height.or(document.window_height),
        fullscreen: inputs.fullscreen || document.fullscreen.unwrap_or(false),
        server,
        extra_jvm_args: Vec::new(),
    };

    match launch::launch(&context.supervisor, &context.operations, &context.bus, options).await
    {
        Ok(pid) => ok(json!({ "pid": pid })),
        Err(error) => fail(error),
    }
}

pub async fn launch_instance(
    context: &Arc<CommandContext>,
    instance_id: &str,
    username: &str,
) -> Value {
    let instance = match Instance::load(instance_id).await {
        Ok(instance) => instance,
        Err(error) => return fail(format!("unknown instance {instance_id}: {error}")),
    };
    if instance.broken {
        return fail(format!("instance {instance_id} is marked broken"));
    }

    let options = LaunchOptions {
        version: instance.minecraft_version.clone(),
        loader_version_id: instance.modloader.version_doc_id(&instance.minecraft_version),
        instance_id: Some(instance.id.clone()),
        game_dir: Some(Instance::dir(&instance.id)),
        username: username.to_owned(),
        min_memory_mb: None,
        max_memory_mb: None,
        window_width: None,
        window_height: None,
        fullscreen: false,
        server: None,
        extra_jvm_args: Vec::new(),
    };

    match launch::launch(&context.supervisor, &context.operations, &context.bus, options).await
    {
        Ok(pid) => ok(json!({ "pid": pid, "instanceId": instance.id })),
        Err(error) => fail(error),
    }
}

pub async fn stop_game(context: &Arc<CommandContext>) -> Value {
    match context.supervisor.stop().await {
        Ok(()) => ok(json!({})),
        Err(error) => fail(error),
    }
}

pub fn get_game_state(context: &Arc<CommandContext>) -> Value {
    match serde_json::to_value(context.supervisor.status()) {
        Ok(status) => ok(status),
        Err(error) => fail(error),
    }
}

pub async fn search_modpacks(
    query: Option<String>,
    game_version: Option<String>,
    category: Option<String>,
    loader: Option<String>,
    limit: usize,
    sort: Option<String>,
) -> Value {
    let loader = match loader.as_deref() {
        Some(raw) => match parse_loader(raw) {
            Some(loader) => Some(loader),
            None => return fail(format!("unknown loader filter: {raw}")),
        },
        None => None,
    };
    let search = SearchQuery {
        query,
        game_version,
        category,
        loader,
        limit,
        sort,
    };
    match store::search_modpacks(&search).await {
        Ok(modpacks) => ok(json!({ "modpacks": modpacks })),
        Err(error) => fail(error),
    }
}

pub async fn get_modpack_versions(modpack_id: &str) -> Value {
    match store::get_modpack_versions(modpack_id).await {
        Ok(versions) => ok(json!({ "versions": versions })),
        Err(error) => fail(error),
    }
}

pub async fn install_modpack(
    context: &Arc<CommandContext>,
    modpack_id: &str,
    version_id: Option<&str>,
    options: InstallOptions,
) -> Value {
    let mrpack = match store::download_mrpack(modpack_id, version_id).await {
        Ok(path) => path,
        Err(error) => return fail(error),
    };
    import_modpack(context, &mrpack, options).await
}

pub async fn import_modpack(
    context: &Arc<CommandContext>,
    path: &Path,
    options: InstallOptions,
) -> Value {
    match install_from_path(path, &context.operations, &context.bus, &options).await {
        Ok(instance) => ok(json!({ "instanceId": instance.id })),
        Err(error) => fail(error),
    }
}

pub async fn import_modpack_url(
    context: &Arc<CommandContext>,
    url: &str,
    options: InstallOptions,
) -> Value {
    let file_name = url
        .rsplit('/')
        .next()
        .filter(|name| name.ends_with(".mrpack"))
        .unwrap_or("downloaded.mrpack");
    let dest: PathBuf = LAUNCHER_DIR.join("cache/mrpack").join(file_name);
    if let Err(error) = download::fetch(url, &dest, FetchOptions::default().large_file()).await {
        return fail(error);
    }
    import_modpack(context, &dest, options).await
}

pub async fn get_instances() -> Value {
    let instances = list_instances().await;
    match serde_json::to_value(&instances) {
        Ok(value) => ok(json!({ "instances": value })),
        Err(error) => fail(error),
    }
}

pub async fn delete_instance(instance_id: &str) -> Value {
    match Instance::delete(instance_id).await {
        Ok(()) => ok(json!({})),
        Err(error) => fail(error),
    }
}

pub async fn update_modpack_playtime(instance_id: &str, minutes: i64) -> Value {
    match Instance::add_playtime(instance_id, minutes).await {
        Ok(()) => ok(json!({})),
        Err(error) => fail(error),
    }
}

/// Streams events as JSON lines until the game reaches a terminal event.
/// Used by the launch commands unless `--no-wait` was given.
pub async fn stream_events_until_exit(receiver: std::sync::mpsc::Receiver<LauncherEvent>) {
    let result = tokio::task::spawn_blocking(move || {
        for event in receiver.iter() {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(error) => err!("Couldn't serialize event: {error}"),
            }
            if matches!(
                event,
                LauncherEvent::GameClosed { .. }
                    | LauncherEvent::GameCrashed { .. }
                    | LauncherEvent::LaunchError { .. }
            ) {
                break;
            }
        }
    })
    .await;
    if let Err(error) = result {
        err!("Event stream task failed: {error}");
    }
}
