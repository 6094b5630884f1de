//! The command surface exposed to UI frontends. Subcommand names are the
//! wire names; every command prints one JSON response document.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ember-launcher", version, about = "Minecraft launcher core")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List installable Minecraft versions, categorized
    GetAvailableVersions {
        #[arg(long)]
        force_refresh: bool,
    },
    /// Launch a bare Minecraft version
    LaunchGame {
        #[arg(long)]
        version: Option<String>,
        #[arg(long, default_value = "Player")]
        username: String,
        /// Heap ceiling, e.g. "4G" or "4096M"
        #[arg(long)]
        max_memory: Option<String>,
        #[arg(long)]
        min_memory: Option<String>,
        #[arg(long)]
        window_width: Option<u32>,
        #[arg(long)]
        window_height: Option<u32>,
        #[arg(long)]
        fullscreen: bool,
        /// Auto-connect target, "host" or "host:port"
        #[arg(long)]
        server: Option<String>,
        /// All launch options as one JSON document; unknown keys are
        /// rejected. Explicit flags win over the document.
        #[arg(long)]
        options_json: Option<String>,
        /// Return right after spawning instead of streaming events
        /// until the game closes
        #[arg(long)]
        no_wait: bool,
    },
    /// Launch an installed instance
    LaunchInstance {
        instance_id: String,
        #[arg(long, default_value = "Player")]
        username: String,
        #[arg(long)]
        no_wait: bool,
    },
    /// Stop the running game (graceful, then forceful)
    StopGame,
    /// Report the supervisor's current state
    GetGameState,
    /// Search Modrinth for modpacks
    SearchModpacks {
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        game_version: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        loader: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        sort: Option<String>,
    },
    /// List a modpack's published versions
    GetModpackVersions { modpack_id: String },
    /// Install a modpack from Modrinth
    InstallModpack {
        modpack_id: String,
        #[arg(long)]
        version_id: Option<String>,
        /// Display name for the new instance
        #[arg(long)]
        name: Option<String>,
        /// Skip files the pack marks optional for clients
        #[arg(long)]
        skip_optional: bool,
    },
    /// Install a modpack from a local .mrpack file
    ImportModpack {
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        skip_optional: bool,
    },
    /// Install a modpack from a .mrpack URL
    ImportModpackUrl {
        url: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        skip_optional: bool,
    },
    /// List installed instances
    GetInstances,
    /// Delete an instance and its directory
    DeleteInstance { instance_id: String },
    /// Add playtime minutes to an instance
    UpdateModpackPlaytime { instance_id: String, minutes: i64 },
}
