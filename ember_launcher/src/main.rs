use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Command};
use commands::CommandContext;
use ember_modpack::InstallOptions;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let context = CommandContext::new();

    let (response, wait_receiver) = match cli.command {
        Command::GetAvailableVersions { force_refresh } => {
            (commands::get_available_versions(force_refresh).await, None)
        }
        Command::LaunchGame {
            version,
            username,
            max_memory,
            min_memory,
            window_width,
            window_height,
            fullscreen,
            server,
            options_json,
            no_wait,
        } => {
            let receiver = (!no_wait).then(|| context.bus.subscribe());
            let response = commands::launch_game(
                &context,
                commands::LaunchGameInputs {
                    version,
                    username,
                    max_memory,
                    min_memory,
                    window_width,
                    window_height,
                    fullscreen,
                    server,
                    options_json,
                },
            )
            .await;
            let receiver = receiver.filter(|_| response["success"] == true);
            (response, receiver)
        }
        Command::LaunchInstance {
            instance_id,
            username,
            no_wait,
        } => {
            let receiver = (!no_wait).then(|| context.bus.subscribe());
            let response = commands::launch_instance(&context, &instance_id, &username).await;
            let receiver = receiver.filter(|_| response["success"] == true);
            (response, receiver)
        }
        Command::StopGame => (commands::stop_game(&context).await, None),
        Command::GetGameState => (commands::get_game_state(&context), None),
        Command::SearchModpacks {
            query,
            game_version,
            category,
            loader,
            limit,
            sort,
        } => (
            commands::search_modpacks(query, game_version, category, loader, limit, sort).await,
            None,
        ),
        Command::GetModpackVersions { modpack_id } => {
            (commands::get_modpack_versions(&modpack_id).await, None)
        }
        Command::InstallModpack {
            modpack_id,
            version_id,
            name,
            skip_optional,
        } => (
            commands::install_modpack(
                &context,
                &modpack_id,
                version_id.as_deref(),
                InstallOptions {
                    include_optional: !skip_optional,
                    display_name: name,
                },
            )
            .await,
            None,
        ),
        Command::ImportModpack {
            path,
            name,
            skip_optional,
        } => (
            commands::import_modpack(
                &context,
                &path,
                InstallOptions {
                    include_optional: !skip_optional,
                    display_name: name,
                },
            )
            .await,
            None,
        ),
        Command::ImportModpackUrl {
            url,
            name,
            skip_optional,
        } => (
            commands::import_modpack_url(
                &context,
                &url,
                InstallOptions {
                    include_optional: !skip_optional,
                    display_name: name,
                },
            )
            .await,
            None,
        ),
        Command::GetInstances => (commands::get_instances().await, None),
        Command::DeleteInstance { instance_id } => {
            (commands::delete_instance(&instance_id).await, None)
        }
        Command::UpdateModpackPlaytime {
            instance_id,
            minutes,
        } => (
            commands::update_modpack_playtime(&instance_id, minutes).await,
            None,
        ),
    };

    let success = response["success"] == true;
    match serde_json::to_string_pretty(&response) {
        Ok(text) => println!("{text}"),
        Err(error) => eprintln!("{{\"success\": false, \"error\": \"{error}\"}}"),
    }

    // A launch keeps the supervisor alive until the game is done.
    if let Some(receiver) = wait_receiver {
        commands::stream_events_until_exit(receiver).await;
    }

    std::process::exit(i32::from(!success));
}
