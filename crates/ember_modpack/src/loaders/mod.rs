//! Modloader installers.
//!
//! Each installer fetches the loader's own version metadata, merges its
//! libraries over the vanilla version document, and writes the result as
//! an augmented document under `versions/<mc>-<loader>-<ver>/`. Launching
//! a modded instance then works exactly like launching vanilla, just
//! from the augmented document.

pub mod fabric;
pub mod forge;

use std::sync::Arc;

use ember_core::event::EventBus;
use ember_core::operation::Operations;
use ember_core::Loader;
use ember_instances::download::GameDownloader;
use ember_instances::Modloader;

use crate::ModpackError;

pub async fn install_loader(
    minecraft_version: &str,
    modloader: &Modloader,
    operations: &Arc<Operations>,
    bus: &Arc<EventBus>,
) -> Result<(), ModpackError> {
    let Some(version) = modloader.version.as_deref() else {
        return Err(ModpackError::MissingDependency(format!(
            "{} loader version",
            modloader.kind
        )));
    };

    let augmented = match modloader.kind {
        Loader::Vanilla => return Ok(()),
        Loader::Fabric => {
            fabric::build_augmented(minecraft_version, version, fabric::Backend::Fabric).await?
        }
        Loader::Quilt => {
            fabric::build_augmented(minecraft_version, version, fabric::Backend::Quilt).await?
        }
        Loader::Forge => forge::build_augmented(minecraft_version, version, false).await?,
        Loader::Neoforge => forge::build_augmented(minecraft_version, version, true).await?,
    };

    augmented
        .save(&ember_core::LAUNCHER_DIR.join("versions"))
        .await?;

    // Loader-specific libraries are part of the augmented document now;
    // fetch whatever the vanilla install didn't already provide.
    GameDownloader::with_version_json(augmented, operations.clone(), bus.clone())
        .ensure_libraries()
        .await?;
    Ok(())
}

/// `group:artifact:version` to its repository-relative jar path.
#[must_use]
pub fn maven_artifact_path(name: &str) -> Option<String> {
    let mut parts = name.split(':');
    let group = parts.next()?;
    let artifact = parts.next()?;
    let version = parts.next()?;
    let classifier = parts.next();

    let file_name = match classifier {
        Some(classifier) => format!("{artifact}-{version}-{classifier}.jar"),
        None => format!("{artifact}-{version}.jar"),
    };
    Some(format!(
        "{}/{artifact}/{version}/{file_name}",
        group.replace('.', "/")
    ))
}
