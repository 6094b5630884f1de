//! Forge and NeoForge.
//!
//! Both ship an installer jar whose embedded `version.json` uses the
//! Mojang version-document library format. We pull that file out of the
//! installer archive and merge it over the vanilla document; the
//! installer itself is never executed.

use std::io::Read;
use std::path::PathBuf;

use serde::Deserialize;

use ember_core::download::{self, FetchOptions};
use ember_core::json::version::Library;
use ember_core::json::VersionDetails;
use ember_core::{info, IntoIoError, IntoJsonError, Loader, LAUNCHER_DIR};
use ember_instances::Modloader;

use crate::ModpackError;

const FORGE_MAVEN: &str = "https://maven.minecraftforge.net";
const NEOFORGE_MAVEN: &str = "https://maven.neoforged.net/releases";

/// The slice of the installer's `version.json` we merge. Forge's extra
/// fields (processors, data) drive its installer and are not needed for
/// a library merge.
#[allow(non_snake_case)]
#[derive(Deserialize, Debug)]
struct InstallerVersionJson {
    mainClass: String,
    #[serde(default)]
    libraries: Vec<Library>,
    #[serde(default)]
    minecraftArguments: Option<String>,
}

fn installer_url(minecraft_version: &str, loader_version: &str, neoforge: bool) -> (String, String) {
    if neoforge {
        let file = format!("neoforge-{loader_version}-installer.jar");
        (
            format!("{NEOFORGE_MAVEN}/net/neoforged/neoforge/{loader_version}/{file}"),
            file,
        )
    } else {
        let full = format!("{minecraft_version}-{loader_version}");
        let file = format!("forge-{full}-installer.jar");
        (
            format!("{FORGE_MAVEN}/net/minecraftforge/forge/{full}/{file}"),
            file,
        )
    }
}

async fn read_installer_version_json(installer: &PathBuf) -> Result<InstallerVersionJson, ModpackError> {
    let installer = installer.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<InstallerVersionJson, ModpackError> {
        let file = std::fs::File::open(&installer).path(&installer)?;
        let mut zip = zip::ZipArchive::new(file)?;
        let mut entry = zip.by_name("version.json").map_err(|_| {
            ModpackError::MalformedArchive("installer has no version.json".to_owned())
        })?;
        let mut text = String::new();
        entry.read_to_string(&mut text).path(&installer)?;
        Ok(serde_json::from_str(&text).json(text)?)
    })
    .await;
    match result {
        Ok(result) => result,
        Err(err) => Err(ModpackError::MalformedArchive(err.to_string())),
    }
}

/// Builds the augmented version document for Forge or NeoForge.
pub async fn build_augmented(
    minecraft_version: &str,
    loader_version: &str,
    neoforge: bool,
) -> Result<VersionDetails, ModpackError> {
    let loader = if neoforge { Loader::Neoforge } else { Loader::Forge };
    info!("Fetching {loader} {loader_version} installer manifest");

    let (url, file_name) = installer_url(minecraft_version, loader_version, neoforge);
    let cache_dir = LAUNCHER_DIR.join("cache/installers");
    let installer_path = cache_dir.join(&file_name);
    download::fetch(&url, &installer_path, FetchOptions::default().large_file()).await?;

    let installer_json = read_installer_version_json(&installer_path).await?;

    let base = VersionDetails::load(&LAUNCHER_DIR.join("versions"), minecraft_version).await?;
    let modloader = Modloader {
        kind: loader,
        version: Some(loader_version.to_owned()),
    };
    let augmented_id = modloader
        .version_doc_id(minecraft_version)
        .unwrap_or_else(|| minecraft_version.to_owned());

    let mut libraries = installer_json.libraries;
    libraries.extend(base.libraries.iter().cloned());

    let mut augmented = base;
    augmented.id = augmented_id;
    augmented.mainClass = installer_json.mainClass;
    augmented.libraries = libraries;
    if installer_json.minecraftArguments.is_some() {
        augmented.minecraftArguments = installer_json.minecraftArguments;
    }
    Ok(augmented)
}
