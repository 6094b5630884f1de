//! Installing and updating modpacks.
//!
//! Install order matters: the Minecraft base first, then the loader,
//! then the pack's files, then overrides, and `instance.json` strictly
//! last so a half-finished directory is never mistaken for an instance.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;

use ember_core::download::{self, FetchOptions};
use ember_core::event::EventBus;
use ember_core::operation::{OperationHandle, OperationKind, Operations};
use ember_core::{
    do_jobs_with_limit, err, file_utils, info, pt, IntoIoError, IntoJsonError,
};
use ember_instances::download::ensure_version;
use ember_instances::instance::Instance;

use crate::mrpack::{self, MrpackIndex};
use crate::{loaders, ModpackError};

/// Mod files download with this many in flight.
const MOD_CONCURRENCY: usize = 3;

/// Copy of the pack index kept inside the instance, so updates can diff
/// the old file set against the new one.
const STORED_INDEX_NAME: &str = ".mrpack-index.json";

#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Whether `env.client == "optional"` files are installed.
    pub include_optional: bool,
    /// Overrides the pack's declared name for the instance.
    pub display_name: Option<String>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            include_optional: true,
            display_name: None,
        }
    }
}

/// Turns a pack name into a filesystem-safe instance id.
#[must_use]
pub fn slug(name: &str) -> String {
    let mut out = String::new();
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let out = out.trim_matches('-').to_owned();
    if out.is_empty() {
        "instance".to_owned()
    } else {
        out
    }
}

/// First free instance id for `name`: the slug itself, then `-2`, `-3`…
async fn unique_instance_id(name: &str) -> String {
    let base = slug(name);
    if !file_utils::exists(Instance::dir(&base)).await {
        return base;
    }
    let mut counter = 2;
    loop {
        let candidate = format!("{base}-{counter}");
        if !file_utils::exists(Instance::dir(&candidate)).await {
            return candidate;
        }
        counter += 1;
    }
}

/// Installs a `.mrpack` from a local file, returning the new instance.
///
/// On any failure after the instance directory exists, a `broken: true`
/// record is written so the UI can offer cleanup, and the partial
/// directory is left in place; re-running the install is safe.
pub async fn install_from_path(
    mrpack_path: &Path,
    operations: &Arc<Operations>,
    bus: &Arc<EventBus>,
    options: &InstallOptions,
) -> Result<Instance, ModpackError> {
    let index = mrpack::read_index(mrpack_path).await?;
    let minecraft_version = index.minecraft_version()?.to_owned();
    let modloader = index.loader()?;

    let display_name = options
        .display_name
        .clone()
        .unwrap_or_else(|| index.name.clone());
    let instance_id = unique_instance_id(&display_name).await;
    let instance_dir = Instance::dir(&instance_id);
    tokio::fs::create_dir_all(&instance_dir)
        .await
        .path(&instance_dir)?;

    info!(
        "Installing modpack {display_name} ({minecraft_version}, {})",
        modloader.kind
    );
    let operation = operations.begin(OperationKind::ModpackInstall);

    let result = run_install(
        &index,
        mrpack_path,
        &instance_id,
        &instance_dir,
        &minecraft_version,
        &modloader,
        &display_name,
        operations,
        bus,
        options,
        &operation,
    )
    .await;

    match result {
        Ok(instance) => {
            operation.complete();
            info!("Finished installing {display_name} as {instance_id}");
            Ok(instance)
        }
        Err(error) => {
            operation.fail(&error.to_string());
            err!("Modpack install failed: {error}");
            // Leave the partial directory, but mark it broken.
            let mut broken = Instance::new(
                &instance_id,
                &display_name,
                &minecraft_version,
                modloader.clone(),
            );
            broken.broken = true;
            if let Err(save_error) = broken.save().await {
                err!("Couldn't mark instance {instance_id} broken: {save_error}");
            }
            Err(error)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_install(
    index: &MrpackIndex,
    mrpack_path: &Path,
    instance_id: &str,
    instance_dir: &Path,
    minecraft_version: &str,
    modloader: &ember_instances::Modloader,
    display_name: &str,
    operations: &Arc<Operations>,
    bus: &Arc<EventBus>,
    options: &InstallOptions,
    operation: &OperationHandle,
) -> Result<Instance, ModpackError> {
    operation.stage("minecraft");
    ensure_version(minecraft_version, operations, bus).await?;

    operation.stage("loader");
    if !modloader.kind.is_vanilla() {
        loaders::install_loader(minecraft_version, modloader, operations, bus).await?;
    }

    operation.stage("files");
    install_pack_files(index, instance_dir, options.include_optional, operation).await?;

    operation.stage("overrides");
    let copied = mrpack::extract_overrides(mrpack_path, instance_dir, "overrides").await?;
    let client_copied =
        mrpack::extract_overrides(mrpack_path, instance_dir, "client-overrides").await?;
    pt!("Applied {} override files", copied + client_copied);

    operation.stage("finalize");
    store_index_copy(index, instance_dir).await?;

    let mut instance = Instance::new(instance_id, display_name, minecraft_version, modloader.clone());
    instance.description = index.summary.clone().unwrap_or_default();
    instance.refresh_size().await;
    // instance.json is written last; its presence means a complete install.
    instance.save().await?;
    Ok(instance)
}

/// Downloads every client-side file of the pack into the instance
/// directory, each verified against its declared sha1 and size.
async fn install_pack_files(
    index: &MrpackIndex,
    instance_dir: &Path,
    include_optional: bool,
    operation: &OperationHandle,
) -> Result<(), ModpackError> {
    let wanted: Vec<_> = index
        .files
        .iter()
        .filter(|file| file.client_included(include_optional))
        .collect();
    let total = wanted.len();
    operation.update(0, total, Some("Downloading mod files".to_owned()));

    let done = Mutex::new(0usize);
    do_jobs_with_limit(
        wanted.iter().map(|file| {
            let done = &done;
            async move {
                if operation.is_cancelled() {
                    return Ok(());
                }
                let rel = mrpack::sanitize_rel_path(&file.path)?;
                let dest = instance_dir.join(rel);
                fetch_with_mirrors(file, &dest).await?;

                let done = {
                    let mut done = done.lock().unwrap();
                    *done += 1;
                    *done
                };
                operation.update(done, total, Some(file.path.clone()));
                Ok::<(), ModpackError>(())
            }
        }),
        MOD_CONCURRENCY,
    )
    .await?;

    if operation.is_cancelled() {
        return Err(ModpackError::MalformedArchive("installation cancelled".to_owned()));
    }
    Ok(())
}

/// Tries each declared download URL in order until one verifies.
async fn fetch_with_mirrors(
    file: &crate::MrpackFile,
    dest: &Path,
) -> Result<(), ModpackError> {
    let mut last_error = None;
    for url in &file.downloads {
        match download::fetch(
            url,
            dest,
            FetchOptions::default()
                .sha1(file.hashes.sha1.clone())
                .size(file.fileSize),
        )
        .await
        {
            Ok(_) => {
                // The fetch verified sha1 and size; the stronger hash is
                // checked too when the pack declares one.
                if let Some(expected) = &file.hashes.sha512 {
                    let got = sha512_file(dest).await?;
                    if !got.eq_ignore_ascii_case(expected) {
                        _ = tokio::fs::remove_file(dest).await;
                        last_error = None;
                        err!("sha512 mismatch for {}", file.path);
                        continue;
                    }
                }
                return Ok(());
            }
            Err(error) => {
                err!("Mirror failed for {}: {error}", file.path);
                last_error = Some(error);
            }
        }
    }
    match last_error {
        Some(error) => Err(error.into()),
        None => Err(ModpackError::FileUnavailable {
            path: file.path.clone(),
        }),
    }
}

async fn sha512_file(path: &Path) -> Result<String, ModpackError> {
    use sha2::{Digest, Sha512};

    let owned = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || -> Result<String, ModpackError> {
        let mut file = std::fs::File::open(&owned).path(&owned)?;
        let mut hasher = Sha512::new();
        std::io::copy(&mut file, &mut hasher).path(&owned)?;
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await;
    match result {
        Ok(hash) => hash,
        Err(error) => Err(ModpackError::MalformedArchive(error.to_string())),
    }
}

async fn store_index_copy(
    index: &MrpackIndex,
    instance_dir: &Path,
) -> Result<(), ModpackError> {
    // Serialize the file list we care about for later diffing.
    let paths: Vec<&str> = index.files.iter().map(|file| file.path.as_str()).collect();
    let doc = serde_json::json!({
        "versionId": index.versionId,
        "files": paths,
    });
    let text = serde_json::to_string_pretty(&doc)
        .json(String::new())
        .unwrap_or_default();
    file_utils::atomic_write(&instance_dir.join(STORED_INDEX_NAME), text.as_bytes()).await?;
    Ok(())
}

async fn load_stored_paths(instance_dir: &Path) -> HashSet<PathBuf> {
    #[derive(serde::Deserialize)]
    struct StoredIndex {
        files: Vec<String>,
    }
    let Ok(text) = tokio::fs::read_to_string(instance_dir.join(STORED_INDEX_NAME)).await else {
        return HashSet::new();
    };
    let Ok(stored) = serde_json::from_str::<StoredIndex>(&text) else {
        return HashSet::new();
    };
    stored
        .files
        .iter()
        .filter_map(|path| mrpack::sanitize_rel_path(path).ok())
        .collect()
}

/// Updates an existing instance from a newer `.mrpack`. Files present in
/// the old index but absent from the new one are removed; overrides are
/// reapplied; playtime and identity are preserved.
pub async fn update_from_path(
    instance_id: &str,
    mrpack_path: &Path,
    operations: &Arc<Operations>,
    bus: &Arc<EventBus>,
    options: &InstallOptions,
) -> Result<Instance, ModpackError> {
    let mut instance = Instance::load(instance_id).await?;
    let instance_dir = Instance::dir(instance_id);
    if !file_utils::exists(&instance_dir).await {
        return Err(ModpackError::InstanceDirMissing(instance_dir));
    }

    let index = mrpack::read_index(mrpack_path).await?;
    let minecraft_version = index.minecraft_version()?.to_owned();
    let modloader = index.loader()?;

    info!("Updating instance {instance_id} to {}", index.versionId);
    let operation = operations.begin(OperationKind::ModpackUpdate);

    operation.stage("stale files");
    let old_paths = load_stored_paths(&instance_dir).await;
    let new_paths: HashSet<PathBuf> = index
        .files
        .iter()
        .filter_map(|file| mrpack::sanitize_rel_path(&file.path).ok())
        .collect();
    for stale in old_paths.difference(&new_paths) {
        let victim = instance_dir.join(stale);
        if file_utils::exists(&victim).await {
            pt!("Removing stale pack file {stale:?}");
            if let Err(error) = tokio::fs::remove_file(&victim).await {
                err!("Couldn't remove stale file {victim:?}: {error}");
            }
        }
    }

    let result = run_install(
        &index,
        mrpack_path,
        instance_id,
        &instance_dir,
        &minecraft_version,
        &modloader,
        &instance.name,
        operations,
        bus,
        options,
        &operation,
    )
    .await;

    match result {
        Ok(fresh) => {
            operation.complete();
            // Keep identity and history; adopt the new pack facts.
            instance.minecraft_version = fresh.minecraft_version;
            instance.modloader = fresh.modloader;
            instance.description = fresh.description;
            instance.size_bytes = fresh.size_bytes;
            instance.has_update = false;
            instance.broken = false;
            instance.save().await?;
            Ok(instance)
        }
        Err(error) => {
            operation.fail(&error.to_string());
            instance.broken = true;
            if let Err(save_error) = instance.save().await {
                err!("Couldn't mark instance {instance_id} broken: {save_error}");
            }
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_filesystem_safe() {
        assert_eq!(slug("All the Mods 9"), "all-the-mods-9");
        assert_eq!(slug("  Fabulously   Optimized!  "), "fabulously-optimized");
        assert_eq!(slug("простой"), "instance");
        assert_eq!(slug("Better MC [BMC4]"), "better-mc-bmc4");
        assert_eq!(slug("---"), "instance");
    }
}
