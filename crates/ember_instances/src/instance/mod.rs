//! The instance store: one JSON document per installed modpack.
//!
//! Documents live at `instances/<id>/instance.json` and are written
//! atomically. A document that fails to parse demotes its instance to
//! `broken` instead of aborting the scan; the directory plus the document
//! are the instance's entire state, so deleting both removes it fully.

pub mod list_versions;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ember_core::{
    err, file_utils, info, IntoIoError, IntoJsonError, IoError, JsonFileError, Loader,
    LAUNCHER_DIR,
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Modloader {
    pub kind: Loader,
    #[serde(default)]
    pub version: Option<String>,
}

impl Modloader {
    #[must_use]
    pub fn vanilla() -> Self {
        Self {
            kind: Loader::Vanilla,
            version: None,
        }
    }

    /// Id of the augmented version document this loader launches with,
    /// e.g. `1.21.1-fabric-0.16.5`. `None` for vanilla.
    #[must_use]
    pub fn version_doc_id(&self, minecraft_version: &str) -> Option<String> {
        if self.kind.is_vanilla() {
            return None;
        }
        let version = self.version.as_deref()?;
        Some(format!("{minecraft_version}-{}-{version}", self.kind))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    pub minecraft_version: String,
    pub modloader: Modloader,
    /// The game's working directory when this instance launches.
    pub directory: PathBuf,
    #[serde(default)]
    pub size_bytes: u64,
    pub date_added: DateTime<Utc>,
    #[serde(default)]
    pub last_played: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_play_time_minutes: u64,
    #[serde(default)]
    pub broken: bool,
    #[serde(default)]
    pub has_update: bool,
}

#[must_use]
pub fn instances_dir() -> PathBuf {
    LAUNCHER_DIR.join("instances")
}

impl Instance {
    #[must_use]
    pub fn dir(id: &str) -> PathBuf {
        instances_dir().join(id)
    }

    #[must_use]
    pub fn json_path(id: &str) -> PathBuf {
        Self::dir(id).join("instance.json")
    }

    /// A fresh record for a newly created instance directory.
    #[must_use]
    pub fn new(id: &str, name: &str, minecraft_version: &str, modloader: Modloader) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            description: String::new(),
            icon_url: None,
            minecraft_version: minecraft_version.to_owned(),
            modloader,
            directory: Self::dir(id),
            size_bytes: 0,
            date_added: Utc::now(),
            last_played: None,
            total_play_time_minutes: 0,
            broken: false,
            has_update: false,
        }
    }

    pub async fn load(id: &str) -> Result<Self, JsonFileError> {
        let path = Self::json_path(id);
        let text = tokio::fs::read_to_string(&path).await.path(path)?;
        Ok(serde_json::from_str(&text).json(text)?)
    }

    pub async fn save(&self) -> Result<(), JsonFileError> {
        let path = Self::json_path(&self.id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.path(parent)?;
        }
        let text = serde_json::to_string_pretty(self).json(String::new())?;
        file_utils::atomic_write(&path, text.as_bytes()).await?;
        Ok(())
    }

    /// Removes the instance directory and with it every trace of the
    /// instance. The shared asset store is untouched.
    pub async fn delete(id: &str) -> Result<(), IoError> {
        let dir = Self::dir(id);
        if !file_utils::exists(&dir).await {
            return Err(IoError::PathNotFound { path: dir });
        }
        tokio::fs::remove_dir_all(&dir).await.path(&dir)?;
        info!("Deleted instance {id}");
        Ok(())
    }

    pub async fn refresh_size(&mut self) {
        self.size_bytes = file_utils::dir_size(&self.directory).await;
    }

    /// Adds whole minutes of playtime and stamps `lastPlayed`. A
    /// non-positive delta is never applied; playtime only grows.
    pub async fn add_playtime(id: &str, minutes: i64) -> Result<(), JsonFileError> {
        let mut instance = Self::load(id).await?;
        instance.last_played = Some(Utc::now());
        if minutes > 0 {
            instance.total_play_time_minutes += minutes as u64;
        }
        instance.save().await
    }
}

/// Every instance on disk. Subdirectories whose `instance.json` is
/// missing or unreadable come back with `broken: true` so the UI can
/// offer repair or deletion, and one bad document never hides the rest.
pub async fn list_instances() -> Vec<Instance> {
    let dir = instances_dir();
    let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
        return Vec::new();
    };

    let mut instances = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().into_owned();
        match Instance::load(&id).await {
            Ok(instance) => instances.push(instance),
            Err(error) => {
                err!("Instance {id} has a broken document: {error}");
                let mut broken = Instance::new(&id, &id, "unknown", Modloader::vanilla());
                broken.broken = true;
                broken.directory = path;
                instances.push(broken);
            }
        }
    }
    instances.sort_by(|a, b| a.id.cmp(&b.id));
    instances
}
