//! Archive extraction for downloaded JREs.

use std::path::{Path, PathBuf};

use ember_core::file_utils::{self, ZipExtractError};
use ember_core::{IntoIoError, IoError};

use crate::JavaError;

pub async fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<(), JavaError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    let result = tokio::task::spawn_blocking(move || -> Result<(), JavaError> {
        let file = std::fs::File::open(&archive).path(&archive)?;
        let decoder = flate2::read::GzDecoder::new(file);
        let mut tar = tar::Archive::new(decoder);
        tar.unpack(&dest).map_err(JavaError::TarGzExtract)?;
        Ok(())
    })
    .await;
    match result {
        Ok(result) => result,
        Err(err) => Err(JavaError::TarGzExtract(std::io::Error::other(
            err.to_string(),
        ))),
    }
}

pub async fn extract_zip(archive: &Path, dest: &Path) -> Result<(), ZipExtractError> {
    file_utils::extract_zip(archive, dest).await
}

/// JRE archives wrap everything in one top-level directory
/// (`jdk-17.0.11+9-jre/...`). Hoists that directory's contents so `bin/`
/// lives directly under `dir`.
pub async fn strip_top_level(dir: &Path) -> Result<(), IoError> {
    let mut entries = tokio::fs::read_dir(dir).await.path(dir)?;
    let mut children: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await.path(dir)? {
        children.push(entry.path());
    }

    let [top] = children.as_slice() else {
        // More than one entry: nothing to strip.
        return Ok(());
    };
    if !top.is_dir() {
        return Ok(());
    }

    let mut nested = tokio::fs::read_dir(top).await.path(top)?;
    while let Some(entry) = nested.next_entry().await.path(top)? {
        let target = dir.join(entry.file_name());
        tokio::fs::rename(entry.path(), &target)
            .await
            .path(target)?;
    }
    tokio::fs::remove_dir_all(top).await.path(top)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn strips_single_top_level_directory() {
        let dir = tempfile::tempdir().unwrap();
        let top = dir.path().join("jdk-17.0.11+9-jre");
        tokio::fs::create_dir_all(top.join("bin")).await.unwrap();
        tokio::fs::write(top.join("bin/java"), b"#!").await.unwrap();
        tokio::fs::write(top.join("release"), b"JAVA_VERSION=17")
            .await
            .unwrap();

        strip_top_level(dir.path()).await.unwrap();

        assert!(dir.path().join("bin/java").is_file());
        assert!(dir.path().join("release").is_file());
        assert!(!dir.path().join("jdk-17.0.11+9-jre").exists());
    }

    #[tokio::test]
    async fn leaves_flat_layout_alone() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("bin"))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("release"), b"x")
            .await
            .unwrap();

        strip_top_level(dir.path()).await.unwrap();

        assert!(dir.path().join("bin").is_dir());
        assert!(dir.path().join("release").is_file());
    }
}
