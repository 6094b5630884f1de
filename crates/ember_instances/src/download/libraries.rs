//! Phases C and D: library artifacts and native extraction.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ember_core::constants::NATIVE_EXTENSIONS;
use ember_core::download::{self, FetchOptions};
use ember_core::event::LauncherEvent;
use ember_core::json::version::Library;
use ember_core::{do_jobs_with_limit, err, file_utils, pt, IntoIoError};

use super::{GameDownloadError, GameDownloader, DOWNLOAD_CONCURRENCY};

impl GameDownloader {
    /// Phase C: every library the rules admit on this OS, fetched to its
    /// manifest-relative path under `libraries/`. Old-style native
    /// classifier jars count as libraries too; natives are extracted from
    /// them in phase D.
    pub async fn ensure_libraries(&self) -> Result<(), GameDownloadError> {
        let admitted: Vec<&Library> = self
            .version_json
            .libraries
            .iter()
            .filter(|library| library.is_allowed())
            .collect();

        let total = admitted.len();
        let done = Mutex::new(0usize);

        do_jobs_with_limit(
            admitted.iter().map(|library| self.ensure_library(library, &done, total)),
            DOWNLOAD_CONCURRENCY,
        )
        .await?;

        Ok(())
    }

    async fn ensure_library(
        &self,
        library: &Library,
        done: &Mutex<usize>,
        total: usize,
    ) -> Result<(), GameDownloadError> {
        if let Some(artifact) = library.downloads.as_ref().and_then(|d| d.artifact.as_ref()) {
            // Loader-generated entries can have no URL at all; there is
            // nothing to fetch for those.
            if !artifact.url.is_empty() {
                let dest = self.libraries_dir.join(artifact.get_path());
                let mut options = FetchOptions::default();
                if let Some(sha1) = &artifact.sha1 {
                    options = options.sha1(sha1.clone());
                }
                if let Some(size) = artifact.size {
                    options = options.size(size);
                }
                download::fetch(&artifact.url, &dest, options).await?;
            }
        }

        if let Some(classifier) = library.native_classifier() {
            let dest = self.libraries_dir.join(classifier.get_path());
            let mut options = FetchOptions::default();
            if let Some(sha1) = &classifier.sha1 {
                options = options.sha1(sha1.clone());
            }
            if let Some(size) = classifier.size {
                options = options.size(size);
            }
            download::fetch(&classifier.url, &dest, options).await?;
        }

        let done = {
            let mut done = done.lock().unwrap();
            *done += 1;
            *done
        };
        self.bus.publish(LauncherEvent::LaunchProgress {
            task: "libraries".to_owned(),
            message: library
                .name
                .clone()
                .unwrap_or_else(|| "library".to_owned()),
            current: Some(done),
            total: Some(total),
        });
        Ok(())
    }

    /// Phase D: clears `versions/<id>/natives/` and refills it from every
    /// admitted library that carries natives for this OS. Entries are
    /// flattened; only shared-object files are kept.
    pub async fn extract_natives(&self) -> Result<(), GameDownloadError> {
        let natives_dir = self.natives_dir();
        file_utils::clean_dir(&natives_dir).await?;

        let mut native_jars: Vec<(PathBuf, Vec<String>)> = Vec::new();
        for library in &self.version_json.libraries {
            if !library.is_allowed() {
                continue;
            }
            let exclude = library
                .extract
                .as_ref()
                .and_then(|extract| extract.exclude.clone())
                .unwrap_or_default();

            if let Some(classifier) = library.native_classifier() {
                native_jars.push((self.libraries_dir.join(classifier.get_path()), exclude));
            } else if library.is_modern_native() {
                if let Some(artifact) =
                    library.downloads.as_ref().and_then(|d| d.artifact.as_ref())
                {
                    native_jars.push((self.libraries_dir.join(artifact.get_path()), exclude));
                }
            }
        }

        for (jar, exclude) in &native_jars {
            extract_native_jar(jar, &natives_dir, exclude)
                .await
                .map_err(|err| GameDownloadError::NativeExtraction(err.to_string()))?;
        }

        let extracted = file_utils::read_filenames_from_dir(&natives_dir)
            .await
            .map(|names| names.len())
            .unwrap_or(0);
        if extracted == 0 && !native_jars.is_empty() {
            err!(
                "Natives directory is empty after extracting {} jars",
                native_jars.len()
            );
        } else {
            pt!("Extracted {extracted} native files");
        }
        Ok(())
    }
}

/// Unpacks the shared-object entries of one natives jar, flattened into
/// `natives_dir`. Metadata entries (`META-INF/`, class files, manifests)
/// are discarded.
async fn extract_native_jar(
    jar: &Path,
    natives_dir: &Path,
    exclude: &[String],
) -> Result<(), GameDownloadError> {
    let jar = jar.to_path_buf();
    let natives_dir = natives_dir.to_path_buf();
    let exclude = exclude.to_vec();

    let result = tokio::task::spawn_blocking(move || -> Result<(), GameDownloadError> {
        let file = std::fs::File::open(&jar).path(&jar)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|err| GameDownloadError::NativeExtraction(err.to_string()))?;

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|err| GameDownloadError::NativeExtraction(err.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_owned();
            if exclude.iter().any(|prefix| name.starts_with(prefix.as_str())) {
                continue;
            }

            let Some(file_name) = name.rsplit('/').next() else {
                continue;
            };
            // Versioned sonames (libfoo.so.2) count as shared objects too.
            let keep = file_name
                .rsplit('.')
                .next()
                .is_some_and(|ext| NATIVE_EXTENSIONS.contains(&ext))
                || file_name.contains(".so.");
            if !keep {
                continue;
            }

            let target = natives_dir.join(file_name);
            let mut out = std::fs::File::create(&target).path(&target)?;
            std::io::copy(&mut entry, &mut out).path(&target)?;
        }
        Ok(())
    })
    .await;

    match result {
        Ok(result) => result,
        Err(err) => Err(GameDownloadError::NativeExtraction(err.to_string())),
    }
}
