//! Phases E and F: the asset index and the content-addressed asset store.

use std::sync::Mutex;

use ember_core::cache::object_path;
use ember_core::download::{self, verify_file, FetchOptions};
use ember_core::json::{AssetIndexMap, AssetObject};
use ember_core::operation::OperationKind;
use ember_core::{do_jobs_with_limit, err, info, IntoIoError, IntoJsonError};

use super::{GameDownloadError, GameDownloader, DOWNLOAD_CONCURRENCY};

const RESOURCES_URL: &str = "https://resources.download.minecraft.net";

/// The asset CDN base. `EMBER_RESOURCES_URL` switches it out for a
/// mirror (or a local server in tests).
fn resources_url() -> String {
    std::env::var("EMBER_RESOURCES_URL").unwrap_or_else(|_| RESOURCES_URL.to_owned())
}

/// A launch tolerates up to this fraction of assets failing to fetch.
/// Missing sounds are an annoyance; a missing client jar is fatal.
const ASSET_FAILURE_TOLERANCE: f64 = 0.01;

impl GameDownloader {
    /// Phase E: `assets/indexes/<indexId>.json`, fetched from the version
    /// document's reference when absent or corrupt.
    pub async fn ensure_asset_index(&self) -> Result<AssetIndexMap, GameDownloadError> {
        let index_ref = &self.version_json.assetIndex;
        let path = self
            .assets_dir
            .join("indexes")
            .join(format!("{}.json", index_ref.id));

        download::fetch(
            &index_ref.url,
            &path,
            FetchOptions::default()
                .sha1(index_ref.sha1.clone())
                .size(index_ref.size),
        )
        .await?;

        let text = tokio::fs::read_to_string(&path).await.path(&path)?;
        Ok(serde_json::from_str(&text).json(text)?)
    }

    /// Phase F: walks the asset index, hashes every present object, and
    /// re-downloads what is missing or corrupt with bounded concurrency.
    ///
    /// Publishes an asset-check operation whose `total` is the asset count
    /// and whose `current` counts validated plus downloaded entries.
    pub async fn ensure_assets(&self, index: &AssetIndexMap) -> Result<(), GameDownloadError> {
        let objects_dir = self.assets_dir.join("objects");
        let total = index.objects.len();
        let operation = self.operations.begin(OperationKind::AssetCheck);
        operation.stage("validate");
        operation.update(0, total, Some("Validating assets".to_owned()));

        let progress = Mutex::new((0usize, 0usize)); // (checked, failed)

        let result = do_jobs_with_limit(
            index.objects.values().map(|object| {
                self.ensure_asset(object, &objects_dir, &operation, &progress, total)
            }),
            DOWNLOAD_CONCURRENCY,
        )
        .await;

        if operation.is_cancelled() {
            operation.cancel();
            return Err(GameDownloadError::Cancelled);
        }
        result?;

        let (_, failed) = *progress.lock().unwrap();
        if failed > 0 {
            let tolerated = (total as f64 * ASSET_FAILURE_TOLERANCE).floor() as usize;
            if failed > tolerated.max(1) {
                operation.fail(&format!("{failed} of {total} assets unavailable"));
                return Err(GameDownloadError::AssetsIncomplete { failed, total });
            }
            err!("{failed} of {total} assets unavailable, continuing without them");
        }

        operation.complete();
        info!("Assets complete ({total} objects)");
        Ok(())
    }

    async fn ensure_asset(
        &self,
        object: &AssetObject,
        objects_dir: &std::path::Path,
        operation: &ember_core::operation::OperationHandle,
        progress: &Mutex<(usize, usize)>,
        total: usize,
    ) -> Result<(), GameDownloadError> {
        if operation.is_cancelled() {
            return Ok(());
        }

        let path = object_path(objects_dir, &object.hash);
        let mut ok = verify_file(&path, &object.hash, Some(object.size)).await;
        if !ok {
            // Missing or corrupt: a mismatched object is treated as absent.
            let prefix = object.hash.get(..2).unwrap_or(&object.hash);
            let url = format!("{}/{prefix}/{}", resources_url(), object.hash);
            ok = download::fetch(
                &url,
                &path,
                FetchOptions::default()
                    .sha1(object.hash.clone())
                    .size(object.size),
            )
            .await
            .is_ok();
        }

        let checked = {
            let mut progress = progress.lock().unwrap();
            progress.0 += 1;
            if !ok {
                progress.1 += 1;
            }
            progress.0
        };
        if checked % 50 == 0 || checked == total {
            operation.update(checked, total, None);
        }
        Ok(())
    }
}
