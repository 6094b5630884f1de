//! The Modrinth API: modpack search, version listings, and fetching a
//! version's `.mrpack` file.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use ember_core::download::{self, FetchOptions};
use ember_core::{
    info, IntoJsonError, Loader, RequestError, CLIENT, LAUNCHER_DIR, LAUNCHER_VERSION_NAME,
};

use crate::ModpackError;

const MODRINTH_API: &str = "https://api.modrinth.com/v2";
/// Modrinth asks clients to stay under 300 requests a minute; spacing
/// requests out a little keeps us nowhere near it.
const MIN_REQUEST_GAP: Duration = Duration::from_millis(250);

static RATE_LIMITER: LazyLock<tokio::sync::Mutex<Option<Instant>>> =
    LazyLock::new(|| tokio::sync::Mutex::new(None));

async fn rate_limited_get(url: &str) -> Result<String, ModpackError> {
    {
        let mut last = RATE_LIMITER.lock().await;
        if let Some(at) = *last {
            let since = at.elapsed();
            if since < MIN_REQUEST_GAP {
                tokio::time::sleep(MIN_REQUEST_GAP - since).await;
            }
        }
        *last = Some(Instant::now());
    }

    let response = CLIENT
        .get(url)
        .header(
            "User-Agent",
            format!("EmberLauncher/{LAUNCHER_VERSION_NAME}"),
        )
        .send()
        .await
        .map_err(RequestError::from)?;
    if !response.status().is_success() {
        return Err(RequestError::DownloadError {
            code: response.status(),
            url: url.to_owned(),
        }
        .into());
    }
    Ok(response.text().await.map_err(RequestError::from)?)
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub game_version: Option<String>,
    pub category: Option<String>,
    pub loader: Option<Loader>,
    pub limit: usize,
    /// One of `relevance`, `downloads`, `follows`, `newest`, `updated`.
    pub sort: Option<String>,
}

impl SearchQuery {
    /// The `facets` parameter: a JSON array of AND-ed OR-groups.
    #[must_use]
    pub fn facets(&self) -> String {
        let mut groups = vec![vec!["project_type:modpack".to_owned()]];
        if let Some(category) = &self.category {
            groups.push(vec![format!("categories:{category}")]);
        }
        if let Some(loader) = self.loader {
            groups.push(vec![format!("categories:{}", loader.to_modrinth_str())]);
        }
        if let Some(version) = &self.game_version {
            groups.push(vec![format!("versions:{version}")]);
        }
        serde_json::to_string(&groups).unwrap_or_else(|_| "[]".to_owned())
    }
}

#[derive(Deserialize, Debug)]
struct SearchResponse {
    hits: Vec<SearchHit>,
}

#[derive(Deserialize, Debug)]
struct SearchHit {
    project_id: String,
    slug: String,
    title: String,
    description: String,
    downloads: u64,
    #[serde(default)]
    icon_url: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
}

/// What the command boundary reports per search result.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ModpackSummary {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub downloads: u64,
    pub icon_url: Option<String>,
    pub categories: Vec<String>,
}

pub async fn search_modpacks(query: &SearchQuery) -> Result<Vec<ModpackSummary>, ModpackError> {
    let limit = if query.limit == 0 { 20 } else { query.limit.min(100) };
    let mut url = format!(
        "{MODRINTH_API}/search?limit={limit}&facets={}",
        urlencoding::encode(&query.facets())
    );
    if let Some(text) = &query.query {
        url.push_str(&format!("&query={}", urlencoding::encode(text)));
    }
    if let Some(sort) = &query.sort {
        url.push_str(&format!("&index={}", urlencoding::encode(sort)));
    }

    let text = rate_limited_get(&url).await?;
    let response: SearchResponse = serde_json::from_str(&text).json(text)?;
    Ok(response
        .hits
        .into_iter()
        .map(|hit| ModpackSummary {
            id: hit.project_id,
            slug: hit.slug,
            title: hit.title,
            description: hit.description,
            downloads: hit.downloads,
            icon_url: hit.icon_url,
            categories: hit.categories,
        })
        .collect())
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ModpackVersion {
    pub id: String,
    pub name: String,
    pub version_number: String,
    pub game_versions: Vec<String>,
    pub loaders: Vec<String>,
    pub date_published: String,
    pub files: Vec<ModpackVersionFile>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ModpackVersionFile {
    pub url: String,
    pub filename: String,
    pub primary: bool,
    pub size: u64,
    pub hashes: ModpackVersionHashes,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ModpackVersionHashes {
    pub sha1: String,
    #[serde(default)]
    pub sha512: Option<String>,
}

pub async fn get_modpack_versions(project_id: &str) -> Result<Vec<ModpackVersion>, ModpackError> {
    let url = format!("{MODRINTH_API}/project/{project_id}/version");
    let text = rate_limited_get(&url).await?;
    Ok(serde_json::from_str(&text).json(text)?)
}

/// Downloads the `.mrpack` of `version_id` (or the newest version when
/// `None`) into the cache, verified by hash, and returns its path.
pub async fn download_mrpack(
    project_id: &str,
    version_id: Option<&str>,
) -> Result<PathBuf, ModpackError> {
    let versions = get_modpack_versions(project_id).await?;
    let version = match version_id {
        Some(id) => versions.into_iter().find(|version| version.id == id),
        None => versions.into_iter().next(),
    }
    .ok_or_else(|| ModpackError::NoPackFile(project_id.to_owned()))?;

    let file = version
        .files
        .iter()
        .find(|file| file.primary)
        .or_else(|| {
            version
                .files
                .iter()
                .find(|file| file.filename.ends_with(".mrpack"))
        })
        .ok_or_else(|| ModpackError::NoPackFile(version.id.clone()))?;

    let dest = LAUNCHER_DIR.join("cache/mrpack").join(&file.filename);
    info!("Fetching modpack file {}", file.filename);
    download::fetch(
        &file.url,
        &dest,
        FetchOptions::default()
            .sha1(file.hashes.sha1.clone())
            .size(file.size)
            .large_file(),
    )
    .await?;
    Ok(dest)
}
