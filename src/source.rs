//! Content sources: where the list of published items comes from.
//!
//! The generator only needs two things from the site's content store: the
//! full list of published posts and pages, and a way to look a single item
//! up by id. [`ContentSource`] is that boundary. Two implementations ship:
//!
//! - [`ManifestSource`]: a JSON file, e.g. exported by `site-mirror list`
//!   or by a site plugin. Entries with a `status` other than `publish` are
//!   skipped.
//! - [`WpRestSource`]: the WordPress REST API (`/wp-json/wp/v2/posts` and
//!   `/pages`), paginated through the same [`Fetcher`] used for pages.
//!   Anonymous requests only ever see published content. Titles arrive
//!   HTML-escaped (`&#8217;`, `&amp;`) and are decoded to plain text.
//!
//! Sources are responsible for excluding drafts; the generator never
//! filters items itself.

use crate::fetch::{FetchError, Fetcher};
use crate::site::SiteUrl;
use crate::types::{ContentItem, ItemKind};
use html_escape::decode_html_entities;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid item manifest {}: {source}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("content API request failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("unexpected content API response from {url}: {message}")]
    Api { url: String, message: String },
    #[error("no published {kind} with id {id}")]
    NotFound { id: String, kind: ItemKind },
}

pub trait ContentSource: Sync {
    /// Every published post and page. Called once per run; the result is
    /// frozen for the rest of the run.
    fn list_published_items(&self) -> Result<Vec<ContentItem>, SourceError>;

    /// Look up one published item.
    fn find_item(&self, id: &str, kind: ItemKind) -> Result<ContentItem, SourceError> {
        self.list_published_items()?
            .into_iter()
            .find(|item| item.id == id && item.kind == kind)
            .ok_or_else(|| SourceError::NotFound {
                id: id.to_string(),
                kind,
            })
    }

    fn permalink(&self, id: &str, kind: ItemKind) -> Result<String, SourceError> {
        Ok(self.find_item(id, kind)?.url)
    }
}

// ============================================================================
// JSON manifest
// ============================================================================

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    id: serde_json::Value,
    kind: ItemKind,
    title: String,
    url: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Items read from a JSON array on disk.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    path: PathBuf,
}

impl ManifestSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContentSource for ManifestSource {
    fn list_published_items(&self) -> Result<Vec<ContentItem>, SourceError> {
        let content = fs::read_to_string(&self.path).map_err(|source| SourceError::Io {
            path: self.path.clone(),
            source,
        })?;
        let entries: Vec<ManifestEntry> =
            serde_json::from_str(&content).map_err(|source| SourceError::Manifest {
                path: self.path.clone(),
                source,
            })?;
        Ok(entries
            .into_iter()
            .filter(|e| e.status.as_deref().is_none_or(|s| s == "publish"))
            .map(|e| ContentItem {
                id: id_string(&e.id),
                kind: e.kind,
                title: e.title,
                url: e.url,
                body: e.body,
            })
            .collect())
    }
}

fn id_string(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// WordPress REST API
// ============================================================================

const PER_PAGE: usize = 100;
const REST_FIELDS: &str = "id,link,title,status";

#[derive(Debug, Deserialize)]
struct RestItem {
    id: serde_json::Value,
    link: String,
    #[serde(default)]
    title: RestTitle,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RestTitle {
    #[serde(default)]
    rendered: String,
}

/// Published posts and pages from `{site}/wp-json/wp/v2/`.
pub struct WpRestSource<'a, F: Fetcher> {
    site: SiteUrl,
    fetcher: &'a F,
}

impl<'a, F: Fetcher> WpRestSource<'a, F> {
    pub fn new(site: SiteUrl, fetcher: &'a F) -> Self {
        Self { site, fetcher }
    }

    fn collection_url(&self, kind: ItemKind) -> String {
        format!("{}/wp-json/wp/v2/{}", self.site.root(), kind.rest_collection())
    }

    fn list_kind(&self, kind: ItemKind) -> Result<Vec<ContentItem>, SourceError> {
        let mut items = Vec::new();
        for page in 1.. {
            let url = format!(
                "{}?per_page={PER_PAGE}&page={page}&_fields={REST_FIELDS}",
                self.collection_url(kind)
            );
            let batch: Vec<RestItem> = match self.fetcher.fetch(&url) {
                Ok(bytes) => parse_json(&url, &bytes)?,
                // Past the last page WordPress answers 400 rest_post_invalid_page_number.
                Err(FetchError::Status { status: 400, .. }) if page > 1 => break,
                Err(e) => return Err(e.into()),
            };
            let count = batch.len();
            items.extend(batch.into_iter().filter_map(|r| to_item(r, kind)));
            tracing::debug!(kind = %kind, page, count, "fetched content listing page");
            if count < PER_PAGE {
                break;
            }
        }
        Ok(items)
    }
}

impl<F: Fetcher> ContentSource for WpRestSource<'_, F> {
    fn list_published_items(&self) -> Result<Vec<ContentItem>, SourceError> {
        let mut items = self.list_kind(ItemKind::Post)?;
        items.extend(self.list_kind(ItemKind::Page)?);
        Ok(items)
    }

    fn find_item(&self, id: &str, kind: ItemKind) -> Result<ContentItem, SourceError> {
        let not_found = || SourceError::NotFound {
            id: id.to_string(),
            kind,
        };
        let url = format!("{}/{id}?_fields={REST_FIELDS}", self.collection_url(kind));
        let item: RestItem = match self.fetcher.fetch(&url) {
            Ok(bytes) => parse_json(&url, &bytes)?,
            Err(FetchError::Status {
                status: 401 | 403 | 404,
                ..
            }) => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        to_item(item, kind).ok_or_else(not_found)
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(url: &str, bytes: &[u8]) -> Result<T, SourceError> {
    serde_json::from_slice(bytes).map_err(|e| SourceError::Api {
        url: url.to_string(),
        message: e.to_string(),
    })
}

fn to_item(raw: RestItem, kind: ItemKind) -> Option<ContentItem> {
    if raw.status.as_deref().is_some_and(|s| s != "publish") {
        return None;
    }
    Some(ContentItem {
        id: id_string(&raw.id),
        kind,
        title: decode_html_entities(raw.title.rendered.trim()).into_owned(),
        url: raw.link,
        body: None,
    })
}
