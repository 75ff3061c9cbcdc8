//! Shared test utilities for the site-mirror test suite.
//!
//! Provides an in-memory [`MockFetcher`], a [`StaticSource`] for item lists,
//! a [`SiteFixture`] that lays out a fake document root next to an output
//! directory, and lookup helpers that panic with a clear message on miss.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let site = SiteFixture::new();
//! site.write("wp-content/uploads/x.png", b"png");
//! let fetcher = MockFetcher::new()
//!     .with_page("https://site.example/", "<a href=\"/hello/\">");
//! let summary = Generator::new(&site.config(), &fetcher, &source)?.run(None, &cancel)?;
//! let failure = find_failure(&summary, "3");
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

use crate::config::MirrorConfig;
use crate::fetch::{FetchError, Fetcher};
use crate::generate::{ItemFailure, RunSummary};
use crate::source::{ContentSource, SourceError};
use crate::types::{ContentItem, ItemKind};

pub const SITE: &str = "https://site.example";

// =========================================================================
// Fetcher
// =========================================================================

/// Fetcher answering from a fixed URL → response table. Unknown URLs get a
/// 404. Every call is recorded. Uses Mutex so it is Sync for rayon.
#[derive(Default)]
pub struct MockFetcher {
    responses: HashMap<String, Result<Vec<u8>, FetchError>>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.with_bytes(url, body.as_bytes())
    }

    pub fn with_bytes(mut self, url: &str, body: &[u8]) -> Self {
        self.responses.insert(url.to_string(), Ok(body.to_vec()));
        self
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.responses.insert(
            url.to_string(),
            Err(FetchError::Status {
                url: url.to_string(),
                status,
            }),
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.responses.get(url).cloned().unwrap_or_else(|| {
            Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        })
    }
}

// =========================================================================
// Content source
// =========================================================================

/// Content source over a fixed item list.
pub struct StaticSource {
    pub items: Vec<ContentItem>,
}

impl ContentSource for StaticSource {
    fn list_published_items(&self) -> Result<Vec<ContentItem>, SourceError> {
        Ok(self.items.clone())
    }
}

pub fn item(id: &str, kind: ItemKind, title: &str, url: &str) -> ContentItem {
    ContentItem {
        id: id.to_string(),
        kind,
        title: title.to_string(),
        url: url.to_string(),
        body: None,
    }
}

// =========================================================================
// Filesystem fixture
// =========================================================================

/// Temp directory holding `www/` (the live document root) and `static/`
/// (the output root).
pub struct SiteFixture {
    tmp: TempDir,
}

impl SiteFixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("www")).unwrap();
        Self { tmp }
    }

    pub fn site_root(&self) -> PathBuf {
        self.tmp.path().join("www")
    }

    pub fn output(&self) -> PathBuf {
        self.tmp.path().join("static")
    }

    /// Write a file under the document root, creating parents.
    pub fn write(&self, rel: &str, bytes: &[u8]) -> PathBuf {
        let path = self.site_root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, bytes).unwrap();
        path
    }

    pub fn config(&self) -> MirrorConfig {
        MirrorConfig {
            site_url: SITE.to_string(),
            site_root: self.site_root(),
            output_dir: self.output(),
            write_htaccess: false,
            ..MirrorConfig::default()
        }
    }

    pub fn read_output(&self, rel: &str) -> String {
        let path = self.output().join(rel);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()))
    }

    pub fn read_output_bytes(&self, rel: &str) -> Vec<u8> {
        let path = self.output().join(rel);
        fs::read(&path).unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()))
    }

    /// Stored asset file names, sorted.
    pub fn stored_assets(&self) -> Vec<String> {
        list_names(&self.output().join("assets"))
    }
}

pub fn list_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap_or_else(|e| panic!("cannot list {}: {e}", dir.display()))
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// =========================================================================
// Summary lookups: panic with a clear message on miss
// =========================================================================

/// Find the failure recorded for an item id. Panics if not found.
pub fn find_failure<'a>(summary: &'a RunSummary, id: &str) -> &'a ItemFailure {
    summary
        .failures
        .iter()
        .find(|f| f.item.id == id)
        .unwrap_or_else(|| {
            let ids: Vec<&str> = summary.failures.iter().map(|f| f.item.id.as_str()).collect();
            panic!("no failure for item '{id}'. Failed: {ids:?}")
        })
}
