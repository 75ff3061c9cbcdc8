//! Shared types passed between the content source, the generator and the
//! CLI output layer.
//!
//! Items are serialized to JSON by the `list` command and read back by
//! [`ManifestSource`](crate::source::ManifestSource), so field names here are
//! part of the manifest format.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Kind of publishable unit on the live site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Post,
    Page,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Post => "post",
            ItemKind::Page => "page",
        }
    }

    /// Collection name used by the REST API (`posts`, `pages`).
    pub fn rest_collection(self) -> &'static str {
        match self {
            ItemKind::Post => "posts",
            ItemKind::Page => "pages",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "post" | "posts" => Ok(ItemKind::Post),
            "page" | "pages" => Ok(ItemKind::Page),
            other => Err(format!("unknown item kind '{other}' (expected post or page)")),
        }
    }
}

/// One published post or page, as enumerated from the content source.
///
/// Read-only to the generator. `body` is carried when the source already has
/// the raw HTML; the generator still fetches the rendered page from `url` and
/// copies images referenced from either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub kind: ItemKind,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Result of copying one image reference into the assets directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    /// Reference exactly as it appeared in the source HTML.
    pub original_url: String,
    /// Site-root-relative form, always with a single leading slash.
    pub normalized_url: String,
    pub source_path: PathBuf,
    /// Lowercase hex SHA-256 of the file bytes.
    pub content_hash: String,
    /// `{content_hash}.{ext}`
    pub stored_name: String,
    /// True when a file with `stored_name` was already present.
    pub already_existed: bool,
}
