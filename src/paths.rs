//! URL → static file path mapping.
//!
//! Every live URL maps to exactly one file under the output root. The
//! mapping is a pure function of the URL's path component and the
//! configured [`Layout`]:
//!
//! | URL path | `directory` layout | `flat` layout |
//! |----------|--------------------|---------------|
//! | `/` or empty | `index.html` | `index.html` |
//! | `/hello/` | `hello/index.html` | `hello.html` |
//! | `/a/b` | `a/b/index.html` | `a/b.html` |
//! | `/legacy.html` | `legacy.html` | `legacy.html` |
//!
//! Query strings and fragments never influence the file path, but links
//! produced by [`PathMapper::static_link`] carry them through so anchors
//! keep working.
//!
//! `.` and `..` segments are dropped, so no URL can address a file outside
//! the output root. Segments are percent-decoded for the on-disk name when
//! they decode to clean UTF-8; anything else (malformed escapes, encoded
//! slashes) is used verbatim.
//!
//! Links are relative to the page that contains them (`./` at the root,
//! `../` per level below it), which keeps the mirror portable across hosts
//! and usable straight from `file://`.

use crate::site::{SiteUrl, split_suffix};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File layout for non-root items, chosen once per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// `slug/index.html`
    #[default]
    Directory,
    /// `slug.html`
    Flat,
}

#[derive(Debug, Clone)]
pub struct PathMapper {
    output_root: PathBuf,
    layout: Layout,
    site: SiteUrl,
}

impl PathMapper {
    pub fn new(output_root: impl Into<PathBuf>, layout: Layout, site: SiteUrl) -> Self {
        Self {
            output_root: output_root.into(),
            layout,
            site,
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Output path relative to the root, `/`-separated and still
    /// percent-encoded (the form used inside links).
    pub fn relative_target(&self, url: &str) -> String {
        let segments = self.segments(url);
        let Some((last, parents)) = segments.split_last() else {
            return "index.html".to_string();
        };
        if last.ends_with(".html") {
            return segments.join("/");
        }
        match self.layout {
            Layout::Directory => format!("{}/index.html", segments.join("/")),
            Layout::Flat if parents.is_empty() => format!("{last}.html"),
            Layout::Flat => format!("{}/{last}.html", parents.join("/")),
        }
    }

    /// Absolute on-disk path for the page at `url`.
    pub fn static_file_path(&self, url: &str) -> PathBuf {
        let target = self.relative_target(url);
        let mut path = self.output_root.clone();
        for segment in target.split('/') {
            path.push(decode_segment(segment));
        }
        path
    }

    /// Link from the page at `from_page_url` to the page at `target_url`,
    /// keeping the target's query and fragment.
    pub fn static_link(&self, target_url: &str, from_page_url: &str) -> String {
        let suffix = self
            .site
            .site_path(target_url)
            .map(|p| split_suffix(&p).1.to_string())
            .unwrap_or_default();
        format!(
            "{}{}{}",
            self.link_prefix(from_page_url),
            self.relative_target(target_url),
            suffix
        )
    }

    /// Reference from the page at `from_page_url` to a stored asset.
    pub fn asset_link(&self, assets_dir: &str, stored_name: &str, from_page_url: &str) -> String {
        let depth = self.depth(from_page_url);
        format!("{}{assets_dir}/{stored_name}", "../".repeat(depth))
    }

    /// Number of directories between the output root and the page's file.
    pub fn depth(&self, page_url: &str) -> usize {
        self.relative_target(page_url).matches('/').count()
    }

    fn link_prefix(&self, from_page_url: &str) -> String {
        match self.depth(from_page_url) {
            0 => "./".to_string(),
            n => "../".repeat(n),
        }
    }

    /// Clean path segments of a URL: no empties, no `.` or `..`.
    fn segments(&self, url: &str) -> Vec<String> {
        let path = match self.site.site_path(url) {
            Some(p) => p,
            None => raw_path(url).to_string(),
        };
        let (path, _) = split_suffix(&path);
        path.split('/')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .map(str::to_string)
            .collect()
    }
}

/// Path component of a reference the site does not own.
fn raw_path(url: &str) -> &str {
    let trimmed = url.trim();
    let after_scheme = match trimmed.find("://") {
        Some(i) => &trimmed[i + 3..],
        None if trimmed.starts_with("//") => &trimmed[2..],
        None => return trimmed,
    };
    match after_scheme.find(['/', '?', '#']) {
        Some(i) => &after_scheme[i..],
        None => "",
    }
}

fn decode_segment(segment: &str) -> String {
    match percent_decode_str(segment).decode_utf8() {
        Ok(decoded)
            if !decoded.contains(['/', '\\', '\0'])
                && decoded != "."
                && decoded != ".." =>
        {
            decoded.into_owned()
        }
        _ => segment.to_string(),
    }
}
