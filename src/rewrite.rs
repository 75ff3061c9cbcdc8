//! HTML reference rewriting.
//!
//! Rewrites a fetched page so it works from the mirror: internal links
//! point at the mirror's own files, and images point at the
//! content-addressed copies in the assets directory.
//!
//! # Strategy
//!
//! Textual, not structural. Tags and attributes are located with regular
//! expressions and only the matched URL substrings are replaced, so every
//! byte the rewriter does not touch comes out exactly as it went in:
//! whitespace, comments, malformed markup, inline scripts.
//!
//! Known limitation: the quoted-literal pass rewrites any quoted string
//! that ends in an image extension and matches an asset-map key, including
//! strings inside unrelated script or JSON data. It never rewrites a
//! literal that is not in the per-item asset map.
//!
//! # Passes
//!
//! | Pass | Matches | Resolved via |
//! |------|---------|--------------|
//! | tags | `a`/`area` `href` | asset map, then page links |
//! | | `form action`, `meta content="…; url=…"` | page links |
//! | | `img`/`source` `src`, any `srcset`, `data-*srcset` | asset map (each candidate) |
//! | | `src`, `poster`, `link href`, `data-*` | asset map |
//! | css | `url(…)` in style attributes and blocks | asset map |
//! | js | `window.location` / `location.href = "…"` | page links |
//! | literals | `"…/x.png"`, `'…'`, JSON `https:\/\/…` | asset map |
//!
//! Page links are only produced for URLs that belong to the site, are not
//! under a skipped prefix, and do not end in a configured file extension
//! (`.pdf`, `.php`) or an image extension. A dotted slug such as
//! `/release-1.2` is still a page.
//!
//! # Encodings
//!
//! Passes run over `&str`. A body that is not valid UTF-8 is carried in a
//! [`PageText`], which widens each byte to the char of the same value and
//! narrows it back after rewriting, so bytes in a Latin-1 or Windows-1252
//! page come out exactly as they went in.
//!
//! # Idempotence
//!
//! Every rewritten reference is relative (`./…`, `../…`, `assets/…`).
//! Relative references never qualify as site links, and their normalized
//! form (`/assets/{hash}.ext`) is never an asset-map key, so a second
//! rewrite leaves the document unchanged.
//!
//! The same traversal drives [`Rewriter::extract_image_refs`], so the set of
//! references copied into the assets directory is exactly the set the
//! rewrite pass will look up.

use crate::assets::extension_of;
use crate::config::LinksConfig;
use crate::paths::PathMapper;
use crate::site::{SiteUrl, split_suffix};
use crate::types::AssetRecord;
use regex::{Captures, Match, Regex};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([a-zA-Z][a-zA-Z0-9:-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#).unwrap()
});

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s"'<>/=]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#).unwrap()
});

static CSS_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^'")\s]+))\s*\)"#).unwrap()
});

static JS_LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:window\.location(?:\.href)?|location\.href)\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
    )
    .unwrap()
});

/// A fetched page body as text the passes can run over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    text: String,
    /// Each char stands for one byte of a non-UTF-8 body.
    widened: bool,
}

impl PageText {
    pub fn decode(body: Vec<u8>) -> Self {
        match String::from_utf8(body) {
            Ok(text) => Self {
                text,
                widened: false,
            },
            Err(e) => Self {
                text: e.into_bytes().into_iter().map(char::from).collect(),
                widened: true,
            },
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_utf8(&self) -> bool {
        !self.widened
    }

    /// Bytes to write. Widened chars narrow back to their byte; chars a
    /// rewrite introduced above U+00FF are written as UTF-8.
    pub fn into_bytes(self) -> Vec<u8> {
        if !self.widened {
            return self.text.into_bytes();
        }
        let mut out = Vec::with_capacity(self.text.len());
        for c in self.text.chars() {
            match u8::try_from(c) {
                Ok(b) => out.push(b),
                Err(_) => out.extend_from_slice(c.encode_utf8(&mut [0; 4]).as_bytes()),
            }
        }
        out
    }
}

/// Per-item map from normalized reference to stored asset file name.
#[derive(Debug, Clone, Default)]
pub struct AssetMap {
    entries: HashMap<String, String>,
}

impl AssetMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a copied asset under its normalized URL, with and without
    /// the query string.
    pub fn insert(&mut self, record: &AssetRecord) {
        let (path, _) = split_suffix(&record.normalized_url);
        self.entries
            .insert(path.to_string(), record.stored_name.clone());
        self.entries
            .insert(record.normalized_url.clone(), record.stored_name.clone());
    }

    pub fn get(&self, normalized: &str) -> Option<&str> {
        self.entries.get(normalized).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Context a reference was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefKind {
    /// `img`/`source` sources: always an image.
    Image,
    /// Other resource slots: an image only if the extension says so.
    Asset,
    /// `a`/`area` href: an image (lightbox) or a page.
    Anchor,
    /// Navigation targets: always a page.
    Link,
}

enum AttrRule {
    Single(RefKind),
    Srcset,
    MetaRefresh,
}

type Resolve<'r> = dyn FnMut(RefKind, &str) -> Option<String> + 'r;

/// Rewrites pages for one run. Shareable across worker threads.
#[derive(Debug, Clone)]
pub struct Rewriter {
    site: SiteUrl,
    mapper: PathMapper,
    assets_dir: String,
    extensions: Vec<String>,
    skip_prefixes: Vec<String>,
    file_extensions: Vec<String>,
    literal_re: Regex,
}

impl Rewriter {
    pub fn new(
        site: SiteUrl,
        mapper: PathMapper,
        assets_dir: &str,
        extensions: &[String],
        links: &LinksConfig,
    ) -> Result<Self, regex::Error> {
        let extensions: Vec<String> = extensions.iter().map(|e| e.to_ascii_lowercase()).collect();
        let alternation = extensions
            .iter()
            .map(|e| regex::escape(e))
            .collect::<Vec<_>>()
            .join("|");
        let literal_re = Regex::new(&format!(
            r#"(?i)"((?:[^"\\<>\s]|\\/)+\.(?:{alternation})(?:\?[^"\\<>\s]*)?)"|'((?:[^'\\<>\s]|\\/)+\.(?:{alternation})(?:\?[^'\\<>\s]*)?)'"#
        ))?;
        Ok(Self {
            site,
            mapper,
            assets_dir: assets_dir.to_string(),
            extensions,
            skip_prefixes: links.skip_prefixes.clone(),
            file_extensions: links
                .file_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            literal_re,
        })
    }

    /// Rewrite `html`, fetched from `page_url`, against the item's asset map.
    pub fn rewrite(&self, html: &str, page_url: &str, assets: &AssetMap) -> String {
        self.walk(html, &mut |kind, reference| match kind {
            RefKind::Image | RefKind::Asset => self.asset_target(reference, page_url, assets),
            RefKind::Anchor => self
                .asset_target(reference, page_url, assets)
                .or_else(|| self.link_target(reference, page_url)),
            RefKind::Link => self.link_target(reference, page_url),
        })
    }

    /// [`Rewriter::rewrite`] over a decoded page body, keeping its encoding.
    pub fn rewrite_page(&self, page: &PageText, page_url: &str, assets: &AssetMap) -> PageText {
        PageText {
            text: self.rewrite(page.as_str(), page_url, assets),
            widened: page.widened,
        }
    }

    /// Image references, deduplicated, in pass order (tag attributes first,
    /// then CSS `url()`, then quoted literals).
    ///
    /// `img`/`source` sources are returned whatever their extension, so the
    /// asset store can report disallowed ones; other contexts only yield
    /// references with an allowed extension.
    pub fn extract_image_refs(&self, html: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut refs = Vec::new();
        self.walk(html, &mut |kind, reference| {
            let wanted = match kind {
                RefKind::Image => !reference.starts_with("data:"),
                RefKind::Asset | RefKind::Anchor => self.is_allowed(reference),
                RefKind::Link => false,
            };
            if wanted && !reference.is_empty() && seen.insert(reference.to_string()) {
                refs.push(reference.to_string());
            }
            None
        });
        refs
    }

    fn is_allowed(&self, reference: &str) -> bool {
        extension_of(reference).is_some_and(|ext| self.extensions.contains(&ext))
    }

    fn asset_target(&self, reference: &str, page_url: &str, assets: &AssetMap) -> Option<String> {
        if reference.is_empty() {
            return None;
        }
        let key = self.site.normalize(reference);
        if let Some(name) = assets.get(&key) {
            return Some(self.mapper.asset_link(&self.assets_dir, name, page_url));
        }
        let (path, suffix) = split_suffix(&key);
        let name = assets.get(path)?;
        let fragment = suffix.find('#').map_or("", |i| &suffix[i..]);
        Some(format!(
            "{}{fragment}",
            self.mapper.asset_link(&self.assets_dir, name, page_url)
        ))
    }

    fn link_target(&self, reference: &str, page_url: &str) -> Option<String> {
        let site_path = self.site.site_path(reference)?;
        let (path, _) = split_suffix(&site_path);
        let skipped = self
            .skip_prefixes
            .iter()
            .any(|p| path.starts_with(p.as_str()) || path == p.trim_end_matches('/'));
        if skipped {
            return None;
        }
        let is_file = extension_of(path).is_some_and(|ext| {
            self.file_extensions.contains(&ext) || self.extensions.contains(&ext)
        });
        if is_file {
            return None;
        }
        Some(self.mapper.static_link(reference, page_url))
    }

    fn walk(&self, html: &str, resolve: &mut Resolve<'_>) -> String {
        let out = TAG_RE.replace_all(html, |caps: &Captures| self.rewrite_tag(caps, resolve));
        let out = CSS_URL_RE.replace_all(&out, |caps: &Captures| {
            splice_first(caps, &[1, 2, 3], |v| resolve(RefKind::Asset, v.trim()))
        });
        let out = JS_LOCATION_RE.replace_all(&out, |caps: &Captures| {
            splice_first(caps, &[1, 2], |v| resolve(RefKind::Link, v.trim()))
        });
        let out = self
            .literal_re
            .replace_all(&out, |caps: &Captures| rewrite_literal(caps, resolve));
        out.into_owned()
    }

    fn rewrite_tag(&self, caps: &Captures, resolve: &mut Resolve<'_>) -> String {
        let whole = &caps[0];
        let (Some(name), Some(attrs)) = (caps.get(1), caps.get(2)) else {
            return whole.to_string();
        };
        let tag = name.as_str().to_ascii_lowercase();
        let rewritten = ATTR_RE.replace_all(attrs.as_str(), |a: &Captures| {
            rewrite_attr(&tag, a, resolve)
        });
        format!("<{}{}>", name.as_str(), rewritten)
    }
}

fn attr_rule(tag: &str, attr: &str) -> Option<AttrRule> {
    let rule = match (tag, attr) {
        ("a" | "area", "href") => AttrRule::Single(RefKind::Anchor),
        ("form", "action") => AttrRule::Single(RefKind::Link),
        ("meta", "content") => AttrRule::MetaRefresh,
        ("link", "href") => AttrRule::Single(RefKind::Asset),
        (_, "srcset") => AttrRule::Srcset,
        (_, a) if a.starts_with("data-") && a.ends_with("srcset") => AttrRule::Srcset,
        ("img" | "source", "src") => AttrRule::Single(RefKind::Image),
        ("img", "data-src" | "data-lazy-src") => AttrRule::Single(RefKind::Image),
        (_, "src" | "poster") => AttrRule::Single(RefKind::Asset),
        (_, a) if a.starts_with("data-") => AttrRule::Single(RefKind::Asset),
        _ => return None,
    };
    Some(rule)
}

fn rewrite_attr(tag: &str, a: &Captures, resolve: &mut Resolve<'_>) -> String {
    let whole = &a[0];
    let attr = a[1].to_ascii_lowercase();
    let (Some(rule), Some(value)) = (
        attr_rule(tag, &attr),
        a.get(2).or_else(|| a.get(3)).or_else(|| a.get(4)),
    ) else {
        return whole.to_string();
    };
    let replacement = match rule {
        AttrRule::Single(kind) => resolve(kind, value.as_str().trim()),
        AttrRule::Srcset => rewrite_srcset(value.as_str(), resolve),
        AttrRule::MetaRefresh => rewrite_meta_refresh(value.as_str(), resolve),
    };
    match replacement {
        Some(new) => splice(a, value, &new),
        None => whole.to_string(),
    }
}

/// Rewrite each candidate URL of a `srcset`, keeping descriptors and spacing.
fn rewrite_srcset(value: &str, resolve: &mut Resolve<'_>) -> Option<String> {
    let mut changed = false;
    let parts: Vec<String> = value
        .split(',')
        .map(|part| {
            let lead = part.len() - part.trim_start().len();
            let body = &part[lead..];
            let end = body.find(char::is_whitespace).unwrap_or(body.len());
            let (url, rest) = body.split_at(end);
            if url.is_empty() {
                return part.to_string();
            }
            match resolve(RefKind::Image, url) {
                Some(new) => {
                    changed = true;
                    format!("{}{new}{rest}", &part[..lead])
                }
                None => part.to_string(),
            }
        })
        .collect();
    changed.then(|| parts.join(","))
}

/// `content="5; url=https://site/x/"`
fn rewrite_meta_refresh(value: &str, resolve: &mut Resolve<'_>) -> Option<String> {
    let start = value.to_ascii_lowercase().find("url=")? + 4;
    let tail = &value[start..];
    let unquoted = tail.trim_start_matches(['\'', '"', ' ']);
    let url_start = start + (tail.len() - unquoted.len());
    let url_len = unquoted.find(['\'', '"']).unwrap_or(unquoted.len());
    let url = unquoted[..url_len].trim_end();
    let new = resolve(RefKind::Link, url)?;
    Some(format!(
        "{}{new}{}",
        &value[..url_start],
        &value[url_start + url.len()..]
    ))
}

/// Quoted string literal ending in an image extension. JSON-escaped
/// slashes are unescaped for lookup and re-escaped in the replacement.
fn rewrite_literal(caps: &Captures, resolve: &mut Resolve<'_>) -> String {
    let Some(m) = caps.get(1).or_else(|| caps.get(2)) else {
        return caps[0].to_string();
    };
    let raw = m.as_str();
    let escaped = raw.contains("\\/");
    let url = if escaped {
        raw.replace("\\/", "/")
    } else {
        raw.to_string()
    };
    match resolve(RefKind::Asset, &url) {
        Some(new) if escaped => splice(caps, m, &new.replace('/', "\\/")),
        Some(new) => splice(caps, m, &new),
        None => caps[0].to_string(),
    }
}

/// Whole match with the span of `inner` replaced by `new`.
fn splice(caps: &Captures, inner: Match, new: &str) -> String {
    let Some(whole) = caps.get(0) else {
        return String::new();
    };
    let text = whole.as_str();
    let from = inner.start() - whole.start();
    let to = inner.end() - whole.start();
    format!("{}{new}{}", &text[..from], &text[to..])
}

fn splice_first(
    caps: &Captures,
    groups: &[usize],
    mut f: impl FnMut(&str) -> Option<String>,
) -> String {
    let Some(inner) = groups.iter().find_map(|&i| caps.get(i)) else {
        return caps[0].to_string();
    };
    match f(inner.as_str()) {
        Some(new) => splice(caps, inner, &new),
        None => caps[0].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::Layout;
    use std::path::PathBuf;

    const SITE: &str = "https://site.example";

    fn rewriter(layout: Layout) -> Rewriter {
        let site = SiteUrl::parse(SITE).unwrap();
        let mapper = PathMapper::new("/out", layout, site.clone());
        let exts: Vec<String> = ["jpg", "jpeg", "png", "gif", "webp", "svg"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let links = LinksConfig {
            skip_prefixes: vec!["/wp-admin/".to_string(), "/wp-login.php".to_string()],
            ..LinksConfig::default()
        };
        Rewriter::new(site, mapper, "assets", &exts, &links).unwrap()
    }

    fn record(normalized: &str, stored: &str) -> AssetRecord {
        AssetRecord {
            original_url: normalized.to_string(),
            normalized_url: normalized.to_string(),
            source_path: PathBuf::from("/www").join(normalized.trim_start_matches('/')),
            content_hash: stored.split('.').next().unwrap().to_string(),
            stored_name: stored.to_string(),
            already_existed: false,
        }
    }

    fn map(entries: &[(&str, &str)]) -> AssetMap {
        let mut m = AssetMap::new();
        for (url, stored) in entries {
            m.insert(&record(url, stored));
        }
        m
    }

    fn uploads() -> AssetMap {
        map(&[("/wp-content/uploads/x.png", "abc.png")])
    }

    // =========================================================================
    // Links
    // =========================================================================

    #[test]
    fn internal_anchor_rewritten_from_home() {
        let r = rewriter(Layout::Directory);
        let out = r.rewrite(
            r#"<a href="https://site.example/hello/">Hello</a>"#,
            "https://site.example/",
            &AssetMap::new(),
        );
        assert_eq!(out, r#"<a href="./hello/index.html">Hello</a>"#);
    }

    #[test]
    fn root_relative_anchor_from_nested_page() {
        let r = rewriter(Layout::Directory);
        let out = r.rewrite(
            r#"<a class="nav" href='/about/#team'>About</a>"#,
            "https://site.example/hello/",
            &AssetMap::new(),
        );
        assert_eq!(out, r#"<a class="nav" href='../about/index.html#team'>About</a>"#);
    }

    #[test]
    fn flat_layout_links() {
        let r = rewriter(Layout::Flat);
        let out = r.rewrite(
            r#"<a href="https://site.example/about/">"#,
            "https://site.example/hello/",
            &AssetMap::new(),
        );
        assert_eq!(out, r#"<a href="./about.html">"#);
    }

    #[test]
    fn non_site_links_untouched() {
        let r = rewriter(Layout::Directory);
        let html = concat!(
            r#"<a href="https://elsewhere.example/x/">x</a>"#,
            r#"<a href="mailto:me@site.example">m</a>"#,
            r##"<a href="#top">t</a>"##,
            r#"<a href="relative/page/">r</a>"#,
            r#"<a href="javascript:void(0)">j</a>"#,
        );
        assert_eq!(r.rewrite(html, "https://site.example/", &AssetMap::new()), html);
    }

    #[test]
    fn skipped_prefixes_and_files_untouched() {
        let r = rewriter(Layout::Directory);
        let html = concat!(
            r#"<a href="https://site.example/wp-admin/post.php">e</a>"#,
            r#"<a href="/wp-login.php?action=lostpassword">l</a>"#,
            r#"<a href="/files/report.pdf">p</a>"#,
        );
        assert_eq!(r.rewrite(html, "https://site.example/", &AssetMap::new()), html);
    }

    #[test]
    fn dotted_slug_is_a_page_not_a_file() {
        let r = rewriter(Layout::Directory);
        let out = r.rewrite(
            r#"<a href="https://site.example/release-1.2">1.2</a><a href="/v2.0/notes/">n</a>"#,
            "https://site.example/",
            &AssetMap::new(),
        );
        assert_eq!(
            out,
            r#"<a href="./release-1.2/index.html">1.2</a><a href="./v2.0/notes/index.html">n</a>"#
        );
    }

    #[test]
    fn unmapped_image_and_configured_file_links_untouched() {
        let site = SiteUrl::parse(SITE).unwrap();
        let mapper = PathMapper::new("/out", Layout::Directory, site.clone());
        let links = LinksConfig {
            skip_prefixes: Vec::new(),
            file_extensions: vec!["EPUB".to_string()],
        };
        let r = Rewriter::new(site, mapper, "assets", &["png".to_string()], &links).unwrap();
        let html = concat!(
            r#"<a href="/books/guide.epub">g</a>"#,
            r#"<a href="/wp-content/uploads/big.PNG">i</a>"#,
        );
        assert_eq!(r.rewrite(html, "/", &AssetMap::new()), html);
        // With no configured file types, a .pdf link is just another slug.
        assert_eq!(
            r.rewrite(r#"<a href="/report.pdf">"#, "/", &AssetMap::new()),
            r#"<a href="./report.pdf/index.html">"#
        );
    }

    #[test]
    fn unquoted_attribute_value() {
        let r = rewriter(Layout::Directory);
        let out = r.rewrite("<a href=/about/>", "/", &AssetMap::new());
        assert_eq!(out, "<a href=./about/index.html>");
    }

    #[test]
    fn form_action_meta_refresh_and_js_redirects() {
        let r = rewriter(Layout::Directory);
        let html = concat!(
            r#"<form method="get" action="https://site.example/search/">"#,
            r#"<meta http-equiv="refresh" content="0; URL='https://site.example/new/'">"#,
            r#"<script>window.location = "https://site.example/moved/"; location.href='/other/';</script>"#,
        );
        let out = r.rewrite(html, "https://site.example/", &AssetMap::new());
        assert!(out.contains(r#"action="./search/index.html""#), "{out}");
        assert!(out.contains(r#"content="0; URL='./new/index.html'""#), "{out}");
        assert!(out.contains(r#"window.location = "./moved/index.html""#), "{out}");
        assert!(out.contains(r#"location.href='./other/index.html'"#), "{out}");
    }

    #[test]
    fn meta_without_url_untouched() {
        let r = rewriter(Layout::Directory);
        let html = r#"<meta name="description" content="Photos of https://site.example/x/">"#;
        assert_eq!(r.rewrite(html, "/", &AssetMap::new()), html);
    }

    // =========================================================================
    // Assets
    // =========================================================================

    #[test]
    fn img_src_absolute_and_relative_hit_same_entry() {
        let r = rewriter(Layout::Directory);
        let html = concat!(
            r#"<img src="https://site.example/wp-content/uploads/x.png">"#,
            r#"<img src="/wp-content/uploads/x.png" alt="x">"#,
        );
        let out = r.rewrite(html, "https://site.example/", &uploads());
        assert_eq!(
            out,
            r#"<img src="assets/abc.png"><img src="assets/abc.png" alt="x">"#
        );
    }

    #[test]
    fn asset_links_climb_from_nested_pages() {
        let r = rewriter(Layout::Directory);
        let out = r.rewrite(
            r#"<img src="/wp-content/uploads/x.png">"#,
            "https://site.example/2024/hello/",
            &uploads(),
        );
        assert_eq!(out, r#"<img src="../../assets/abc.png">"#);
    }

    #[test]
    fn query_string_variants_resolve() {
        let r = rewriter(Layout::Directory);
        let out = r.rewrite(
            r#"<img src="/wp-content/uploads/x.png?ver=3">"#,
            "/",
            &uploads(),
        );
        assert_eq!(out, r#"<img src="assets/abc.png">"#);
    }

    #[test]
    fn srcset_candidates_rewritten_individually() {
        let r = rewriter(Layout::Directory);
        let assets = map(&[
            ("/wp-content/uploads/x.png", "abc.png"),
            ("/wp-content/uploads/x-300.png", "def.png"),
        ]);
        let html = r#"<img srcset="/wp-content/uploads/x-300.png 300w, https://site.example/wp-content/uploads/x.png 1024w, https://cdn.example/y.png 2x">"#;
        let out = r.rewrite(html, "/", &assets);
        assert_eq!(
            out,
            r#"<img srcset="assets/def.png 300w, assets/abc.png 1024w, https://cdn.example/y.png 2x">"#
        );
    }

    #[test]
    fn lazy_load_and_data_attributes() {
        let r = rewriter(Layout::Directory);
        let html = concat!(
            r#"<img data-src="/wp-content/uploads/x.png" data-lazy-src="/wp-content/uploads/x.png">"#,
            r#"<div data-bg="/wp-content/uploads/x.png" data-lazy-srcset="/wp-content/uploads/x.png 1x"></div>"#,
        );
        let out = r.rewrite(html, "/", &uploads());
        assert_eq!(out.matches("assets/abc.png").count(), 4, "{out}");
    }

    #[test]
    fn css_background_urls() {
        let r = rewriter(Layout::Directory);
        let html = concat!(
            r#"<div style="background-image: url('https://site.example/wp-content/uploads/x.png')"></div>"#,
            "<style>.hero{background:url(/wp-content/uploads/x.png) no-repeat}</style>",
        );
        let out = r.rewrite(html, "/", &uploads());
        assert!(out.contains("url('assets/abc.png')"), "{out}");
        assert!(out.contains("url(assets/abc.png) no-repeat"), "{out}");
    }

    #[test]
    fn json_literals_with_escaped_slashes() {
        let r = rewriter(Layout::Directory);
        let html = r#"<script>var g = {"full":"https:\/\/site.example\/wp-content\/uploads\/x.png","other":"https:\/\/cdn.example\/y.png"};</script>"#;
        let out = r.rewrite(html, "/", &uploads());
        assert!(out.contains(r#""full":"assets\/abc.png""#), "{out}");
        assert!(out.contains(r#""other":"https:\/\/cdn.example\/y.png""#), "{out}");
    }

    #[test]
    fn lightbox_anchor_to_image_uses_asset() {
        let r = rewriter(Layout::Directory);
        let out = r.rewrite(
            r#"<a href="https://site.example/wp-content/uploads/x.png"><img src="/wp-content/uploads/x.png"></a>"#,
            "/",
            &uploads(),
        );
        assert_eq!(
            out,
            r#"<a href="assets/abc.png"><img src="assets/abc.png"></a>"#
        );
    }

    #[test]
    fn unmapped_images_untouched() {
        let r = rewriter(Layout::Directory);
        let html = r#"<img src="https://site.example/wp-content/uploads/pic.bmp"><img src="/missing.png">"#;
        assert_eq!(r.rewrite(html, "/", &uploads()), html);
    }

    // =========================================================================
    // Fidelity and idempotence
    // =========================================================================

    #[test]
    fn untouched_markup_is_byte_identical() {
        let r = rewriter(Layout::Directory);
        let html = "<!DOCTYPE html>\n<html>\n  <!-- <a href=\"/x/\"> in a comment is still a tag -->\n<body class='home'  >\n\t<p>Plain   text &amp; entities</p>\n<br/></body></html>\n";
        let expected = html.replace("href=\"/x/\"", "href=\"./x/index.html\"");
        assert_eq!(r.rewrite(html, "/", &AssetMap::new()), expected);
    }

    #[test]
    fn latin1_body_bytes_survive_rewrite() {
        let r = rewriter(Layout::Directory);
        let body = b"<p>caf\xe9 \x93quoted\x94</p><a href=\"/about/\">\xc0 propos</a>".to_vec();
        let page = PageText::decode(body);
        assert!(!page.is_utf8());
        let out = r
            .rewrite_page(&page, "https://site.example/", &AssetMap::new())
            .into_bytes();
        assert_eq!(
            out,
            b"<p>caf\xe9 \x93quoted\x94</p><a href=\"./about/index.html\">\xc0 propos</a>".to_vec()
        );
    }

    #[test]
    fn utf8_body_round_trips_through_page_text() {
        let r = rewriter(Layout::Directory);
        let page = PageText::decode("<p>café</p><img src=\"/wp-content/uploads/x.png\">".into());
        assert!(page.is_utf8());
        let out = r.rewrite_page(&page, "/", &uploads()).into_bytes();
        assert_eq!(out, "<p>café</p><img src=\"assets/abc.png\">".as_bytes());
    }

    #[test]
    fn rewrite_is_idempotent() {
        let r = rewriter(Layout::Directory);
        let html = concat!(
            r#"<a href="https://site.example/hello/">h</a>"#,
            r#"<img src="https://site.example/wp-content/uploads/x.png" srcset="/wp-content/uploads/x.png 2x">"#,
            r#"<div style="background:url(/wp-content/uploads/x.png)"></div>"#,
            r#"<script>location.href="/about/"; var j = {"u":"\/wp-content\/uploads\/x.png"};</script>"#,
        );
        for page in ["https://site.example/", "https://site.example/a/b/"] {
            let once = r.rewrite(html, page, &uploads());
            let twice = r.rewrite(&once, page, &uploads());
            assert_eq!(once, twice);
            assert_ne!(once, html);
        }
    }

    // =========================================================================
    // Extraction
    // =========================================================================

    #[test]
    fn extract_collects_image_contexts_by_pass_without_duplicates() {
        let r = rewriter(Layout::Directory);
        let html = concat!(
            r#"<img src="https://site.example/wp-content/uploads/x.png">"#,
            r#"<img srcset="/a-300.jpg 300w, /a.jpg 1024w">"#,
            r#"<div style="background-image:url('/bg.webp')"></div>"#,
            r#"<img data-lazy-src="/lazy.gif">"#,
            r#"<img src="https://site.example/wp-content/uploads/x.png">"#,
            r#"<script>var s = "\/json\/pic.svg";</script>"#,
        );
        assert_eq!(
            r.extract_image_refs(html),
            vec![
                "https://site.example/wp-content/uploads/x.png",
                "/a-300.jpg",
                "/a.jpg",
                "/lazy.gif",
                "/bg.webp",
                "/json/pic.svg",
            ]
        );
    }

    #[test]
    fn extract_keeps_img_with_any_extension_but_filters_other_contexts() {
        let r = rewriter(Layout::Directory);
        let html = concat!(
            r#"<img src="/pic.bmp">"#,
            r#"<div data-file="/doc.bmp"></div>"#,
            r#"<script src="/app.js"></script>"#,
            r#"<link rel="stylesheet" href="/style.css">"#,
            r#"<link rel="icon" href="/favicon.png">"#,
            r#"<a href="/about/">a</a>"#,
            r#"<img src="data:image/png;base64,AAAA">"#,
        );
        assert_eq!(r.extract_image_refs(html), vec!["/pic.bmp", "/favicon.png"]);
    }
}
