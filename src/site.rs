//! The live site's base URL and every "does this URL belong to us" decision.
//!
//! Path mapping, asset resolution and HTML rewriting all ask the same
//! questions of a reference found in a page: is it ours, and if so what is
//! its site-root-relative path? Answering them in one place keeps the three
//! in agreement, so an `<a href>` and an `<img src>` pointing at the same
//! URL always normalize the same way.
//!
//! ## Reference shapes
//!
//! | Shape | Example | `site_path` |
//! |-------|---------|-------------|
//! | absolute, same host | `https://site/a/?x=1` | `Some("/a/?x=1")` |
//! | absolute, other host | `https://cdn.example/a.png` | `None` |
//! | protocol-relative | `//site/a.png` | same rules as absolute |
//! | root-relative | `/a/b` | `Some("/a/b")` |
//! | relative | `a.png`, `./a`, `../a` | `None` |
//! | fragment / empty | `#top` | `None` |
//! | other scheme | `mailto:`, `data:`, `javascript:` | `None` |
//!
//! Host comparison ignores the scheme, so `http://site/x` and
//! `https://site/x` are the same resource. When the site lives under a base
//! path (`https://host/blog`), only URLs under that path belong to it and
//! the base path is stripped from the result.
//!
//! Paths are sliced from the reference text rather than re-serialized
//! through a URL parser, so percent-encoding (valid or not) is preserved.

use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SiteUrlError {
    #[error("invalid site URL '{0}': {1}")]
    Parse(String, String),
    #[error("site URL '{0}' must use http or https")]
    Scheme(String),
    #[error("site URL '{0}' has no host")]
    NoHost(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RefShape<'a> {
    /// `scheme://authority` with the remainder (path, query, fragment).
    Absolute { authority: &'a str, rest: &'a str },
    Rooted(&'a str),
    Relative(&'a str),
    Fragment,
    OtherScheme,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteUrl {
    scheme: String,
    host: String,
    port: Option<u16>,
    /// Base path without trailing slash, `""` for a site at the host root.
    base_path: String,
}

impl SiteUrl {
    pub fn parse(base: &str) -> Result<Self, SiteUrlError> {
        let trimmed = base.trim();
        let url = Url::parse(trimmed)
            .map_err(|e| SiteUrlError::Parse(trimmed.to_string(), e.to_string()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SiteUrlError::Scheme(trimmed.to_string()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| SiteUrlError::NoHost(trimmed.to_string()))?
            .to_ascii_lowercase();
        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            port: url.port(),
            base_path: url.path().trim_end_matches('/').to_string(),
        })
    }

    /// `scheme://host[:port][/base]` without a trailing slash.
    pub fn root(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}{}", self.scheme, self.host, port, self.base_path),
            None => format!("{}://{}{}", self.scheme, self.host, self.base_path),
        }
    }

    /// The site's home page URL (root with a trailing slash).
    pub fn home_url(&self) -> String {
        format!("{}/", self.root())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// True for references that point off-site: other hosts, other schemes,
    /// or same-host URLs outside the site's base path. Relative references
    /// are never external.
    pub fn is_external(&self, reference: &str) -> bool {
        match shape(reference) {
            RefShape::Absolute { .. } => self.site_path(reference).is_none(),
            RefShape::OtherScheme => true,
            RefShape::Rooted(_) | RefShape::Relative(_) | RefShape::Fragment => false,
        }
    }

    /// Site-root-relative path (with query and fragment) for references that
    /// belong to this site, always with exactly one leading slash.
    pub fn site_path(&self, reference: &str) -> Option<String> {
        match shape(reference) {
            RefShape::Absolute { authority, rest } => {
                if !self.same_host(authority) {
                    return None;
                }
                self.strip_base(rest)
            }
            RefShape::Rooted(path) => self.strip_base(path),
            _ => None,
        }
    }

    /// Lookup key for a reference: the site path when it belongs to the
    /// site, `/`-anchored text for plain relative references, and the
    /// reference unchanged otherwise.
    pub fn normalize(&self, reference: &str) -> String {
        if let Some(path) = self.site_path(reference) {
            return path;
        }
        match shape(reference) {
            RefShape::Relative(rel) => {
                let mut rel = rel;
                while let Some(stripped) = rel.strip_prefix("./") {
                    rel = stripped;
                }
                format!("/{}", rel.trim_start_matches('/'))
            }
            _ => reference.trim().to_string(),
        }
    }

    /// Anchor a reference at the site root. Absolute references come back
    /// unchanged; protocol-relative ones get the site's scheme.
    pub fn absolutize(&self, reference: &str) -> String {
        let trimmed = reference.trim();
        match shape(trimmed) {
            RefShape::Absolute { .. } if trimmed.starts_with("//") => {
                format!("{}:{}", self.scheme, trimmed)
            }
            RefShape::Absolute { .. } | RefShape::OtherScheme => trimmed.to_string(),
            RefShape::Rooted(path) => match self.strip_base(path) {
                Some(site_path) => format!("{}{}", self.root(), site_path),
                None => format!("{}{}", self.origin(), path),
            },
            RefShape::Relative(_) | RefShape::Fragment => {
                format!("{}{}", self.root(), self.normalize(trimmed))
            }
        }
    }

    fn origin(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.scheme, self.host, port),
            None => format!("{}://{}", self.scheme, self.host),
        }
    }

    fn same_host(&self, authority: &str) -> bool {
        let host_port = authority.rsplit('@').next().unwrap_or(authority);
        let (host, port) = split_port(host_port);
        if !host.eq_ignore_ascii_case(&self.host) {
            return false;
        }
        match (port, self.port) {
            (None, None) => true,
            (Some(p), Some(q)) => p == q,
            // An explicit default port equals an implicit one.
            (Some(p), None) => p == 80 || p == 443,
            (None, Some(q)) => q == 80 || q == 443,
        }
    }

    /// Remove the base path from a `/`-rooted (or empty) remainder.
    fn strip_base(&self, rest: &str) -> Option<String> {
        let rest = if rest.is_empty() || rest.starts_with('?') || rest.starts_with('#') {
            format!("/{rest}")
        } else {
            rest.to_string()
        };
        let stripped = if self.base_path.is_empty() {
            rest.as_str()
        } else {
            let tail = rest.strip_prefix(self.base_path.as_str())?;
            if !(tail.is_empty()
                || tail.starts_with('/')
                || tail.starts_with('?')
                || tail.starts_with('#'))
            {
                return None;
            }
            tail
        };
        let body = stripped.trim_start_matches('/');
        Some(format!("/{body}"))
    }
}

fn split_port(host_port: &str) -> (&str, Option<u16>) {
    // IPv6 literals keep their brackets; the port follows `]:`.
    if let Some(end) = host_port.rfind(']') {
        let (host, tail) = host_port.split_at(end + 1);
        return (host, tail.strip_prefix(':').and_then(|p| p.parse().ok()));
    }
    match host_port.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().ok()),
        None => (host_port, None),
    }
}

/// Length of a leading `scheme:` prefix, if the reference has one.
fn scheme_len(reference: &str) -> Option<usize> {
    let colon = reference.find(':')?;
    let scheme = &reference[..colon];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
    {
        Some(colon)
    } else {
        None
    }
}

fn shape(reference: &str) -> RefShape<'_> {
    let r = reference.trim();
    if r.is_empty() || r.starts_with('#') {
        return RefShape::Fragment;
    }
    if let Some(after) = r.strip_prefix("//") {
        let (authority, rest) = split_authority(after);
        return RefShape::Absolute { authority, rest };
    }
    if r.starts_with('/') {
        return RefShape::Rooted(r);
    }
    if let Some(len) = scheme_len(r) {
        let scheme = &r[..len];
        let after = &r[len + 1..];
        if (scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https"))
            && after.starts_with("//")
        {
            let (authority, rest) = split_authority(&after[2..]);
            return RefShape::Absolute { authority, rest };
        }
        return RefShape::OtherScheme;
    }
    RefShape::Relative(r)
}

fn split_authority(after_slashes: &str) -> (&str, &str) {
    let end = after_slashes
        .find(['/', '?', '#'])
        .unwrap_or(after_slashes.len());
    after_slashes.split_at(end)
}

/// Split a path reference into `(path, suffix)` where the suffix is the
/// query and/or fragment including its leading `?` or `#`.
pub fn split_suffix(reference: &str) -> (&str, &str) {
    let end = reference.find(['?', '#']).unwrap_or(reference.len());
    reference.split_at(end)
}
