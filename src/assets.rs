//! Content-addressed asset copier.
//!
//! Images referenced by a page are read from the live site's document root
//! (not downloaded) and stored in the output's assets directory as
//! `{sha256}.{ext}`. Two URLs with identical bytes collapse to one file;
//! an existing file is never overwritten.
//!
//! ## Resolution
//!
//! ```text
//! reference ─ absolutize ─ same host? ─ strip base path ─ percent-decode
//!           ─ reject `..` ─ extension allowed? ─ join site root ─ exists?
//! ```
//!
//! Each step that fails yields a distinct [`AssetError`]; callers leave the
//! reference unrewritten and move on.
//!
//! ## Concurrent writers
//!
//! Items may be processed in parallel, and two items can reference the same
//! bytes. Writes go to a temp file inside the assets directory and are
//! moved into place with a no-clobber rename: the first writer wins, the
//! others see `AlreadyExists` and report the asset as already present. A
//! reader never observes a partially written `{hash}.{ext}`.

use crate::site::{SiteUrl, split_suffix};
use crate::types::AssetRecord;
use percent_encoding::percent_decode_str;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("external resource not copied: {0}")]
    External(String),
    #[error("extension not allowed: {0}")]
    Extension(String),
    #[error("unsafe path in reference: {0}")]
    UnsafePath(String),
    #[error("source file not found for {url}: {}", .path.display())]
    Missing { url: String, path: PathBuf },
    #[error("IO error copying {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: io::Error,
    },
}

/// SHA-256 of a byte slice as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Lowercased extension of the last path segment, ignoring query/fragment.
pub fn extension_of(reference: &str) -> Option<String> {
    let (path, _) = split_suffix(reference);
    let last = path.rsplit('/').next()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[derive(Debug, Clone)]
pub struct AssetStore {
    site: SiteUrl,
    site_root: PathBuf,
    assets_dir: PathBuf,
    extensions: Vec<String>,
}

impl AssetStore {
    pub fn new(
        site: SiteUrl,
        site_root: impl Into<PathBuf>,
        assets_dir: impl Into<PathBuf>,
        extensions: &[String],
    ) -> Self {
        Self {
            site,
            site_root: site_root.into(),
            assets_dir: assets_dir.into(),
            extensions: extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
        }
    }

    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    pub fn is_allowed_extension(&self, reference: &str) -> bool {
        extension_of(reference).is_some_and(|ext| self.extensions.contains(&ext))
    }

    /// Map a reference to the file under the site root that serves it.
    pub fn local_path(&self, reference: &str) -> Result<PathBuf, AssetError> {
        let absolute = self.site.absolutize(reference);
        let site_path = self
            .site
            .site_path(&absolute)
            .ok_or_else(|| AssetError::External(reference.to_string()))?;
        let (path, _) = split_suffix(&site_path);
        let decoded = percent_decode_str(path)
            .decode_utf8()
            .map_err(|_| AssetError::UnsafePath(reference.to_string()))?;

        let mut local = self.site_root.clone();
        for segment in decoded.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(AssetError::UnsafePath(reference.to_string())),
                s if s.contains(['\\', '\0']) => {
                    return Err(AssetError::UnsafePath(reference.to_string()));
                }
                s => local.push(s),
            }
        }
        Ok(local)
    }

    /// Resolve `reference` to a local file and store it by content hash.
    pub fn resolve_and_copy(&self, reference: &str) -> Result<AssetRecord, AssetError> {
        let absolute = self.site.absolutize(reference);
        if self.site.is_external(&absolute) {
            return Err(AssetError::External(reference.to_string()));
        }
        let Some(ext) = extension_of(&absolute).filter(|e| self.extensions.contains(e)) else {
            return Err(AssetError::Extension(reference.to_string()));
        };
        let source_path = self.local_path(reference)?;
        if !source_path.is_file() {
            return Err(AssetError::Missing {
                url: reference.to_string(),
                path: source_path,
            });
        }

        let io_err = |source| AssetError::Io {
            url: reference.to_string(),
            source,
        };
        let bytes = fs::read(&source_path).map_err(io_err)?;
        let content_hash = hash_bytes(&bytes);
        let stored_name = format!("{content_hash}.{ext}");
        let already_existed = self.store(&stored_name, &bytes).map_err(io_err)?;

        if already_existed {
            tracing::debug!(url = reference, stored = %stored_name, "asset already stored");
        } else {
            tracing::debug!(url = reference, stored = %stored_name, "asset copied");
        }

        Ok(AssetRecord {
            original_url: reference.to_string(),
            normalized_url: self.site.normalize(reference),
            source_path,
            content_hash,
            stored_name,
            already_existed,
        })
    }

    /// Write `bytes` as `name` unless it already exists. Returns whether the
    /// file was already present.
    fn store(&self, name: &str, bytes: &[u8]) -> io::Result<bool> {
        let dest = self.assets_dir.join(name);
        if dest.exists() {
            return Ok(true);
        }
        let mut tmp = NamedTempFile::new_in(&self.assets_dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        match tmp.persist_noclobber(&dest) {
            Ok(_) => Ok(false),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(true),
            Err(e) => Err(e.error),
        }
    }
}
