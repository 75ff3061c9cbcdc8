//! Output root lifecycle.
//!
//! A run starts by making the output root exist and be writable, then
//! deleting everything inside it. Nothing is written for any item until
//! this has finished; [`Generator`](crate::generate::Generator) enforces
//! the ordering by running these steps before enumerating items.
//!
//! ```text
//! prepare ─ create if missing ─ writable? ─ one chmod 0755 ─ writable?
//! wipe    ─ children before parents, symlinks removed not followed
//! ensure_subdir(assets) / write_htaccess
//! ```
//!
//! `prepare` failures are fatal for the run. `wipe` is best-effort: an entry
//! that cannot be removed is logged and counted, and the rest continue.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("refusing to use {} as the output root", .0.display())]
    UnsafeRoot(PathBuf),
    #[error("cannot create output directory {}: {source}", .path.display())]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "output directory {} is not writable (mode {mode:o}, owner {owner}, running as {process_user}); \
         fix with: chmod 755 {} && chown {process_user} {}",
        .path.display(),
        .path.display(),
        .path.display()
    )]
    NotWritable {
        path: PathBuf,
        mode: u32,
        owner: String,
        process_user: String,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Counts from a [`DirectoryManager::wipe`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WipeStats {
    pub files_removed: u32,
    pub dirs_removed: u32,
    pub failures: u32,
}

impl fmt::Display for WipeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files, {} directories removed",
            self.files_removed, self.dirs_removed
        )?;
        if self.failures > 0 {
            write!(f, " ({} could not be removed)", self.failures)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryManager {
    root: PathBuf,
}

impl DirectoryManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Make sure the root exists and this process can write to it.
    pub fn prepare(&self) -> Result<(), DirectoryError> {
        let absolute = std::path::absolute(&self.root)?;
        if absolute.parent().is_none() {
            return Err(DirectoryError::UnsafeRoot(self.root.clone()));
        }

        if !self.root.exists() {
            fs::create_dir_all(&self.root).map_err(|source| DirectoryError::CreateFailed {
                path: self.root.clone(),
                source,
            })?;
            tracing::info!(root = %self.root.display(), "created output directory");
        } else if !self.root.is_dir() {
            return Err(DirectoryError::CreateFailed {
                path: self.root.clone(),
                source: io::Error::new(io::ErrorKind::AlreadyExists, "exists and is not a directory"),
            });
        }

        if is_writable(&self.root) {
            return Ok(());
        }
        tracing::warn!(root = %self.root.display(), "output directory not writable, trying chmod 755");
        if let Err(e) = set_mode_755(&self.root) {
            tracing::warn!(root = %self.root.display(), error = %e, "chmod failed");
        }
        if is_writable(&self.root) {
            return Ok(());
        }
        Err(self.not_writable())
    }

    /// Delete everything under the root, leaving the root itself.
    pub fn wipe(&self) -> WipeStats {
        let mut stats = WipeStats::default();
        for entry in WalkDir::new(&self.root).min_depth(1).contents_first(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "cannot read entry during wipe");
                    stats.failures += 1;
                    continue;
                }
            };
            let path = entry.path();
            let is_dir = entry.file_type().is_dir();
            let removed = if is_dir {
                fs::remove_dir(path)
            } else {
                fs::remove_file(path)
            };
            match removed {
                Ok(()) if is_dir => stats.dirs_removed += 1,
                Ok(()) => stats.files_removed += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "could not remove");
                    stats.failures += 1;
                }
            }
        }
        tracing::info!(root = %self.root.display(), %stats, "wiped output directory");
        stats
    }

    /// Create `root/name` if missing. Idempotent.
    pub fn ensure_subdir(&self, name: &str) -> Result<PathBuf, DirectoryError> {
        let dir = self.root.join(name);
        fs::create_dir_all(&dir).map_err(|source| DirectoryError::CreateFailed {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    /// Write an Apache `.htaccess` serving `index.html` as the directory
    /// index, with long-lived caching for hashed assets.
    pub fn write_htaccess(&self, asset_extensions: &[String]) -> Result<PathBuf, DirectoryError> {
        let path = self.root.join(".htaccess");
        fs::write(&path, htaccess_contents(asset_extensions))?;
        Ok(path)
    }

    fn not_writable(&self) -> DirectoryError {
        let (mode, owner) = ownership(&self.root);
        DirectoryError::NotWritable {
            path: self.root.clone(),
            mode,
            owner,
            process_user: process_user(),
        }
    }
}

fn is_writable(dir: &Path) -> bool {
    tempfile::tempfile_in(dir).is_ok()
}

pub fn htaccess_contents(asset_extensions: &[String]) -> String {
    let exts = asset_extensions.join("|");
    format!(
        r#"# Generated by site-mirror. Rewritten on every run.
DirectoryIndex index.html
Options -Indexes

<IfModule mod_headers.c>
    <FilesMatch "^[0-9a-f]{{64}}\.({exts})$">
        Header set Cache-Control "public, max-age=31536000, immutable"
    </FilesMatch>
    <FilesMatch "\.html$">
        Header set Cache-Control "public, max-age=300"
    </FilesMatch>
</IfModule>

<IfModule mod_deflate.c>
    AddOutputFilterByType DEFLATE text/html text/css text/plain application/javascript application/json image/svg+xml
</IfModule>
"#
    )
}

#[cfg(unix)]
fn set_mode_755(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_mode_755(path: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(false);
    fs::set_permissions(path, perms)
}

#[cfg(unix)]
fn ownership(path: &Path) -> (u32, String) {
    use std::os::unix::fs::MetadataExt;
    match fs::metadata(path) {
        Ok(meta) => (meta.mode() & 0o7777, user_name(meta.uid())),
        Err(_) => (0, "unknown".to_string()),
    }
}

#[cfg(not(unix))]
fn ownership(path: &Path) -> (u32, String) {
    let readonly = fs::metadata(path)
        .map(|m| m.permissions().readonly())
        .unwrap_or(true);
    (if readonly { 0o555 } else { 0o755 }, "unknown".to_string())
}

#[cfg(unix)]
fn process_user() -> String {
    user_name(rustix::process::geteuid().as_raw())
}

#[cfg(not(unix))]
fn process_user() -> String {
    std::env::var("USERNAME").unwrap_or_else(|_| "unknown".to_string())
}

/// Login name for `uid` from `/etc/passwd`, or the numeric uid.
#[cfg(unix)]
fn user_name(uid: u32) -> String {
    fs::read_to_string("/etc/passwd")
        .ok()
        .and_then(|passwd| lookup_passwd(&passwd, uid))
        .unwrap_or_else(|| uid.to_string())
}

#[cfg(unix)]
fn lookup_passwd(passwd: &str, uid: u32) -> Option<String> {
    passwd.lines().find_map(|line| {
        let mut fields = line.split(':');
        let name = fields.next()?;
        let entry_uid: u32 = fields.nth(1)?.parse().ok()?;
        (entry_uid == uid).then(|| name.to_string())
    })
}
