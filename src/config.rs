//! Mirror configuration.
//!
//! Settings come from three layers, each overriding the one before:
//!
//! ```text
//! stock defaults  →  mirror.toml  →  command-line flags
//! ```
//!
//! All three are merged as `toml::Value` tables (see [`merge_toml`]) and
//! deserialized once, so a flag and a config key can never disagree about
//! types or names. The merged result is validated before any directory is
//! touched.
//!
//! ## Configuration Options
//!
//! ```toml
//! site_url = "https://example.com"   # Live site to mirror (required)
//! site_root = "/var/www/html"        # Document root serving site_url
//! output_dir = "static"              # Mirror output root (wiped every run)
//! assets_dir = "assets"              # Subdirectory for copied images
//! layout = "directory"               # "directory" (slug/index.html) or "flat" (slug.html)
//! write_htaccess = true              # Write an Apache .htaccess into the mirror
//!
//! [fetch]
//! timeout_secs = 30
//! max_redirects = 5
//! user_agent = "site-mirror/0.4 (static generator)"
//!
//! [assets]
//! extensions = ["jpg", "jpeg", "png", "gif", "webp", "svg"]
//!
//! [links]
//! skip_prefixes = ["/wp-admin/", "/wp-json/", "/wp-login.php", "/xmlrpc.php", "/feed/"]
//! file_extensions = ["php", "pdf", "xml", "zip", ...]   # Links to these stay on the live site
//!
//! [processing]
//! max_processes = 4                  # Max parallel items (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::paths::Layout;
use crate::site::SiteUrl;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Top-level mirror configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
    /// Base URL of the live site. Everything under it is "internal".
    pub site_url: String,
    /// Document root that serves `site_url`; images are read from here.
    pub site_root: PathBuf,
    /// Output root. Wiped and rebuilt on every run.
    pub output_dir: PathBuf,
    /// Name of the assets subdirectory under `output_dir`.
    pub assets_dir: String,
    pub layout: Layout,
    pub write_htaccess: bool,
    pub fetch: FetchConfig,
    pub assets: AssetsConfig,
    pub links: LinksConfig,
    pub processing: ProcessingConfig,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            site_url: String::new(),
            site_root: PathBuf::from("/var/www/html"),
            output_dir: PathBuf::from("static"),
            assets_dir: "assets".to_string(),
            layout: Layout::Directory,
            write_htaccess: true,
            fetch: FetchConfig::default(),
            assets: AssetsConfig::default(),
            links: LinksConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl MirrorConfig {
    /// Validate values and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "site_url is required (set it in mirror.toml or pass --site-url)".into(),
            ));
        }
        SiteUrl::parse(&self.site_url).map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.assets_dir.is_empty()
            || self.assets_dir.contains(['/', '\\'])
            || self.assets_dir == "."
            || self.assets_dir == ".."
        {
            return Err(ConfigError::Validation(
                "assets_dir must be a single directory name".into(),
            ));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "fetch.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.assets.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "assets.extensions must not be empty".into(),
            ));
        }
        if let Some(bad) = self
            .assets
            .extensions
            .iter()
            .find(|e| e.is_empty() || !e.chars().all(|c| c.is_ascii_alphanumeric()))
        {
            return Err(ConfigError::Validation(format!(
                "assets.extensions entry '{bad}' must be plain alphanumerics without a dot"
            )));
        }
        if let Some(bad) = self
            .links
            .file_extensions
            .iter()
            .find(|e| e.is_empty() || !e.chars().all(|c| c.is_ascii_alphanumeric()))
        {
            return Err(ConfigError::Validation(format!(
                "links.file_extensions entry '{bad}' must be plain alphanumerics without a dot"
            )));
        }
        self.validate_output_dir()
    }

    fn validate_output_dir(&self) -> Result<(), ConfigError> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation("output_dir must not be empty".into()));
        }
        let out = std::path::absolute(&self.output_dir)?;
        if out.parent().is_none() {
            return Err(ConfigError::Validation(
                "output_dir must not be the filesystem root".into(),
            ));
        }
        let root = std::path::absolute(&self.site_root)?;
        if out == root || root.starts_with(&out) {
            return Err(ConfigError::Validation(format!(
                "output_dir {} would contain the site root {}; the mirror wipes its output",
                out.display(),
                root.display()
            )));
        }
        Ok(())
    }

    pub fn site(&self) -> Result<SiteUrl, ConfigError> {
        SiteUrl::parse(&self.site_url).map_err(|e| ConfigError::Validation(e.to_string()))
    }

    pub fn assets_path(&self) -> PathBuf {
        self.output_dir.join(&self.assets_dir)
    }
}

/// HTTP fetch policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
    pub max_redirects: u32,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_redirects: 5,
            user_agent: format!("site-mirror/{} (static generator)", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Which referenced files are copied into the assets directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetsConfig {
    /// Allowed extensions, compared case-insensitively.
    pub extensions: Vec<String>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            extensions: ["jpg", "jpeg", "png", "gif", "webp", "svg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

const DEFAULT_FILE_EXTENSIONS: &[&str] = &[
    "php", "pdf", "xml", "txt", "json", "csv", "zip", "gz", "doc", "docx", "xls", "xlsx", "ppt",
    "pptx", "odt", "mp3", "mp4", "m4a", "ogg", "wav", "webm", "mov", "css", "js", "ico", "bmp",
    "tif", "tiff", "woff", "woff2", "ttf",
];

/// Internal links that stay pointed at the live site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinksConfig {
    /// Site-path prefixes that are never rewritten (admin, login, API, feeds).
    pub skip_prefixes: Vec<String>,
    /// Extensions that mark a link as a file download rather than a page.
    /// Any other dotted last segment (`/release-1.2`) is still a page.
    pub file_extensions: Vec<String>,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            skip_prefixes: ["/wp-admin/", "/wp-json/", "/wp-login.php", "/xmlrpc.php", "/feed/"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            file_extensions: DEFAULT_FILE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of items processed in parallel.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)`, at least 1
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(MirrorConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value. A missing file is `Ok(None)`.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge the layers onto the stock defaults, deserialize, and validate.
pub fn resolve_config(
    base: toml::Value,
    layers: impl IntoIterator<Item = toml::Value>,
) -> Result<MirrorConfig, ConfigError> {
    let merged = layers.into_iter().fold(base, merge_toml);
    let config: MirrorConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load `path` (if present) over stock defaults, then apply `overrides`.
pub fn load_config(
    path: &Path,
    overrides: Option<toml::Value>,
) -> Result<MirrorConfig, ConfigError> {
    let file = load_raw_config(path)?;
    resolve_config(stock_defaults_value(), file.into_iter().chain(overrides))
}

/// Returns a fully-commented stock `mirror.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# site-mirror configuration
# =========================
# Values shown are the defaults, except site_url which has none.
# Command-line flags (--site-url, --site-root, --output) override this file.
# Unknown keys cause an error.

# Base URL of the live site. Links and images under this URL are mirrored;
# everything else is left pointing where it was.
site_url = "https://example.com"

# Document root that serves site_url. Images are read from disk here,
# not downloaded.
site_root = "/var/www/html"

# Output root. EVERYTHING inside it is deleted at the start of each run.
# Must not be, or contain, site_root.
output_dir = "static"

# Subdirectory of output_dir for content-addressed images ({sha256}.{ext}).
assets_dir = "assets"

# Where non-root pages are written:
#   "directory"  /hello/ -> hello/index.html
#   "flat"       /hello/ -> hello.html
layout = "directory"

# Write an Apache .htaccess (DirectoryIndex, caching, compression).
write_htaccess = true

# ---------------------------------------------------------------------------
# HTTP fetching
# ---------------------------------------------------------------------------
[fetch]
# Whole-request timeout. A page that times out is reported as failed.
timeout_secs = 30
# Redirects followed before giving up.
max_redirects = 5
# User-Agent header sent with every request.
# user_agent = "site-mirror/<version> (static generator)"

# ---------------------------------------------------------------------------
# Assets
# ---------------------------------------------------------------------------
[assets]
# Extensions copied into assets_dir (case-insensitive, no dot).
extensions = ["jpg", "jpeg", "png", "gif", "webp", "svg"]

# ---------------------------------------------------------------------------
# Links
# ---------------------------------------------------------------------------
[links]
# Internal paths that keep pointing at the live site.
skip_prefixes = ["/wp-admin/", "/wp-json/", "/wp-login.php", "/xmlrpc.php", "/feed/"]
# Links whose last segment ends in one of these are files, not pages, and keep
# pointing at the live site. Other dotted slugs (/release-1.2) are mirrored.
# Image links are mirrored through assets_dir when the image was copied.
file_extensions = [
    "php", "pdf", "xml", "txt", "json", "csv", "zip", "gz", "doc", "docx", "xls", "xlsx", "ppt",
    "pptx", "odt", "mp3", "mp4", "m4a", "ogg", "wav", "webm", "mov", "css", "js", "ico", "bmp",
    "tif", "tiff", "woff", "woff2", "ttf",
]

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel items. Omit to use all CPU cores.
# max_processes = 4
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn overrides(s: &str) -> toml::Value {
        toml::from_str(s).unwrap()
    }

    fn valid(tmp: &TempDir) -> MirrorConfig {
        MirrorConfig {
            site_url: "https://site.example".into(),
            site_root: tmp.path().join("www"),
            output_dir: tmp.path().join("out"),
            ..MirrorConfig::default()
        }
    }

    #[test]
    fn defaults() {
        let config = MirrorConfig::default();
        assert_eq!(config.assets_dir, "assets");
        assert_eq!(config.layout, Layout::Directory);
        assert!(config.write_htaccess);
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.fetch.max_redirects, 5);
        assert!(config.fetch.user_agent.starts_with("site-mirror/"));
        assert_eq!(config.assets.extensions.len(), 6);
    }

    #[test]
    fn parse_partial_config() {
        let config: MirrorConfig = toml::from_str(
            r#"
site_url = "https://site.example"
layout = "flat"

[fetch]
timeout_secs = 10
"#,
        )
        .unwrap();
        assert_eq!(config.layout, Layout::Flat);
        assert_eq!(config.fetch.timeout_secs, 10);
        // Unspecified values stay at defaults
        assert_eq!(config.fetch.max_redirects, 5);
        assert_eq!(config.assets_dir, "assets");
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_without_file_needs_site_url() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("mirror.toml");
        let err = load_config(&missing, None).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref m) if m.contains("site_url")));
    }

    #[test]
    fn load_config_reads_file_and_applies_overrides() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mirror.toml");
        fs::write(
            &path,
            format!(
                r#"
site_url = "https://site.example"
site_root = "{}"
output_dir = "{}"
"#,
                tmp.path().join("www").display(),
                tmp.path().join("out").display()
            ),
        )
        .unwrap();

        let config = load_config(&path, None).unwrap();
        assert_eq!(config.site_url, "https://site.example");

        let config = load_config(
            &path,
            Some(overrides(r#"site_url = "https://other.example""#)),
        )
        .unwrap();
        assert_eq!(config.site_url, "https://other.example");
        assert_eq!(config.output_dir, tmp.path().join("out"));
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mirror.toml");
        fs::write(&path, "this is not valid toml [[[").unwrap();
        assert!(matches!(load_config(&path, None), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unknown_key_rejected() {
        let result: Result<MirrorConfig, _> = toml::from_str("[fetch]\ntimeout = 3\n");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("unknown field"));
    }

    #[test]
    fn unknown_section_rejected() {
        let result: Result<MirrorConfig, _> = toml::from_str("[fetcher]\ntimeout_secs = 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn stock_config_parses_and_matches_defaults() {
        let config: MirrorConfig = toml::from_str(stock_config_toml()).unwrap();
        let defaults = MirrorConfig::default();
        assert_eq!(config.site_url, "https://example.com");
        assert_eq!(config.assets.extensions, defaults.assets.extensions);
        assert_eq!(config.links.skip_prefixes, defaults.links.skip_prefixes);
        assert_eq!(config.links.file_extensions, defaults.links.file_extensions);
        assert_eq!(config.fetch.timeout_secs, defaults.fetch.timeout_secs);
    }

    // =========================================================================
    // merge_toml tests
    // =========================================================================

    #[test]
    fn merge_toml_scalar_override() {
        let merged = merge_toml(overrides("layout = \"directory\""), overrides("layout = \"flat\""));
        assert_eq!(merged.get("layout").unwrap().as_str(), Some("flat"));
    }

    #[test]
    fn merge_toml_table_merge_preserves_base_keys() {
        let base = overrides("[fetch]\ntimeout_secs = 30\nmax_redirects = 5\n");
        let merged = merge_toml(base, overrides("[fetch]\ntimeout_secs = 5\n"));
        let fetch = merged.get("fetch").unwrap();
        assert_eq!(fetch.get("timeout_secs").unwrap().as_integer(), Some(5));
        assert_eq!(fetch.get("max_redirects").unwrap().as_integer(), Some(5));
    }

    #[test]
    fn merge_toml_arrays_replace() {
        let base = overrides("[assets]\nextensions = [\"png\", \"jpg\"]\n");
        let merged = merge_toml(base, overrides("[assets]\nextensions = [\"svg\"]\n"));
        let exts = merged.get("assets").unwrap().get("extensions").unwrap();
        assert_eq!(exts.as_array().unwrap().len(), 1);
    }

    #[test]
    fn resolve_config_applies_layers_in_order() {
        let tmp = TempDir::new().unwrap();
        let file = toml::Value::try_from(valid(&tmp)).unwrap();
        let config = resolve_config(
            stock_defaults_value(),
            [file, overrides("layout = \"flat\""), overrides("write_htaccess = false")],
        )
        .unwrap();
        assert_eq!(config.layout, Layout::Flat);
        assert!(!config.write_htaccess);
    }

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn validate_accepts_sane_config() {
        let tmp = TempDir::new().unwrap();
        valid(&tmp).validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_site_url() {
        let tmp = TempDir::new().unwrap();
        let mut config = valid(&tmp);
        config.site_url = "ftp://site.example".into();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_rejects_nested_assets_dir() {
        let tmp = TempDir::new().unwrap();
        let mut config = valid(&tmp);
        config.assets_dir = "a/b".into();
        assert!(config.validate().is_err());
        config.assets_dir = "..".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_dotted_extensions() {
        let tmp = TempDir::new().unwrap();
        let mut config = valid(&tmp);
        config.assets.extensions = vec![".png".into()];
        assert!(config.validate().is_err());
        config.assets.extensions.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_dotted_link_file_extensions() {
        let tmp = TempDir::new().unwrap();
        let mut config = valid(&tmp);
        config.links.file_extensions = vec!["pdf".into(), ".zip".into()];
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref m) if m.contains("'.zip'")));
        // An empty list is fine: every dotted link is then treated as a page.
        config.links.file_extensions.clear();
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let tmp = TempDir::new().unwrap();
        let mut config = valid(&tmp);
        config.fetch.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_output_containing_site_root() {
        let tmp = TempDir::new().unwrap();
        let mut config = valid(&tmp);
        config.output_dir = tmp.path().to_path_buf();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("would contain the site root"));

        config.output_dir = config.site_root.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_allows_output_inside_site_root() {
        let tmp = TempDir::new().unwrap();
        let mut config = valid(&tmp);
        config.output_dir = config.site_root.join("wp-content/static");
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_filesystem_root_output() {
        let tmp = TempDir::new().unwrap();
        let mut config = valid(&tmp);
        config.output_dir = PathBuf::from("/");
        assert!(config.validate().is_err());
    }

    // =========================================================================
    // Processing
    // =========================================================================

    #[test]
    fn effective_threads_auto_and_clamped() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_threads(&ProcessingConfig::default()), cores);
        let huge = ProcessingConfig {
            max_processes: Some(100_000),
        };
        assert_eq!(effective_threads(&huge), cores);
        let zero = ProcessingConfig {
            max_processes: Some(0),
        };
        assert_eq!(effective_threads(&zero), 1);
    }
}
