//! Mirror generation.
//!
//! Drives one run through its phases:
//!
//! ```text
//! Idle → PreparingDirectory → EnumeratingItems → ProcessingItems → Completed
//!                 │                   │
//!                 └───────────────────┴──→ FailedFatal
//! ```
//!
//! - **PreparingDirectory**: create and probe the output root, wipe it, create
//!   the assets subdirectory, optionally write `.htaccess`, then mirror the
//!   home page. Any failure here is fatal and no item is touched.
//! - **EnumeratingItems**: ask the content source once. The list is frozen for
//!   the rest of the run.
//! - **ProcessingItems**: each item is fetched, its images copied into the
//!   asset store, its HTML rewritten and written under the output root. One
//!   item's failure is logged and recorded; the rest carry on.
//!
//! Each phase is also exposed on its own ([`Generator::prepare`],
//! [`Generator::list_items`], [`Generator::process_item`]) so a caller can
//! drive the run step by step and report progress per item.
//!
//! ## Parallelism
//!
//! Items are processed on the global rayon pool. Each item builds its own
//! [`AssetMap`]; the only shared state is the asset directory, where writes
//! are no-clobber renames keyed by content hash. Cancellation is checked
//! before each item starts. Items already running finish normally.

use crate::assets::{AssetError, AssetStore};
use crate::config::{ConfigError, MirrorConfig};
use crate::directory::{DirectoryError, DirectoryManager, WipeStats};
use crate::fetch::{FetchError, Fetcher};
use crate::paths::PathMapper;
use crate::rewrite::{AssetMap, PageText, Rewriter};
use crate::site::SiteUrl;
use crate::source::{ContentSource, SourceError};
use crate::types::{ContentItem, ItemKind};
use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use thiserror::Error;

/// Fatal errors: the run cannot produce a usable mirror.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("home page {url} failed: {source}")]
    Home {
        url: String,
        #[source]
        source: ItemError,
    },
    #[error("content source failed: {0}")]
    Source(#[from] SourceError),
    #[error("invalid asset extension list: {0}")]
    Pattern(#[from] regex::Error),
}

/// Per-item errors. Recorded in the run summary; never abort the run.
#[derive(Error, Debug)]
pub enum ItemError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Run state, reported through [`GenerateEvent::PhaseStarted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    PreparingDirectory,
    EnumeratingItems,
    ProcessingItems,
    Completed,
    FailedFatal,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::PreparingDirectory => "preparing output directory",
            RunPhase::EnumeratingItems => "listing published items",
            RunPhase::ProcessingItems => "processing items",
            RunPhase::Completed => "completed",
            RunPhase::FailedFatal => "failed",
        };
        f.write_str(name)
    }
}

/// Cooperative cancellation flag shared with a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of one successfully mirrored page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub item: ContentItem,
    /// Output file, relative to the output root.
    pub output: String,
    pub assets_copied: usize,
    pub assets_reused: usize,
    pub assets_skipped: usize,
}

/// Result of the preparation phase.
#[derive(Debug, Clone)]
pub struct PrepareReport {
    pub wipe: WipeStats,
    pub htaccess: Option<PathBuf>,
    pub home: ItemReport,
}

#[derive(Debug)]
pub struct ItemFailure {
    pub item: ContentItem,
    pub error: ItemError,
}

/// Counts for a finished (or cancelled) run.
#[derive(Debug)]
pub struct RunSummary {
    pub prepare: PrepareReport,
    /// Items whose processing started.
    pub attempted: usize,
    pub succeeded: usize,
    /// Items never started because the run was cancelled.
    pub skipped: usize,
    pub assets_copied: usize,
    pub assets_reused: usize,
    pub assets_skipped: usize,
    pub failures: Vec<ItemFailure>,
    pub cancelled: bool,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} items mirrored, {} failed; assets: {} copied, {} reused, {} skipped",
            self.succeeded,
            self.attempted,
            self.failures.len(),
            self.assets_copied,
            self.assets_reused,
            self.assets_skipped
        )?;
        if self.cancelled {
            write!(f, "; cancelled with {} items not started", self.skipped)?;
        }
        Ok(())
    }
}

/// Progress events emitted during [`Generator::run`].
#[derive(Debug, Clone)]
pub enum GenerateEvent {
    PhaseStarted(RunPhase),
    DirectoryPrepared { root: PathBuf, wipe: WipeStats },
    HomeWritten(ItemReport),
    ItemsListed(Vec<ContentItem>),
    ItemFinished {
        done: usize,
        total: usize,
        report: ItemReport,
    },
    ItemFailed {
        done: usize,
        total: usize,
        item: ContentItem,
        error: String,
    },
    Cancelled { skipped: usize },
}

fn emit(events: &Option<Sender<GenerateEvent>>, event: GenerateEvent) {
    if let Some(tx) = events {
        tx.send(event).ok();
    }
}

/// One mirror run over a site, its content source and an output root.
pub struct Generator<'a, F: Fetcher, S: ContentSource> {
    fetcher: &'a F,
    source: &'a S,
    site: SiteUrl,
    mapper: PathMapper,
    directory: DirectoryManager,
    store: AssetStore,
    rewriter: Rewriter,
    assets_dir: String,
    extensions: Vec<String>,
    write_htaccess: bool,
}

impl<'a, F: Fetcher, S: ContentSource> Generator<'a, F, S> {
    pub fn new(config: &MirrorConfig, fetcher: &'a F, source: &'a S) -> Result<Self, GenerateError> {
        config.validate()?;
        let site = config.site()?;
        let extensions = &config.assets.extensions;
        let mapper = PathMapper::new(&config.output_dir, config.layout, site.clone());
        let store = AssetStore::new(
            site.clone(),
            &config.site_root,
            config.assets_path(),
            extensions,
        );
        let rewriter = Rewriter::new(
            site.clone(),
            mapper.clone(),
            &config.assets_dir,
            extensions,
            &config.links,
        )?;
        Ok(Self {
            fetcher,
            source,
            site,
            mapper,
            directory: DirectoryManager::new(&config.output_dir),
            store,
            rewriter,
            assets_dir: config.assets_dir.clone(),
            extensions: extensions.clone(),
            write_htaccess: config.write_htaccess,
        })
    }

    pub fn output_root(&self) -> &Path {
        self.directory.root()
    }

    /// Create, probe and wipe the output root, then recreate the assets
    /// subdirectory and (if enabled) `.htaccess`.
    pub fn prepare_directory(&self) -> Result<(WipeStats, Option<PathBuf>), GenerateError> {
        self.directory.prepare()?;
        let wipe = self.directory.wipe();
        self.directory.ensure_subdir(&self.assets_dir)?;
        let htaccess = if self.write_htaccess {
            Some(self.directory.write_htaccess(&self.extensions)?)
        } else {
            None
        };
        Ok((wipe, htaccess))
    }

    /// The site root, as a pseudo-item.
    pub fn home_item(&self) -> ContentItem {
        ContentItem {
            id: "home".to_string(),
            kind: ItemKind::Page,
            title: "Home".to_string(),
            url: self.site.home_url(),
            body: None,
        }
    }

    /// Mirror the home page to `index.html`. Failure is fatal.
    pub fn generate_home(&self) -> Result<ItemReport, GenerateError> {
        let home = self.home_item();
        self.process_item(&home).map_err(|source| {
            tracing::error!(url = %home.url, error = %source, "home page failed");
            GenerateError::Home {
                url: home.url.clone(),
                source,
            }
        })
    }

    /// Preparation phase: directory, then home page.
    pub fn prepare(&self) -> Result<PrepareReport, GenerateError> {
        let (wipe, htaccess) = self.prepare_directory()?;
        let home = self.generate_home()?;
        Ok(PrepareReport {
            wipe,
            htaccess,
            home,
        })
    }

    pub fn list_items(&self) -> Result<Vec<ContentItem>, GenerateError> {
        let items = self.source.list_published_items()?;
        tracing::info!(count = items.len(), "published items listed");
        Ok(items)
    }

    /// Look up one item by id and kind and mirror it. Creates the assets
    /// subdirectory if a previous `prepare` did not.
    pub fn process_by_id(&self, id: &str, kind: ItemKind) -> Result<ItemReport, ProcessByIdError> {
        let item = self.source.find_item(id, kind)?;
        self.directory.ensure_subdir(&self.assets_dir)?;
        Ok(self.process_item(&item)?)
    }

    /// Fetch, copy images, rewrite and write one page.
    pub fn process_item(&self, item: &ContentItem) -> Result<ItemReport, ItemError> {
        let result = self.mirror_page(item);
        match &result {
            Ok(report) => tracing::info!(
                id = %item.id,
                kind = %item.kind,
                title = %item.title,
                output = %report.output,
                "item mirrored"
            ),
            Err(e) => tracing::error!(
                id = %item.id,
                kind = %item.kind,
                title = %item.title,
                url = %item.url,
                error = %e,
                "item failed"
            ),
        }
        result
    }

    /// Image references of the rendered page, followed by any the source's
    /// raw body adds (images a theme lazy-loads out of the initial markup).
    fn image_refs(&self, item: &ContentItem, page: &PageText) -> Vec<String> {
        let mut refs = self.rewriter.extract_image_refs(page.as_str());
        if let Some(body) = &item.body {
            for reference in self.rewriter.extract_image_refs(body) {
                if !refs.contains(&reference) {
                    refs.push(reference);
                }
            }
        }
        refs
    }

    fn mirror_page(&self, item: &ContentItem) -> Result<ItemReport, ItemError> {
        let page = PageText::decode(self.fetcher.fetch(&item.url)?);
        if !page.is_utf8() {
            tracing::debug!(id = %item.id, url = %item.url, "page is not UTF-8, rewriting bytewise");
        }

        let mut assets = AssetMap::new();
        let mut copied = 0;
        let mut reused = 0;
        let mut skipped = 0;
        for reference in self.image_refs(item, &page) {
            match self.store.resolve_and_copy(&reference) {
                Ok(record) => {
                    if record.already_existed {
                        reused += 1;
                    } else {
                        copied += 1;
                    }
                    assets.insert(&record);
                }
                Err(AssetError::External(_)) => {
                    tracing::debug!(id = %item.id, url = %reference, "external image left as is");
                    skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        id = %item.id,
                        kind = %item.kind,
                        title = %item.title,
                        url = %reference,
                        error = %e,
                        "image not copied"
                    );
                    skipped += 1;
                }
            }
        }

        let rewritten = self.rewriter.rewrite_page(&page, &item.url, &assets);
        let path = self.mapper.static_file_path(&item.url);
        write_page(&path, &rewritten.into_bytes()).map_err(|source| ItemError::Write {
            path: path.clone(),
            source,
        })?;

        Ok(ItemReport {
            item: item.clone(),
            output: self.mapper.relative_target(&item.url),
            assets_copied: copied,
            assets_reused: reused,
            assets_skipped: skipped,
        })
    }

    /// Full run. Fatal errors abort; item errors land in the summary.
    pub fn run(
        &self,
        events: Option<Sender<GenerateEvent>>,
        cancel: &CancelToken,
    ) -> Result<RunSummary, GenerateError> {
        let result = self.run_phases(&events, cancel);
        if let Err(e) = &result {
            tracing::error!(error = %e, "run aborted");
            emit(&events, GenerateEvent::PhaseStarted(RunPhase::FailedFatal));
        }
        result
    }

    fn run_phases(
        &self,
        events: &Option<Sender<GenerateEvent>>,
        cancel: &CancelToken,
    ) -> Result<RunSummary, GenerateError> {
        emit(events, GenerateEvent::PhaseStarted(RunPhase::PreparingDirectory));
        let prepare = self.prepare()?;
        emit(
            events,
            GenerateEvent::DirectoryPrepared {
                root: self.directory.root().to_path_buf(),
                wipe: prepare.wipe,
            },
        );
        emit(events, GenerateEvent::HomeWritten(prepare.home.clone()));

        emit(events, GenerateEvent::PhaseStarted(RunPhase::EnumeratingItems));
        let items = self.list_items()?;
        emit(events, GenerateEvent::ItemsListed(items.clone()));

        emit(events, GenerateEvent::PhaseStarted(RunPhase::ProcessingItems));
        let total = items.len();
        let done = AtomicUsize::new(0);
        let outcomes: Vec<Option<Result<ItemReport, ItemFailure>>> = items
            .into_par_iter()
            .map(|item| {
                if cancel.is_cancelled() {
                    return None;
                }
                let outcome = self.process_item(&item);
                let done = done.fetch_add(1, Ordering::SeqCst) + 1;
                Some(match outcome {
                    Ok(report) => {
                        emit(
                            events,
                            GenerateEvent::ItemFinished {
                                done,
                                total,
                                report: report.clone(),
                            },
                        );
                        Ok(report)
                    }
                    Err(error) => {
                        emit(
                            events,
                            GenerateEvent::ItemFailed {
                                done,
                                total,
                                item: item.clone(),
                                error: error.to_string(),
                            },
                        );
                        Err(ItemFailure { item, error })
                    }
                })
            })
            .collect();

        let home = &prepare.home;
        let mut summary = RunSummary {
            attempted: 0,
            succeeded: 0,
            skipped: 0,
            assets_copied: home.assets_copied,
            assets_reused: home.assets_reused,
            assets_skipped: home.assets_skipped,
            failures: Vec::new(),
            cancelled: false,
            prepare: prepare.clone(),
        };
        for outcome in outcomes {
            match outcome {
                None => summary.skipped += 1,
                Some(Ok(report)) => {
                    summary.attempted += 1;
                    summary.succeeded += 1;
                    summary.assets_copied += report.assets_copied;
                    summary.assets_reused += report.assets_reused;
                    summary.assets_skipped += report.assets_skipped;
                }
                Some(Err(failure)) => {
                    summary.attempted += 1;
                    summary.failures.push(failure);
                }
            }
        }
        summary.cancelled = summary.skipped > 0;

        if summary.cancelled {
            tracing::warn!(skipped = summary.skipped, "run cancelled");
            emit(events, GenerateEvent::Cancelled { skipped: summary.skipped });
        }
        tracing::info!(%summary, "run finished");
        emit(events, GenerateEvent::PhaseStarted(RunPhase::Completed));
        Ok(summary)
    }
}

/// Errors from [`Generator::process_by_id`].
#[derive(Error, Debug)]
pub enum ProcessByIdError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Item(#[from] ItemError),
}

fn write_page(path: &Path, html: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, html)
}
