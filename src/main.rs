use clap::{Parser, Subcommand};
use site_mirror::config::{self, MirrorConfig};
use site_mirror::fetch::HttpFetcher;
use site_mirror::generate::{CancelToken, Generator};
use site_mirror::output;
use site_mirror::source::{ContentSource, ManifestSource, SourceError, WpRestSource};
use site_mirror::types::{ContentItem, ItemKind};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup, called exactly once
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "site-mirror")]
#[command(about = "Static mirror generator for WordPress-style sites")]
#[command(long_about = "\
Static mirror generator for WordPress-style sites

Every published post and page is fetched from the live site, its images are
copied from the document root into a content-addressed assets directory, and
its links are rewritten to point inside the mirror.

Output structure:

  static/
  ├── index.html                   # Home page (site root)
  ├── .htaccess                    # Optional server rules
  ├── assets/
  │   └── 3f2a…c1.png              # Images, named by SHA-256 of their bytes
  ├── hello-world/
  │   └── index.html               # Post at /hello-world/
  └── about/
      └── index.html               # Page at /about/

A run wipes the output directory first. Items that fail are reported in the
summary and do not stop the rest of the run.

Run 'site-mirror gen-config' to generate a documented mirror.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file (optional; stock defaults apply when missing)
    #[arg(long, default_value = "mirror.toml", global = true)]
    config: PathBuf,

    /// Base URL of the live site
    #[arg(long, global = true)]
    site_url: Option<String>,

    /// Document root serving the live site (images are read from here)
    #[arg(long, global = true)]
    site_root: Option<PathBuf>,

    /// Output directory (wiped on every run)
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Read items from a JSON manifest instead of the WordPress REST API
    #[arg(long, global = true)]
    items: Option<PathBuf>,

    /// Append log lines to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create, check and wipe the output directory, then mirror the home page
    Prepare,
    /// List published items
    List {
        /// Print the items as a JSON manifest usable with --items
        #[arg(long)]
        json: bool,
    },
    /// Mirror a single item into a prepared output directory
    Process {
        /// Item id as known to the content source
        id: String,
        /// post or page
        kind: ItemKind,
    },
    /// Full run: prepare → list → process every item
    Build,
    /// Validate config and list items without touching the output directory
    Check,
    /// Print a stock mirror.toml with all options documented
    GenConfig,
}

/// The content source picked from the command line.
enum Source<'a> {
    Manifest(ManifestSource),
    Rest(WpRestSource<'a, HttpFetcher>),
}

impl<'a> Source<'a> {
    fn new(
        items: Option<&Path>,
        config: &MirrorConfig,
        fetcher: &'a HttpFetcher,
    ) -> Result<Self, config::ConfigError> {
        Ok(match items {
            Some(path) => Source::Manifest(ManifestSource::new(path)),
            None => Source::Rest(WpRestSource::new(config.site()?, fetcher)),
        })
    }
}

impl ContentSource for Source<'_> {
    fn list_published_items(&self) -> Result<Vec<ContentItem>, SourceError> {
        match self {
            Source::Manifest(s) => s.list_published_items(),
            Source::Rest(s) => s.list_published_items(),
        }
    }

    fn find_item(&self, id: &str, kind: ItemKind) -> Result<ContentItem, SourceError> {
        match self {
            Source::Manifest(s) => s.find_item(id, kind),
            Source::Rest(s) => s.find_item(id, kind),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_deref())?;

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config = config::load_config(&cli.config, cli_overrides(&cli))?;
    let fetcher = HttpFetcher::new(&config.fetch);
    let source = Source::new(cli.items.as_deref(), &config, &fetcher)?;

    match cli.command {
        Command::Prepare => {
            let generator = Generator::new(&config, &fetcher, &source)?;
            let report = generator.prepare()?;
            output::print_prepare(generator.output_root(), &report);
        }
        Command::List { json } => {
            let items = source.list_published_items()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                output::print_item_list(&items);
            }
        }
        Command::Process { id, kind } => {
            let generator = Generator::new(&config, &fetcher, &source)?;
            let report = generator.process_by_id(&id, kind)?;
            output::print_item_report(&report);
        }
        Command::Build => {
            init_thread_pool(&config.processing);
            let generator = Generator::new(&config, &fetcher, &source)?;

            let cancel = CancelToken::new();
            let handler_token = cancel.clone();
            ctrlc::set_handler(move || {
                tracing::warn!("interrupt received, finishing items in progress");
                handler_token.cancel();
            })?;

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_event(&event) {
                        println!("{}", line);
                    }
                }
            });
            let result = generator.run(Some(tx), &cancel);
            printer.join().ok();
            let summary = result?;
            output::print_summary(&summary);
        }
        Command::Check => {
            println!("==> Checking {}", config.site_url);
            let items = source.list_published_items()?;
            output::print_item_list(&items);
            println!("==> Configuration is valid");
        }
        // Printed before config loading.
        Command::GenConfig => {}
    }

    Ok(())
}

/// Turn the global flags into a TOML layer applied over the config file.
fn cli_overrides(cli: &Cli) -> Option<toml::Value> {
    let mut table = toml::Table::new();
    if let Some(url) = &cli.site_url {
        table.insert("site_url".into(), toml::Value::String(url.clone()));
    }
    if let Some(root) = &cli.site_root {
        table.insert("site_root".into(), path_value(root));
    }
    if let Some(out) = &cli.output {
        table.insert("output_dir".into(), path_value(out));
    }
    (!table.is_empty()).then_some(toml::Value::Table(table))
}

fn path_value(path: &Path) -> toml::Value {
    toml::Value::String(path.to_string_lossy().into_owned())
}

/// Install the tracing subscriber.
///
/// `--verbose` enables debug for this crate, otherwise RUST_LOG applies,
/// defaulting to warnings on stderr (progress goes to stdout) and info when
/// logging to a file.
fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<(), std::io::Error> {
    let default = if log_file.is_some() { "info" } else { "warn" };
    let filter = if verbose {
        EnvFilter::new("site_mirror=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
    Ok(())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; the user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
