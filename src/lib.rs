//! # Site Mirror
//!
//! Turns a live WordPress-style site into a self-contained static mirror:
//! every published post and page is fetched over HTTP, its images are copied
//! from the document root into a content-addressed assets directory, and its
//! HTML is rewritten so internal links and image references resolve inside
//! the mirror.
//!
//! # Architecture: Three-Phase Run
//!
//! ```text
//! 1. Prepare   output root  →  empty root + assets/ + index.html
//! 2. List      content source  →  frozen item list
//! 3. Process   each item  →  fetch → copy images → rewrite → write
//! ```
//!
//! Each phase is a separate operation on [`generate::Generator`] so a caller
//! can run them one at a time and report per-item progress. A full
//! [`generate::Generator::run`] chains all three.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`generate`] | Run orchestration: phases, per-item failure isolation, cancellation, summary |
//! | [`paths`] | URL → output file mapping and page-relative link computation |
//! | [`assets`] | Content-addressed image store fed from the live document root |
//! | [`fetch`] | HTTP page fetching behind the [`fetch::Fetcher`] trait |
//! | [`rewrite`] | Image extraction and link/asset rewriting over raw HTML |
//! | [`directory`] | Output root creation, permission probing, wipe, `.htaccess` |
//! | [`source`] | Published-item enumeration: JSON manifest or WordPress REST API |
//! | [`site`] | The site's base URL and every "is this URL ours" decision |
//! | [`config`] | `mirror.toml` loading, merging over stock defaults, validation |
//! | [`types`] | Shared data types (`ContentItem`, `AssetRecord`) |
//! | [`output`] | CLI output formatting for list, progress and summary |
//!
//! # Design Decisions
//!
//! ## Destructive Rebuild
//!
//! Every run wipes the output root before writing anything. There is no
//! incremental mode: a mirror either reflects the site at one point in time
//! or it was not produced. The wipe completes before the first page is
//! written, and the configuration refuses an output root that contains the
//! live document root.
//!
//! ## Content-Addressed Assets
//!
//! Images are stored as `assets/<sha256>.<ext>`. Two URLs serving the same
//! bytes share one file, and concurrent workers writing the same hash race
//! harmlessly: files are written to a temp file and moved into place with a
//! no-clobber rename.
//!
//! ## Textual Rewriting
//!
//! Pages are rewritten with regular expressions over the raw text rather
//! than a parsed DOM, so every byte outside a rewritten reference survives
//! unchanged (inline scripts, malformed markup). The known cost:
//! a URL-shaped string literal inside an unrelated script is rewritten too
//! when it matches a stored asset.
//!
//! ## Relative Links
//!
//! Links are relative to the page's own output file (`./`, `../`), so the
//! mirror works from any host or subdirectory and over `file://`.
//!
//! ## Failure Isolation
//!
//! Only three things abort a run: an unusable output root, a home page that
//! cannot be mirrored, and a content source that cannot list items. Anything
//! that goes wrong with one item or one image is logged with the item's id,
//! kind and title and recorded in the run summary.

pub mod assets;
pub mod config;
pub mod directory;
pub mod fetch;
pub mod generate;
pub mod output;
pub mod paths;
pub mod rewrite;
pub mod site;
pub mod source;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
