//! CLI output formatting for every phase of a run.
//!
//! # Information-First Display
//!
//! Every item is shown by its semantic identity first (positional index,
//! kind and title), with the output file after an arrow and the source URL
//! as an indented context line. The output reads as an inventory of the
//! mirror while still letting the operator trace each page back to the live
//! site.
//!
//! # Output Format
//!
//! ## List
//!
//! ```text
//! Items (2)
//! 001 post  Hello
//!     Source: https://site.example/hello/
//! 002 page  About
//!     Source: https://site.example/about/
//! ```
//!
//! ## Build
//!
//! ```text
//! ==> preparing output directory
//! Output: static (3 files, 1 directories removed)
//! Home → index.html (1 assets)
//! ==> listing published items
//! ==> processing items
//! [1/2] post  Hello → hello/index.html (2 assets)
//! [2/2] FAILED page  About
//!     Error: fetch failed: https://site.example/about/ returned HTTP 500
//! ==> completed
//!
//! Mirrored 1 of 2 items, 1 failed
//! Assets: 3 copied, 0 reused, 1 skipped
//! Failed:
//!     page 2 About: fetch failed: https://site.example/about/ returned HTTP 500
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::generate::{GenerateEvent, ItemReport, PrepareReport, RunSummary};
use crate::types::ContentItem;
use std::path::Path;

// ============================================================================
// Shared entity display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Kind and title, with the kind padded so titles line up.
///
/// ```text
/// post  Hello
/// page  About
/// ```
fn item_label(item: &ContentItem) -> String {
    format!("{:<5} {}", item.kind.as_str(), display_title(&item.title))
}

fn display_title(title: &str) -> &str {
    if title.trim().is_empty() {
        "(untitled)"
    } else {
        title
    }
}

fn asset_detail(report: &ItemReport) -> String {
    let stored = report.assets_copied + report.assets_reused;
    match (stored, report.assets_skipped) {
        (0, 0) => String::new(),
        (n, 0) => format!(" ({n} assets)"),
        (n, s) => format!(" ({n} assets, {s} skipped)"),
    }
}

// ============================================================================
// List
// ============================================================================

/// Format the frozen item list.
pub fn format_item_list(items: &[ContentItem]) -> Vec<String> {
    let mut lines = vec![format!("Items ({})", items.len())];
    for (i, item) in items.iter().enumerate() {
        lines.push(format!("{} {}", format_index(i + 1), item_label(item)));
        lines.push(format!("{}Source: {}", indent(1), item.url));
    }
    lines
}

pub fn print_item_list(items: &[ContentItem]) {
    for line in format_item_list(items) {
        println!("{}", line);
    }
}

// ============================================================================
// Prepare
// ============================================================================

/// Format the result of the preparation phase.
pub fn format_prepare(root: &Path, report: &PrepareReport) -> Vec<String> {
    let mut lines = vec![format!("Output: {} ({})", root.display(), report.wipe)];
    if let Some(path) = &report.htaccess {
        lines.push(format!("{}Wrote {}", indent(1), path.display()));
    }
    lines.push(format_home(&report.home));
    lines
}

pub fn print_prepare(root: &Path, report: &PrepareReport) {
    for line in format_prepare(root, report) {
        println!("{}", line);
    }
}

fn format_home(report: &ItemReport) -> String {
    format!("Home \u{2192} {}{}", report.output, asset_detail(report))
}

/// One mirrored item, as shown by the single-item `process` command.
pub fn format_item_report(report: &ItemReport) -> Vec<String> {
    vec![
        format!(
            "{} \u{2192} {}{}",
            item_label(&report.item),
            report.output,
            asset_detail(report)
        ),
        format!("{}Source: {}", indent(1), report.item.url),
    ]
}

pub fn print_item_report(report: &ItemReport) {
    for line in format_item_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Build progress
// ============================================================================

/// Format a single progress event as display lines.
pub fn format_event(event: &GenerateEvent) -> Vec<String> {
    match event {
        GenerateEvent::PhaseStarted(phase) => vec![format!("==> {}", phase)],
        GenerateEvent::DirectoryPrepared { root, wipe } => {
            vec![format!("Output: {} ({})", root.display(), wipe)]
        }
        GenerateEvent::HomeWritten(report) => vec![format_home(report)],
        GenerateEvent::ItemsListed(items) => vec![format!("{} published items", items.len())],
        GenerateEvent::ItemFinished {
            done,
            total,
            report,
        } => vec![format!(
            "[{}/{}] {} \u{2192} {}{}",
            done,
            total,
            item_label(&report.item),
            report.output,
            asset_detail(report)
        )],
        GenerateEvent::ItemFailed {
            done,
            total,
            item,
            error,
        } => vec![
            format!("[{}/{}] FAILED {}", done, total, item_label(item)),
            format!("{}Error: {}", indent(1), error),
        ],
        GenerateEvent::Cancelled { skipped } => {
            vec![format!("Cancelled: {} items not started", skipped)]
        }
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Format the end-of-run summary, listing every failed item.
pub fn format_summary(summary: &RunSummary) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        format!(
            "Mirrored {} of {} items, {} failed",
            summary.succeeded,
            summary.attempted,
            summary.failures.len()
        ),
        format!(
            "Assets: {} copied, {} reused, {} skipped",
            summary.assets_copied, summary.assets_reused, summary.assets_skipped
        ),
    ];
    if summary.cancelled {
        lines.push(format!(
            "Cancelled: {} items not started",
            summary.skipped
        ));
    }
    if !summary.failures.is_empty() {
        lines.push("Failed:".to_string());
        for failure in &summary.failures {
            let item = &failure.item;
            lines.push(format!(
                "{}{} {} {}: {}",
                indent(1),
                item.kind,
                item.id,
                display_title(&item.title),
                failure.error
            ));
        }
    }
    lines
}

pub fn print_summary(summary: &RunSummary) {
    for line in format_summary(summary) {
        println!("{}", line);
    }
}
