//! Resumability: decide whether a document's prior output already counts as
//! done, and remove half-written output so it never does by accident.
//!
//! The check is a pure, synchronous look at the file system. No network call
//! is ever made to decide a skip, so rerunning an interrupted batch costs
//! nothing for the documents that finished.

use crate::pipeline::discover::Document;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Decides whether a document must be (re)processed.
pub trait ResumabilityPolicy: Send + Sync {
    /// True when prior output satisfies `doc` and it can be skipped.
    ///
    /// Must return false whenever `skip_existing` is false.
    fn is_complete(&self, doc: &Document, skip_existing: bool) -> bool;
}

/// A document is complete when its output directory holds at least one
/// non-empty Markdown file, searched recursively.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownArtifactPolicy;

impl ResumabilityPolicy for MarkdownArtifactPolicy {
    fn is_complete(&self, doc: &Document, skip_existing: bool) -> bool {
        skip_existing && has_markdown_artifact(&doc.output_dir)
    }
}

/// True when `dir` exists and contains a non-empty `*.md` file at any depth.
pub fn has_markdown_artifact(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| x.eq_ignore_ascii_case("md"))
        })
        .any(|e| e.metadata().map(|m| m.len() > 0).unwrap_or(false))
}

/// Remove one document's output directory, if present.
///
/// Only `dir` itself is touched; siblings and parents are left alone.
/// Failures are logged, not returned: a leftover directory without Markdown
/// is still treated as incomplete by [`MarkdownArtifactPolicy`].
pub async fn cleanup_partial_output(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Removed partial output {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial output {}: {}", dir.display(), e),
    }
}
