//! Progress-callback trait for batch run events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive events
//! as the scheduler dispatches groups and each document moves through upload,
//! polling and retrieval.
//!
//! # Why callbacks instead of channels?
//!
//! The callback is the least-invasive integration point: the CLI drives an
//! `indicatif` bar from it, a service could forward events to a database
//! record, and the library never learns which. The trait is `Send + Sync`
//! because members of a group run concurrently.
//!
//! # Example
//!
//! ```rust
//! use mineru_batch::{BatchConfig, BatchProgressCallback, OutcomeState};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, name: &str, state: OutcomeState) {
//!         let n = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("#{n} {name}: {state}");
//!     }
//! }
//!
//! let config = BatchConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { finished: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::OutcomeState;
use std::sync::Arc;

/// Called by the batch runner as documents progress.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// With `concurrency_limit > 1`, the per-document methods may be called
/// concurrently for different documents of the same group.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once after discovery and filtering.
    ///
    /// # Arguments
    /// * `total`      — documents discovered
    /// * `to_process` — documents that will be dispatched
    fn on_run_start(&self, total: usize, to_process: usize) {
        let _ = (total, to_process);
    }

    /// Called for every document the resumability filter skips.
    fn on_document_skipped(&self, name: &str) {
        let _ = name;
    }

    /// Called before a group is launched.
    ///
    /// # Arguments
    /// * `group_index` — 1-indexed group number
    /// * `group_count` — total number of groups
    /// * `size`        — members in this group
    fn on_group_start(&self, group_index: usize, group_count: usize, size: usize) {
        let _ = (group_index, group_count, size);
    }

    /// Called when a document's pipeline begins uploading.
    fn on_document_start(&self, name: &str) {
        let _ = name;
    }

    /// Called after each status check that reported page progress.
    ///
    /// # Arguments
    /// * `extracted_pages` — pages the service has finished
    /// * `total_pages`     — pages in the document
    fn on_document_progress(&self, name: &str, extracted_pages: u32, total_pages: u32) {
        let _ = (name, extracted_pages, total_pages);
    }

    /// Called once a document reaches its final state.
    fn on_document_complete(&self, name: &str, state: OutcomeState) {
        let _ = (name, state);
    }

    /// Called once after the summary has been assembled.
    ///
    /// # Arguments
    /// * `succeeded` — documents converted in this run
    /// * `failed`    — documents that failed or timed out
    fn on_run_complete(&self, succeeded: usize, failed: usize) {
        let _ = (succeeded, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        skipped: AtomicUsize,
        succeeded: AtomicUsize,
        failed: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_document_start(&self, _name: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_skipped(&self, _name: &str) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _name: &str, state: OutcomeState) {
            match state {
                OutcomeState::Succeeded => self.succeeded.fetch_add(1, Ordering::SeqCst),
                _ => self.failed.fetch_add(1, Ordering::SeqCst),
            };
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(5, 3);
        cb.on_document_skipped("a");
        cb.on_group_start(1, 2, 2);
        cb.on_document_start("b");
        cb.on_document_progress("b", 3, 10);
        cb.on_document_complete("b", OutcomeState::Failed);
        cb.on_run_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_document_skipped("done-already");
        tracker.on_document_start("a");
        tracker.on_document_complete("a", OutcomeState::Succeeded);
        tracker.on_document_start("b");
        tracker.on_document_complete("b", OutcomeState::TimedOut);

        assert_eq!(tracker.skipped.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.succeeded.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_run_start(10, 10);
        cb.on_group_start(1, 10, 1);
    }
}
