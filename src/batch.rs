//! Batch entry points.
//!
//! [`BatchRunner`] wires the stages together:
//!
//! ```text
//! DocumentSource ──▶ ResumabilityPolicy ──▶ Scheduler ──▶ ConversionPipeline
//!                          │ skipped                          │ outcome
//!                          └──────────────▶ OutcomeAggregator ◀┘
//!                                                 │
//!                                     processing_result.json
//! ```
//!
//! Every collaborator is injected, so tests can swap the file-system walk,
//! the skip rule, the remote service or the clock independently.

use crate::aggregate::{write_summary, OutcomeAggregator};
use crate::clock::{SharedSleeper, TokioSleeper};
use crate::config::{ApiConfig, BatchConfig};
use crate::error::BatchError;
use crate::output::{CorpusStatistics, Outcome, RunSummary};
use crate::pipeline::discover::{
    assign_unique_output_dirs, find_collisions, Document, DocumentSource, FsDocumentSource,
};
use crate::pipeline::job::ConversionPipeline;
use crate::pipeline::remote::{MinerUClient, RemoteService};
use crate::pipeline::resume::{MarkdownArtifactPolicy, ResumabilityPolicy};
use crate::scheduler::{Scheduler, StopSignal};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Orchestrates one batch run.
pub struct BatchRunner {
    config: Arc<BatchConfig>,
    remote: Arc<dyn RemoteService>,
    source: Box<dyn DocumentSource>,
    policy: Box<dyn ResumabilityPolicy>,
    sleeper: SharedSleeper,
    stop: StopSignal,
}

impl BatchRunner {
    /// A runner walking `config.input_dir` with the Markdown skip rule and
    /// real sleeping.
    pub fn new(config: BatchConfig, remote: Arc<dyn RemoteService>) -> Self {
        let source = Box::new(FsDocumentSource::from_config(&config));
        Self {
            config: Arc::new(config),
            remote,
            source,
            policy: Box::new(MarkdownArtifactPolicy),
            sleeper: Arc::new(TokioSleeper),
            stop: StopSignal::new(),
        }
    }

    pub fn with_source(mut self, source: Box<dyn DocumentSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_policy(mut self, policy: Box<dyn ResumabilityPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: SharedSleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Handle for requesting a graceful stop from another task.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Discover, filter, convert, and persist the run summary.
    ///
    /// # Errors
    /// Only run-fatal problems are returned: an unreadable input root or a
    /// summary that cannot be written. Per-document failures are recorded in
    /// the returned [`RunSummary`].
    pub async fn run(&self) -> Result<RunSummary, BatchError> {
        let config = &self.config;
        let aggregator = OutcomeAggregator::new();

        // ── Step 1: Discover ─────────────────────────────────────────────
        let mut documents = self.source.discover()?;
        // No-op for the file-system walk; custom sources may still collide.
        assign_unique_output_dirs(&mut documents);
        for c in find_collisions(&documents) {
            warn!(
                "{} sources sanitise to output directory {}; later ones get a numbered suffix",
                c.sources.len(),
                c.output_dir.display()
            );
        }

        // ── Step 2: Filter already-converted documents ───────────────────
        let mut pending: Vec<Document> = Vec::with_capacity(documents.len());
        for doc in &documents {
            if self.policy.is_complete(doc, config.skip_existing) {
                debug!("Skipping {} (output exists)", doc.display_name());
                if let Some(cb) = &config.progress_callback {
                    cb.on_document_skipped(&doc.display_name());
                }
                aggregator.record(Outcome::skipped(doc));
            } else {
                pending.push(doc.clone());
            }
        }
        let skipped = documents.len() - pending.len();

        info!(
            "Found {} documents in {}: {} already converted, {} to process (concurrency {})",
            documents.len(),
            config.input_dir.display(),
            skipped,
            pending.len(),
            config.concurrency_limit
        );
        if let Some(cb) = &config.progress_callback {
            cb.on_run_start(documents.len(), pending.len());
        }

        // ── Step 3: Schedule pipelines ───────────────────────────────────
        let pipeline = ConversionPipeline::new(
            Arc::clone(&self.remote),
            Arc::clone(&self.sleeper),
            Arc::clone(config),
        );
        let scheduler = Scheduler::new(
            config.concurrency_limit,
            config.inter_batch_delay,
            Arc::clone(&self.sleeper),
            self.stop.clone(),
        )
        .with_progress(config.progress_callback.clone());

        let report = scheduler
            .run(&pending, &pipeline, &|o| aggregator.record(o.clone()))
            .await;

        // ── Step 4: Summarise ────────────────────────────────────────────
        let summary = aggregator.finalize(
            config,
            documents.len(),
            report.not_dispatched,
            report.stopped_early,
        );
        write_summary(&summary, &config.summary_path()).await?;

        let c = &summary.counts;
        info!(
            "Run complete in {:.1}s: {} succeeded, {} failed, {} timed out, {} skipped{}",
            summary.duration_secs,
            c.succeeded,
            c.failed,
            c.timed_out,
            c.skipped,
            if summary.stopped_early {
                format!(", {} not dispatched (stopped)", summary.not_dispatched)
            } else {
                String::new()
            }
        );
        if let Some(cb) = &config.progress_callback {
            cb.on_run_complete(c.succeeded, c.failed + c.timed_out);
        }

        Ok(summary)
    }

    /// Offline statistics over the input tree. Never contacts the service.
    pub fn statistics(&self) -> Result<CorpusStatistics, BatchError> {
        corpus_statistics(self.source.as_ref(), self.policy.as_ref())
    }
}

/// Offline statistics: what `source` yields and how much of it `policy`
/// already considers converted. Needs no remote service or credential.
pub fn corpus_statistics(
    source: &dyn DocumentSource,
    policy: &dyn ResumabilityPolicy,
) -> Result<CorpusStatistics, BatchError> {
    let mut documents = source.discover()?;
    assign_unique_output_dirs(&mut documents);
    let mut stats = CorpusStatistics {
        total: documents.len(),
        collisions: find_collisions(&documents),
        ..Default::default()
    };
    for doc in &documents {
        // Statistics report what exists on disk, regardless of skip_existing.
        let done = policy.is_complete(doc, true);
        let entry = stats.by_subfolder.entry(doc.subfolder()).or_default();
        entry.total += 1;
        if done {
            entry.processed += 1;
            stats.processed += 1;
        }
    }
    stats.remaining = stats.total - stats.processed;
    Ok(stats)
}

/// Convert everything under `config.input_dir` against the MinerU cloud API.
///
/// This is the primary entry point for the library.
///
/// # Example
/// ```rust,no_run
/// use mineru_batch::{run_batch, ApiConfig, BatchConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = BatchConfig::builder().input_dir("pdfs").concurrency_limit(3).build()?;
/// let api = ApiConfig::new(std::env::var("MINERU_API_KEY")?);
/// let summary = run_batch(config, &api).await?;
/// println!("{} succeeded, {} failed", summary.counts.succeeded, summary.counts.failed);
/// # Ok(())
/// # }
/// ```
pub async fn run_batch(config: BatchConfig, api: &ApiConfig) -> Result<RunSummary, BatchError> {
    let remote = Arc::new(MinerUClient::new(api)?);
    BatchRunner::new(config, remote).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::remote::{BatchStatus, RemoteError, UploadTarget, UploadTargetRequest};
    use async_trait::async_trait;
    use std::path::Path;

    /// A service that must never be called.
    struct Unreachable;

    #[async_trait]
    impl RemoteService for Unreachable {
        async fn request_upload_target(
            &self,
            _request: &UploadTargetRequest,
        ) -> Result<UploadTarget, RemoteError> {
            panic!("statistics must not contact the service")
        }
        async fn transfer_bytes(&self, _url: &str, _bytes: Vec<u8>) -> Result<(), RemoteError> {
            panic!("statistics must not contact the service")
        }
        async fn get_batch_status(&self, _batch_id: &str) -> Result<BatchStatus, RemoteError> {
            panic!("statistics must not contact the service")
        }
        async fn fetch_artifact(&self, _url: &str) -> Result<Vec<u8>, RemoteError> {
            panic!("statistics must not contact the service")
        }
    }

    fn write(path: &Path, body: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn statistics_counts_processed_per_subfolder() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("pdfs");
        let output = dir.path().join("out");
        write(&input.join("A/one.pdf"), "%PDF");
        write(&input.join("A/two.pdf"), "%PDF");
        write(&input.join("B/three.pdf"), "%PDF");
        write(&input.join("root.pdf"), "%PDF");
        write(&output.join("A/one/full.md"), "# done");

        let config = BatchConfig::builder()
            .input_dir(&input)
            .output_dir(&output)
            .skip_existing(false)
            .build()
            .unwrap();
        let stats = BatchRunner::new(config, Arc::new(Unreachable)).statistics().unwrap();

        assert_eq!(stats.total, 4);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.remaining, 3);
        assert_eq!(stats.by_subfolder["A"].total, 2);
        assert_eq!(stats.by_subfolder["A"].processed, 1);
        assert_eq!(stats.by_subfolder["B"].total, 1);
        assert_eq!(stats.by_subfolder["."].total, 1);
        assert!(stats.collisions.is_empty());
    }

    #[test]
    fn corpus_statistics_needs_no_service() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("pdfs");
        let output = dir.path().join("out");
        write(&input.join("a:b.pdf"), "%PDF");
        write(&input.join("a_b.pdf"), "%PDF");
        // The second source lands in the suffixed directory.
        write(&output.join("a_b_2/full.md"), "# done");

        let source = FsDocumentSource::new(&input, &output, vec!["pdf".into()]);
        let stats = corpus_statistics(&source, &MarkdownArtifactPolicy).unwrap();

        assert_eq!(stats.total, 2);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.remaining, 1);
        assert_eq!(stats.collisions.len(), 1);
        assert_eq!(stats.collisions[0].output_dir, output.join("a_b"));
        assert_eq!(stats.collisions[0].sources.len(), 2);
    }

    #[tokio::test]
    async fn missing_input_dir_is_fatal_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = BatchConfig::builder()
            .input_dir(dir.path().join("absent"))
            .output_dir(dir.path().join("out"))
            .build()
            .unwrap();
        let err = BatchRunner::new(config, Arc::new(Unreachable)).run().await.unwrap_err();
        assert!(matches!(err, BatchError::InputDirNotFound { .. }));
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn empty_tree_writes_empty_summary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pdfs")).unwrap();
        let config = BatchConfig::builder()
            .input_dir(dir.path().join("pdfs"))
            .output_dir(dir.path().join("out"))
            .build()
            .unwrap();

        let summary = BatchRunner::new(config, Arc::new(Unreachable)).run().await.unwrap();

        assert_eq!(summary.total_documents, 0);
        assert!(summary.outcomes.is_empty());
        assert!(dir.path().join("out/processing_result.json").is_file());
    }
}
