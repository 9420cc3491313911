//! # mineru-batch
//!
//! Convert whole directory trees of PDFs to Markdown through the MinerU
//! cloud extraction API, resumably and under a concurrency ceiling.
//!
//! ## Why this crate?
//!
//! The service converts one upload at a time and answers asynchronously:
//! every document has to be uploaded, polled for minutes, then downloaded
//! and unpacked. Doing that for thousands of files by hand means losing
//! track of what finished, what failed and what is still running. This
//! crate owns that bookkeeping: it mirrors the input tree into an output
//! tree, skips documents that already have Markdown, runs a bounded number
//! of jobs at once, and writes a summary of every document's fate.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input tree
//!  │
//!  ├─ 1. Discover  walk the tree, sanitise names, mirror into the output tree
//!  ├─ 2. Resume    skip documents whose output already holds Markdown
//!  ├─ 3. Schedule  groups of `concurrency_limit`, barrier, delay between groups
//!  ├─ 4. Upload    reserve a batch, PUT the bytes
//!  ├─ 5. Poll      fixed interval, bounded attempts → done / failed / timed out
//!  ├─ 6. Retrieve  download the zip, unpack in spawn_blocking
//!  └─ 7. Summary   processing_result.json, written atomically
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mineru_batch::{run_batch, ApiConfig, BatchConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::builder()
//!         .input_dir("pdfs")
//!         .output_dir("outputs_api")
//!         .concurrency_limit(3)
//!         .build()?;
//!     let api = ApiConfig::new(std::env::var("MINERU_API_KEY")?);
//!     let summary = run_batch(config, &api).await?;
//!     eprintln!(
//!         "{} converted, {} skipped, {} failed",
//!         summary.counts.succeeded, summary.counts.skipped, summary.counts.failed
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mineru-batch` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! mineru-batch = { version = "0.1", default-features = false }
//! ```
//!
//! ## Guarantees
//!
//! * Every document that passes the resumability filter gets exactly one
//!   [`Outcome`] in the summary.
//! * At most `concurrency_limit` pipelines are active at any instant.
//! * Submission is at-least-once: a document interrupted mid-flight is
//!   uploaded again on the next run, and skipped once its Markdown exists.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod aggregate;
pub mod batch;
pub mod clock;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod scheduler;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use aggregate::OutcomeAggregator;
pub use batch::{corpus_statistics, run_batch, BatchRunner};
pub use clock::{Sleeper, TokioSleeper};
pub use config::{ApiConfig, BatchConfig, BatchConfigBuilder, SUPPORTED_LANGUAGES};
pub use error::{BatchError, DocumentError, Phase, UploadErrorKind};
pub use output::{CorpusStatistics, Outcome, OutcomeCounts, OutcomeState, RunSummary};
pub use pipeline::discover::{assign_unique_output_dirs, Document, DocumentSource, FsDocumentSource};
pub use pipeline::job::{DocumentPipeline, JobState, RemoteJob};
pub use pipeline::remote::{MinerUClient, RemoteError, RemoteService};
pub use pipeline::resume::{MarkdownArtifactPolicy, ResumabilityPolicy};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use scheduler::StopSignal;
