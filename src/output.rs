//! Result types produced by a batch run.
//!
//! * [`Outcome`] — the final word on one document, recorded exactly once.
//! * [`RunSummary`] — every outcome plus counts and a configuration snapshot;
//!   serialised to `processing_result.json` under the output root.
//! * [`CorpusStatistics`] — an offline view of the input tree (what is done,
//!   what is left, which sources collide on the same output directory).

use crate::config::BatchConfig;
use crate::error::DocumentError;
use crate::pipeline::discover::Document;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// ── Outcome ──────────────────────────────────────────────────────────────

/// Terminal state of a document within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeState {
    /// Prior output already satisfied the document; nothing was sent.
    Skipped,
    /// Converted and unpacked in this run.
    Succeeded,
    /// Upload, remote processing or retrieval failed.
    Failed,
    /// Still in progress after the last allowed poll.
    TimedOut,
}

impl OutcomeState {
    /// True for `Failed` and `TimedOut`.
    pub fn is_failure(self) -> bool {
        matches!(self, OutcomeState::Failed | OutcomeState::TimedOut)
    }
}

impl fmt::Display for OutcomeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutcomeState::Skipped => "skipped",
            OutcomeState::Succeeded => "succeeded",
            OutcomeState::Failed => "failed",
            OutcomeState::TimedOut => "timed_out",
        })
    }
}

/// Final result for one document.
///
/// `failure` is set iff the state is `Failed` or `TimedOut`; `output_path`
/// is set iff the state is `Succeeded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Position in discovery order; the summary is sorted by it.
    pub index: usize,
    pub source_path: PathBuf,
    pub relative_path: PathBuf,
    pub logical_name: String,
    /// First component of `relative_path`, or `"."` for files at the root.
    pub subfolder: String,
    pub state: OutcomeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<DocumentError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Remote batch identifier, once the upload succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub poll_attempts: u32,
    pub duration_ms: u64,
}

impl Outcome {
    fn base(doc: &Document, state: OutcomeState) -> Self {
        Self {
            index: doc.index,
            source_path: doc.source_path.clone(),
            relative_path: doc.relative_path.clone(),
            logical_name: doc.logical_name.clone(),
            subfolder: doc.subfolder(),
            state,
            failure: None,
            output_path: None,
            batch_id: None,
            poll_attempts: 0,
            duration_ms: 0,
        }
    }

    /// A document the resumability filter accepted as already done.
    pub fn skipped(doc: &Document) -> Self {
        Self::base(doc, OutcomeState::Skipped)
    }

    /// A document converted in this run.
    pub fn succeeded(doc: &Document, output_path: PathBuf) -> Self {
        let mut o = Self::base(doc, OutcomeState::Succeeded);
        o.output_path = Some(output_path);
        o
    }

    /// A document that failed or timed out; the state follows the error.
    pub fn failed(doc: &Document, failure: DocumentError) -> Self {
        let state = match failure {
            DocumentError::TimedOut { .. } => OutcomeState::TimedOut,
            _ => OutcomeState::Failed,
        };
        let mut o = Self::base(doc, state);
        o.failure = Some(failure);
        o
    }

    pub fn with_batch_id(mut self, batch_id: Option<String>) -> Self {
        self.batch_id = batch_id;
        self
    }

    pub fn with_poll_attempts(mut self, attempts: u32) -> Self {
        self.poll_attempts = attempts;
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    /// Human-readable failure reason, including the phase.
    pub fn failure_reason(&self) -> Option<String> {
        self.failure
            .as_ref()
            .map(|e| format!("[{}] {}", e.phase(), e))
    }
}

// ── Summary ──────────────────────────────────────────────────────────────

/// Number of outcomes per final state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl OutcomeCounts {
    pub fn add(&mut self, state: OutcomeState) {
        match state {
            OutcomeState::Skipped => self.skipped += 1,
            OutcomeState::Succeeded => self.succeeded += 1,
            OutcomeState::Failed => self.failed += 1,
            OutcomeState::TimedOut => self.timed_out += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.skipped + self.succeeded + self.failed + self.timed_out
    }

    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a Outcome>) -> Self {
        let mut counts = Self::default();
        for o in outcomes {
            counts.add(o.state);
        }
        counts
    }
}

/// The batch settings a summary was produced with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub concurrency_limit: usize,
    pub inter_batch_delay_secs: f64,
    pub max_poll_attempts: u32,
    pub poll_interval_secs: f64,
    pub skip_existing: bool,
    pub ocr_enabled: bool,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_ranges: Option<String>,
}

impl From<&BatchConfig> for ConfigSnapshot {
    fn from(c: &BatchConfig) -> Self {
        Self {
            input_dir: c.input_dir.clone(),
            output_dir: c.output_dir.clone(),
            concurrency_limit: c.concurrency_limit,
            inter_batch_delay_secs: c.inter_batch_delay.as_secs_f64(),
            max_poll_attempts: c.max_poll_attempts,
            poll_interval_secs: c.poll_interval.as_secs_f64(),
            skip_existing: c.skip_existing,
            ocr_enabled: c.ocr_enabled,
            language: c.language.clone(),
            page_ranges: c.page_ranges.clone(),
        }
    }
}

/// Everything a run did, written once at the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    /// Documents discovered, including skipped and never-dispatched ones.
    pub total_documents: usize,
    pub counts: OutcomeCounts,
    /// True when a stop request prevented later groups from starting.
    pub stopped_early: bool,
    /// Documents that had no outcome because the run was stopped.
    pub not_dispatched: usize,
    pub config: ConfigSnapshot,
    /// One entry per recorded document, in discovery order.
    pub outcomes: Vec<Outcome>,
}

impl RunSummary {
    /// Outcomes in the `Failed` or `TimedOut` state.
    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| o.state.is_failure())
    }

    /// True when no document failed or timed out.
    pub fn is_clean(&self) -> bool {
        self.counts.failed == 0 && self.counts.timed_out == 0
    }
}

// ── Corpus statistics ────────────────────────────────────────────────────

/// Done/total counts for one top-level subfolder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubfolderStats {
    pub total: usize,
    pub processed: usize,
}

/// Several sources whose names sanitise to the same output directory.
/// All but the first are written to numbered siblings of `output_dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputCollision {
    pub output_dir: PathBuf,
    pub sources: Vec<PathBuf>,
}

/// Offline view of the input tree; no remote calls are involved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusStatistics {
    pub total: usize,
    pub processed: usize,
    pub remaining: usize,
    pub by_subfolder: BTreeMap<String, SubfolderStats>,
    pub collisions: Vec<OutputCollision>,
}

impl CorpusStatistics {
    /// Share of documents already processed, in percent.
    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed as f64 * 100.0 / self.total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn doc(index: usize, rel: &str) -> Document {
        Document::new(index, Path::new("/in"), Path::new("/out"), Path::new(rel))
    }

    #[test]
    fn failed_outcome_state_follows_error() {
        let d = doc(0, "a/x.pdf");
        let t = Outcome::failed(
            &d,
            DocumentError::TimedOut {
                attempts: 3,
                waited_secs: 30,
            },
        );
        assert_eq!(t.state, OutcomeState::TimedOut);
        let f = Outcome::failed(
            &d,
            DocumentError::RemoteFailed {
                message: "encrypted".into(),
            },
        );
        assert_eq!(f.state, OutcomeState::Failed);
        assert!(f.output_path.is_none());
        assert_eq!(f.failure_reason().unwrap(), "[poll] remote job failed: encrypted");
    }

    #[test]
    fn succeeded_outcome_has_path_and_no_failure() {
        let d = doc(2, "x.pdf");
        let o = Outcome::succeeded(&d, PathBuf::from("/out/x/x.md"));
        assert_eq!(o.state, OutcomeState::Succeeded);
        assert!(o.failure.is_none());
        assert_eq!(o.subfolder, ".");
        assert_eq!(o.index, 2);
    }

    #[test]
    fn counts_tally_states() {
        let d = doc(0, "x.pdf");
        let outcomes = vec![
            Outcome::skipped(&d),
            Outcome::succeeded(&d, PathBuf::from("p")),
            Outcome::failed(&d, DocumentError::Poll { detail: "401".into() }),
            Outcome::failed(
                &d,
                DocumentError::TimedOut {
                    attempts: 1,
                    waited_secs: 0,
                },
            ),
        ];
        let c = OutcomeCounts::from_outcomes(&outcomes);
        assert_eq!(
            c,
            OutcomeCounts {
                skipped: 1,
                succeeded: 1,
                failed: 1,
                timed_out: 1
            }
        );
        assert_eq!(c.total(), 4);
    }

    #[test]
    fn outcome_json_omits_empty_fields() {
        let o = Outcome::skipped(&doc(0, "sub/x.pdf"));
        let json = serde_json::to_string(&o).unwrap();
        assert!(json.contains(r#""state":"skipped""#));
        assert!(json.contains(r#""subfolder":"sub""#));
        assert!(!json.contains("failure"));
        assert!(!json.contains("output_path"));
    }

    #[test]
    fn progress_percent_handles_empty_corpus() {
        assert_eq!(CorpusStatistics::default().progress_percent(), 100.0);
        let s = CorpusStatistics {
            total: 4,
            processed: 1,
            remaining: 3,
            ..Default::default()
        };
        assert_eq!(s.progress_percent(), 25.0);
    }
}
