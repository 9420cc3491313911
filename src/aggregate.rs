//! Outcome aggregation and summary persistence.
//!
//! The aggregator is the only mutable state shared between concurrently
//! running pipelines. Outcomes are appended as each pipeline finishes, so
//! the record does not depend on whether the scheduler ran sequentially or
//! in groups. [`OutcomeAggregator::finalize`] consumes the aggregator, which
//! makes a second summary for the same run impossible to build.

use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::output::{ConfigSnapshot, Outcome, OutcomeCounts, RunSummary};
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tracing::info;

/// Thread-safe collector of per-document outcomes.
#[derive(Debug)]
pub struct OutcomeAggregator {
    started_at: DateTime<Utc>,
    started: Instant,
    outcomes: Mutex<Vec<Outcome>>,
}

impl Default for OutcomeAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeAggregator {
    /// Start the run clock.
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            outcomes: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Outcome>> {
        // An outcome push cannot leave the vector half-updated.
        self.outcomes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append one outcome.
    pub fn record(&self, outcome: Outcome) {
        self.lock().push(outcome);
    }

    /// Outcomes recorded so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the run and assemble its summary, outcomes in discovery order.
    pub fn finalize(
        self,
        config: &BatchConfig,
        total_documents: usize,
        not_dispatched: usize,
        stopped_early: bool,
    ) -> RunSummary {
        let mut outcomes = self
            .outcomes
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        outcomes.sort_by_key(|o| o.index);

        RunSummary {
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_secs: self.started.elapsed().as_secs_f64(),
            total_documents,
            counts: OutcomeCounts::from_outcomes(&outcomes),
            stopped_early,
            not_dispatched,
            config: ConfigSnapshot::from(config),
            outcomes,
        }
    }
}

/// Write `summary` as pretty JSON to `path`, atomically.
///
/// The JSON goes to a temporary file in the same directory which is then
/// renamed over `path`, so readers never observe a truncated summary.
pub async fn write_summary(summary: &RunSummary, path: &Path) -> Result<(), BatchError> {
    let json = serde_json::to_vec_pretty(summary)
        .map_err(|e| BatchError::Internal(format!("summary serialisation: {e}")))?;
    let target = path.to_path_buf();

    tokio::task::spawn_blocking(move || write_atomic(&target, &json))
        .await
        .map_err(|e| BatchError::Internal(format!("summary writer panicked: {e}")))??;

    info!("Run summary written to {}", path.display());
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BatchError> {
    let fail = |source: std::io::Error| BatchError::SummaryWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(fail)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(fail)?;
    tmp.write_all(bytes).map_err(fail)?;
    tmp.as_file().sync_all().map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;
    Ok(())
}
