//! The per-document pipeline: upload → poll → retrieve.
//!
//! Each document gets exactly one [`RemoteJob`], owned by the pipeline
//! future processing it. The job's [`JobState`] only ever moves forward:
//!
//! ```text
//! Pending ─▶ Uploading ─▶ Submitted ─▶ Polling ─┬─▶ Completed
//!                │                      ▲  │    ├─▶ Failed
//!                └──────▶ Failed        └──┘    └─▶ TimedOut
//! ```
//!
//! A `Completed` job still yields a `Failed` outcome when its archive cannot
//! be downloaded or unpacked; the job itself stays `Completed` because the
//! remote side did finish.

use crate::clock::SharedSleeper;
use crate::config::BatchConfig;
use crate::error::DocumentError;
use crate::output::Outcome;
use crate::pipeline::discover::Document;
use crate::pipeline::poll::JobPoller;
use crate::pipeline::remote::RemoteService;
use crate::pipeline::{retrieve, upload};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Lifecycle of a remote conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Uploading,
    Submitted,
    Polling,
    Completed,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::TimedOut)
    }

    /// Whether `self → next` is a legal move.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Uploading)
                | (Uploading, Submitted)
                | (Uploading, Failed)
                | (Submitted, Polling)
                | (Polling, Polling)
                | (Polling, Completed)
                | (Polling, Failed)
                | (Polling, TimedOut)
        )
    }
}

/// Remote-side bookkeeping for one document in one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteJob {
    /// Discovery index of the owning document.
    pub document_index: usize,
    pub batch_id: Option<String>,
    pub state: JobState,
    /// Status checks issued so far; never exceeds `max_poll_attempts`.
    pub attempt_count: u32,
    pub last_error: Option<DocumentError>,
}

impl RemoteJob {
    pub fn new(document_index: usize) -> Self {
        Self {
            document_index,
            batch_id: None,
            state: JobState::Pending,
            attempt_count: 0,
            last_error: None,
        }
    }

    /// Move to `next`. Illegal moves are logged and ignored.
    pub fn advance(&mut self, next: JobState) -> bool {
        let ok = self.state.can_transition_to(next);
        debug_assert!(ok, "illegal job transition {:?} → {:?}", self.state, next);
        if ok {
            self.state = next;
        } else {
            error!(
                "Document #{}: ignoring illegal job transition {:?} → {:?}",
                self.document_index, self.state, next
            );
        }
        ok
    }

    /// Enter a terminal failure state, remembering the error. Returns it for `?`-style use.
    pub fn fail(&mut self, terminal: JobState, err: DocumentError) -> DocumentError {
        self.advance(terminal);
        self.last_error = Some(err.clone());
        err
    }
}

/// Something that turns a document into its final [`Outcome`].
///
/// Must never panic or return early: every call yields exactly one outcome.
#[async_trait]
pub trait DocumentPipeline: Send + Sync {
    async fn process(&self, doc: &Document) -> Outcome;
}

/// The MinerU pipeline: upload, poll with a bounded number of attempts,
/// then fetch and unpack the result archive.
pub struct ConversionPipeline {
    remote: Arc<dyn RemoteService>,
    sleeper: SharedSleeper,
    config: Arc<BatchConfig>,
}

impl ConversionPipeline {
    pub fn new(remote: Arc<dyn RemoteService>, sleeper: SharedSleeper, config: Arc<BatchConfig>) -> Self {
        Self {
            remote,
            sleeper,
            config,
        }
    }

    /// Run the three stages, leaving the job in a terminal state.
    pub async fn run_job(&self, doc: &Document, job: &mut RemoteJob) -> Result<PathBuf, DocumentError> {
        let label = doc.display_name();
        let remote = self.remote.as_ref();

        job.advance(JobState::Uploading);
        let batch_id = match upload::upload(remote, doc, &self.config).await {
            Ok(id) => id,
            Err(e) => {
                warn!("{}: {}", label, e);
                return Err(job.fail(JobState::Failed, e));
            }
        };
        job.batch_id = Some(batch_id);
        job.advance(JobState::Submitted);

        let poller = JobPoller {
            remote,
            sleeper: self.sleeper.as_ref(),
            max_attempts: self.config.max_poll_attempts,
            interval: self.config.poll_interval,
            progress: self.config.progress_callback.as_ref(),
        };
        let artifact_url = poller.await_completion(job, &doc.file_name(), &label).await?;

        match retrieve::retrieve(remote, &artifact_url, &doc.output_dir).await {
            Ok(path) => Ok(path),
            Err(e) => {
                warn!("{}: {}", label, e);
                job.last_error = Some(e.clone());
                Err(e)
            }
        }
    }
}

#[async_trait]
impl DocumentPipeline for ConversionPipeline {
    async fn process(&self, doc: &Document) -> Outcome {
        let start = Instant::now();
        let label = doc.display_name();
        if let Some(cb) = &self.config.progress_callback {
            cb.on_document_start(&label);
        }

        let mut job = RemoteJob::new(doc.index);
        let result = self.run_job(doc, &mut job).await;

        let outcome = match result {
            Ok(path) => {
                info!("{}: converted → {}", label, path.display());
                Outcome::succeeded(doc, path)
            }
            Err(e) => Outcome::failed(doc, e),
        }
        .with_batch_id(job.batch_id.clone())
        .with_poll_attempts(job.attempt_count)
        .with_duration_ms(start.elapsed().as_millis() as u64);

        if let Some(cb) = &self.config.progress_callback {
            cb.on_document_complete(&label, outcome.state);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_legal() {
        use JobState::*;
        let path = [Pending, Uploading, Submitted, Polling, Polling, Completed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} → {:?}", pair[0], pair[1]);
        }
        assert!(Uploading.can_transition_to(Failed));
        assert!(Polling.can_transition_to(TimedOut));
    }

    #[test]
    fn terminal_states_never_move() {
        use JobState::*;
        let all = [Pending, Uploading, Submitted, Polling, Completed, Failed, TimedOut];
        for terminal in [Completed, Failed, TimedOut] {
            assert!(terminal.is_terminal());
            for next in all {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn backwards_transitions_are_illegal() {
        use JobState::*;
        assert!(!Polling.can_transition_to(Submitted));
        assert!(!Submitted.can_transition_to(Uploading));
        assert!(!Pending.can_transition_to(Polling));
        assert!(!Submitted.can_transition_to(Failed));
    }

    #[test]
    fn fail_records_error() {
        let mut job = RemoteJob::new(3);
        job.advance(JobState::Uploading);
        let err = job.fail(
            JobState::Failed,
            DocumentError::Poll {
                detail: "x".into(),
            },
        );
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.last_error, Some(err));
    }
}
