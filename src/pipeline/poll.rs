//! Job polling: check a submitted batch at a fixed interval until it
//! finishes, fails, or runs out of attempts.
//!
//! ## Why no exponential backoff?
//!
//! A conversion takes anywhere from seconds to half an hour and the service
//! gives no estimate. A fixed interval with an attempt ceiling keeps the
//! worst case easy to state (`max_poll_attempts × poll_interval`) and easy to
//! raise on the next run. Rate-limit answers are treated as "still running"
//! for the same reason: the next tick is already a back-off.

use crate::clock::Sleeper;
use crate::error::DocumentError;
use crate::pipeline::job::{JobState, RemoteJob};
use crate::pipeline::remote::{BatchStatus, ExtractProgress, RemoteError, RemoteService};
use crate::progress::ProgressCallback;
use std::time::Duration;
use tracing::{debug, warn};

/// What one status check says about a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Queued, running, or the check itself was throttled.
    InProgress {
        state: String,
        progress: Option<ExtractProgress>,
    },
    /// Finished; the archive can be fetched from `artifact_url`.
    Done { artifact_url: String },
    /// The service gave up on the document.
    Error { message: String },
}

/// Interpret a batch status for the entry named `file_name`.
///
/// Falls back to the first entry when no name matches (single-file batches),
/// and to `InProgress` when the service has not listed the file yet.
pub fn classify(status: &BatchStatus, file_name: &str) -> RemoteStatus {
    let entry = status
        .extract_result
        .iter()
        .find(|r| r.file_name.as_deref() == Some(file_name))
        .or_else(|| status.extract_result.first());

    let Some(entry) = entry else {
        return RemoteStatus::InProgress {
            state: "waiting-file".into(),
            progress: None,
        };
    };

    match entry.state.as_str() {
        "done" => match entry.full_zip_url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => RemoteStatus::Done {
                artifact_url: url.to_string(),
            },
            None => RemoteStatus::Error {
                message: "job finished without a result archive URL".into(),
            },
        },
        "failed" => RemoteStatus::Error {
            message: entry
                .err_msg
                .as_deref()
                .filter(|m| !m.is_empty())
                .unwrap_or("unknown error")
                .to_string(),
        },
        other => RemoteStatus::InProgress {
            state: other.to_string(),
            progress: entry.extract_progress,
        },
    }
}

/// Issue one status check.
///
/// Transient transport failures and rate limiting count as `InProgress`;
/// anything else (bad credential, unknown batch, malformed body) is a
/// [`DocumentError::Poll`].
pub async fn poll_once(
    remote: &dyn RemoteService,
    batch_id: &str,
    file_name: &str,
) -> Result<RemoteStatus, DocumentError> {
    match remote.get_batch_status(batch_id).await {
        Ok(status) => Ok(classify(&status, file_name)),
        Err(RemoteError::RateLimited { retry_after_secs }) => {
            warn!(
                "Rate limited while polling batch {} (retry-after: {:?})",
                batch_id, retry_after_secs
            );
            Ok(RemoteStatus::InProgress {
                state: "rate-limited".into(),
                progress: None,
            })
        }
        Err(e) if e.is_transient() => {
            warn!("Status check for batch {} failed, will retry: {}", batch_id, e);
            Ok(RemoteStatus::InProgress {
                state: "unreachable".into(),
                progress: None,
            })
        }
        Err(e) => Err(DocumentError::Poll {
            detail: e.to_string(),
        }),
    }
}

/// Drives a [`RemoteJob`] through the polling states.
pub struct JobPoller<'a> {
    pub remote: &'a dyn RemoteService,
    pub sleeper: &'a dyn Sleeper,
    pub max_attempts: u32,
    pub interval: Duration,
    pub progress: Option<&'a ProgressCallback>,
}

impl JobPoller<'_> {
    /// Poll until the job leaves `Polling`; returns the artifact URL on success.
    ///
    /// The job must be `Submitted` with a batch id. On return it is
    /// `Completed`, `Failed` or `TimedOut`, and `attempt_count` equals the
    /// number of status checks issued.
    pub async fn await_completion(
        &self,
        job: &mut RemoteJob,
        file_name: &str,
        label: &str,
    ) -> Result<String, DocumentError> {
        let batch_id = job.batch_id.clone().unwrap_or_default();
        job.advance(JobState::Polling);

        loop {
            let polled = poll_once(self.remote, &batch_id, file_name).await;
            job.attempt_count += 1;
            let attempt = job.attempt_count;

            match polled {
                Err(e) => {
                    warn!("{}: {}", label, e);
                    return Err(job.fail(JobState::Failed, e));
                }
                Ok(RemoteStatus::Done { artifact_url }) => {
                    debug!("{}: done after {} polls", label, attempt);
                    job.advance(JobState::Completed);
                    return Ok(artifact_url);
                }
                Ok(RemoteStatus::Error { message }) => {
                    warn!("{}: remote processing failed: {}", label, message);
                    return Err(job.fail(JobState::Failed, DocumentError::RemoteFailed { message }));
                }
                Ok(RemoteStatus::InProgress { state, progress }) => {
                    match progress.filter(|p| p.total_pages > 0) {
                        Some(p) => {
                            debug!(
                                "{}: {} ({}/{} pages), poll {}/{}",
                                label, state, p.extracted_pages, p.total_pages, attempt, self.max_attempts
                            );
                            if let Some(cb) = self.progress {
                                cb.on_document_progress(label, p.extracted_pages, p.total_pages);
                            }
                        }
                        None => debug!("{}: {}, poll {}/{}", label, state, attempt, self.max_attempts),
                    }

                    if attempt >= self.max_attempts {
                        let waited_secs = self.interval.as_secs() * u64::from(attempt - 1);
                        warn!(
                            "{}: still '{}' after {} polls (~{}s), giving up",
                            label, state, attempt, waited_secs
                        );
                        return Err(job.fail(
                            JobState::TimedOut,
                            DocumentError::TimedOut {
                                attempts: attempt,
                                waited_secs,
                            },
                        ));
                    }
                    job.advance(JobState::Polling);
                    self.sleeper.sleep(self.interval).await;
                }
            }
        }
    }
}
