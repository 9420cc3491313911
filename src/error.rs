//! Error types for the mineru-batch library.
//!
//! Two distinct error types reflect two distinct failure scopes:
//!
//! * [`BatchError`] — **Fatal**: the run cannot start or cannot be recorded
//!   (input root unreadable, invalid configuration, missing credential,
//!   summary file not writable). Returned as `Err(BatchError)` from
//!   [`crate::batch::BatchRunner::run`].
//!
//! * [`DocumentError`] — **Non-fatal**: one document failed (upload rejected,
//!   remote job failed, polling timed out, archive corrupt) while every other
//!   document carries on. Stored inside [`crate::output::Outcome`] so the run
//!   summary can enumerate every failure with the phase it happened in.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the mineru-batch library.
///
/// Per-document failures use [`DocumentError`] and never abort a run.
#[derive(Debug, Error)]
pub enum BatchError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input root does not exist.
    #[error("Input directory not found: '{path}'\nCheck --input-dir points at your PDF tree.")]
    InputDirNotFound { path: PathBuf },

    /// The input root exists but cannot be listed.
    #[error("Cannot read input directory '{path}': {source}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No API token was supplied.
    #[error(
        "No MinerU API key found.\n\
Set MINERU_API_KEY, pass --api-key, or put the token in ./token.txt."
    )]
    MissingCredential,

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write the run summary.
    #[error("Failed to write run summary '{path}': {source}")]
    SummaryWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Whether an upload failure is worth retrying in a later run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadErrorKind {
    /// Network hiccup, timeout, 5xx or rate limit.
    Transient,
    /// Rejected file, bad credential or malformed response.
    Fatal,
}

/// The pipeline phase a [`DocumentError`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Upload,
    Poll,
    Retrieve,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::Upload => "upload",
            Phase::Poll => "poll",
            Phase::Retrieve => "retrieve",
        })
    }
}

/// A non-fatal error for a single document.
///
/// Stored in [`crate::output::Outcome::failure`]. The run continues with
/// the remaining documents.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentError {
    /// Local I/O failed before anything was sent (source file unreadable).
    #[error("upload: local I/O error: {detail}")]
    Io { detail: String },

    /// Upload-target acquisition or byte transfer failed.
    #[error("upload failed ({kind:?}): {detail}")]
    Upload {
        // `kind` is the enum tag.
        #[serde(rename = "upload_kind")]
        kind: UploadErrorKind,
        detail: String,
    },

    /// A status check failed in a way that polling again cannot fix.
    #[error("poll failed: {detail}")]
    Poll { detail: String },

    /// The service reported the job as failed.
    #[error("remote job failed: {message}")]
    RemoteFailed { message: String },

    /// The job was still running after the last allowed poll.
    #[error("timed out after {attempts} polls (~{waited_secs}s); rerun with a higher --max-poll-attempts")]
    TimedOut { attempts: u32, waited_secs: u64 },

    /// The job succeeded but its archive could not be downloaded or unpacked.
    #[error("retrieval failed: {detail}")]
    Retrieval { detail: String },
}

impl DocumentError {
    /// The pipeline phase this error belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            DocumentError::Io { .. } | DocumentError::Upload { .. } => Phase::Upload,
            DocumentError::Poll { .. }
            | DocumentError::RemoteFailed { .. }
            | DocumentError::TimedOut { .. } => Phase::Poll,
            DocumentError::Retrieval { .. } => Phase::Retrieve,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_error_display_names_phase() {
        let e = DocumentError::Upload {
            kind: UploadErrorKind::Fatal,
            detail: "HTTP 403".into(),
        };
        let msg = e.to_string();
        assert!(msg.starts_with("upload"), "got: {msg}");
        assert!(msg.contains("Fatal"));
        assert_eq!(e.phase(), Phase::Upload);
    }

    #[test]
    fn timed_out_display_has_hint() {
        let e = DocumentError::TimedOut {
            attempts: 3,
            waited_secs: 20,
        };
        assert!(e.to_string().contains("3 polls"));
        assert!(e.to_string().contains("--max-poll-attempts"));
        assert_eq!(e.phase(), Phase::Poll);
    }

    #[test]
    fn retrieval_phase() {
        let e = DocumentError::Retrieval {
            detail: "bad zip".into(),
        };
        assert_eq!(e.phase(), Phase::Retrieve);
        assert_eq!(e.phase().to_string(), "retrieve");
    }

    #[test]
    fn document_error_serialises_with_kind_tag() {
        let e = DocumentError::RemoteFailed {
            message: "file is encrypted".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains(r#""kind":"remote_failed""#), "got: {json}");
    }

    #[test]
    fn upload_kind_does_not_clash_with_tag() {
        let e = DocumentError::Upload {
            kind: UploadErrorKind::Transient,
            detail: "connect".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains(r#""kind":"upload""#), "got: {json}");
        assert!(json.contains(r#""upload_kind":"transient""#), "got: {json}");
        assert_eq!(serde_json::from_str::<DocumentError>(&json).unwrap(), e);
    }

    #[test]
    fn missing_credential_mentions_env_var() {
        assert!(BatchError::MissingCredential
            .to_string()
            .contains("MINERU_API_KEY"));
    }
}
