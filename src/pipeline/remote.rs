//! The MinerU v4 API as seen by the pipeline.
//!
//! [`RemoteService`] is the seam between the orchestration logic and the
//! network: the upload coordinator, poller and retriever only ever talk to
//! the trait, and tests substitute an in-memory implementation.
//! [`MinerUClient`] is the production implementation on top of `reqwest`.
//!
//! ## Endpoints
//!
//! ```text
//! POST {base}/api/v4/file-urls/batch            → batch_id + presigned upload URL
//! PUT  {upload_url}                            ← raw file bytes (no auth, no content-type)
//! GET  {base}/api/v4/extract-results/batch/{id} → per-file state, zip URL, progress
//! GET  {full_zip_url}                          → result archive
//! ```
//!
//! ## Why three HTTP clients?
//!
//! JSON calls carry the bearer token as a default header and a short timeout.
//! The presigned upload URL is verified by the object store against the exact
//! headers sent, so the transfer client must add nothing of its own; archives
//! can be large and get their own, longer timeout.

use crate::config::ApiConfig;
use crate::error::BatchError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

// ── Errors ───────────────────────────────────────────────────────────────

/// A failed call to the service, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("rate limited by the service{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("authentication rejected (HTTP {status}): {detail}\nCheck MINERU_API_KEY; tokens expire after 14 days.")]
    Auth { status: u16, detail: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("service error code {code}: {message}")]
    Api { code: i64, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

fn retry_hint(secs: &Option<u64>) -> String {
    secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default()
}

impl RemoteError {
    /// True when repeating the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Timeout
            | RemoteError::Connect(_)
            | RemoteError::RateLimited { .. }
            | RemoteError::Transport(_) => true,
            RemoteError::Http { status, .. } => *status >= 500,
            RemoteError::Auth { .. } | RemoteError::Api { .. } | RemoteError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if e.is_connect() {
            RemoteError::Connect(e.to_string())
        } else if e.is_decode() {
            RemoteError::Malformed(e.to_string())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

impl From<mineru_artifact::ArtifactError> for RemoteError {
    fn from(e: mineru_artifact::ArtifactError) -> Self {
        match e {
            mineru_artifact::ArtifactError::HttpStatus { status, url } => RemoteError::Http {
                status,
                body: format!("while downloading {url}"),
            },
            other => RemoteError::Transport(other.to_string()),
        }
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

/// Every JSON response is wrapped in `{code, msg, data}`; `code == 0` is success.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    // A missing key is `None`; `#[serde(default)]` here would demand `T: Default`.
    data: Option<T>,
}

/// Parameters for one file in an upload-target request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSpec {
    pub name: String,
    pub is_ocr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_ranges: Option<String>,
}

/// Body of `POST /api/v4/file-urls/batch`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadTargetRequest {
    pub language: String,
    pub files: Vec<FileSpec>,
}

impl UploadTargetRequest {
    /// A request for a single file, which is how the orchestrator submits.
    pub fn single(
        name: impl Into<String>,
        ocr_enabled: bool,
        language: impl Into<String>,
        page_ranges: Option<String>,
    ) -> Self {
        Self {
            language: language.into(),
            files: vec![FileSpec {
                name: name.into(),
                is_ocr: ocr_enabled,
                page_ranges,
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadTargetData {
    batch_id: String,
    #[serde(default)]
    file_urls: Vec<String>,
}

/// Where to send the bytes, and the batch to poll afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub batch_id: String,
    pub upload_url: String,
}

/// Page-level progress reported while a file is being extracted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractProgress {
    #[serde(default)]
    pub extracted_pages: u32,
    #[serde(default)]
    pub total_pages: u32,
}

/// One file's entry in a batch status response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractResult {
    #[serde(default)]
    pub file_name: Option<String>,
    /// `waiting-file`, `pending`, `running`, `converting`, `done` or `failed`.
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub full_zip_url: Option<String>,
    #[serde(default)]
    pub err_msg: Option<String>,
    #[serde(default)]
    pub extract_progress: Option<ExtractProgress>,
}

/// Decoded `data` of `GET /api/v4/extract-results/batch/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatus {
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub extract_result: Vec<ExtractResult>,
}

// ── Service trait ────────────────────────────────────────────────────────

/// The four remote operations the orchestrator needs.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Reserve a batch and obtain a presigned upload URL for one file.
    async fn request_upload_target(
        &self,
        request: &UploadTargetRequest,
    ) -> Result<UploadTarget, RemoteError>;

    /// Send the raw file bytes to the presigned URL.
    async fn transfer_bytes(&self, upload_url: &str, bytes: Vec<u8>) -> Result<(), RemoteError>;

    /// Fetch the current state of every file in a batch.
    async fn get_batch_status(&self, batch_id: &str) -> Result<BatchStatus, RemoteError>;

    /// Download a finished result archive.
    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, RemoteError>;
}

// ── reqwest implementation ───────────────────────────────────────────────

/// Production [`RemoteService`] talking to the MinerU cloud API.
#[derive(Clone)]
pub struct MinerUClient {
    api_base: String,
    api: reqwest::Client,
    transfer: reqwest::Client,
    download: reqwest::Client,
}

impl fmt::Debug for MinerUClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MinerUClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl MinerUClient {
    /// Build the client. Fails on an empty token or an unusable base URL.
    pub fn new(config: &ApiConfig) -> Result<Self, BatchError> {
        let key = config.api_key.trim();
        if key.is_empty() {
            return Err(BatchError::MissingCredential);
        }
        if !(config.api_base.starts_with("http://") || config.api_base.starts_with("https://")) {
            return Err(BatchError::InvalidConfig(format!(
                "API base must be an http(s) URL, got '{}'",
                config.api_base
            )));
        }

        let mut auth = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|_| BatchError::InvalidConfig("API key contains invalid characters".into()))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let api = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BatchError::HttpClient(e.to_string()))?;
        let transfer = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.transfer_timeout_secs))
            .build()
            .map_err(|e| BatchError::HttpClient(e.to_string()))?;
        let download = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()
            .map_err(|e| BatchError::HttpClient(e.to_string()))?;

        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api,
            transfer,
            download,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }
}

#[async_trait]
impl RemoteService for MinerUClient {
    async fn request_upload_target(
        &self,
        request: &UploadTargetRequest,
    ) -> Result<UploadTarget, RemoteError> {
        let response = self
            .api
            .post(self.url("/api/v4/file-urls/batch"))
            .json(request)
            .send()
            .await?;
        let data: UploadTargetData = decode_envelope(response).await?;

        if data.file_urls.len() != request.files.len() {
            return Err(RemoteError::Malformed(format!(
                "expected {} upload URLs, got {}",
                request.files.len(),
                data.file_urls.len()
            )));
        }
        let upload_url = data
            .file_urls
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Malformed("no upload URL returned".into()))?;
        debug!("Upload target reserved, batch_id={}", data.batch_id);
        Ok(UploadTarget {
            batch_id: data.batch_id,
            upload_url,
        })
    }

    async fn transfer_bytes(&self, upload_url: &str, bytes: Vec<u8>) -> Result<(), RemoteError> {
        let response = self.transfer.put(upload_url).body(bytes).send().await?;
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }
        Err(error_for_status(status, response).await)
    }

    async fn get_batch_status(&self, batch_id: &str) -> Result<BatchStatus, RemoteError> {
        let response = self
            .api
            .get(self.url(&format!("/api/v4/extract-results/batch/{batch_id}")))
            .send()
            .await?;
        decode_envelope(response).await
    }

    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        Ok(mineru_artifact::fetch_archive(&self.download, url, None).await?)
    }
}

// ── Response helpers ─────────────────────────────────────────────────────

const MAX_ERROR_BODY: usize = 512;

async fn error_for_status(status: StatusCode, response: reqwest::Response) -> RemoteError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        return RemoteError::RateLimited { retry_after_secs };
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|&i| body.is_char_boundary(i))
            .unwrap_or(0);
        body.truncate(cut);
        body.push('…');
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Auth {
            status: status.as_u16(),
            detail: body,
        },
        _ => RemoteError::Http {
            status: status.as_u16(),
            body,
        },
    }
}

async fn decode_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        return Err(error_for_status(status, response).await);
    }
    let text = response.text().await?;
    parse_envelope(&text)
}

/// Unwrap `{code, msg, data}`, turning a non-zero code into [`RemoteError::Api`].
fn parse_envelope<T: DeserializeOwned>(text: &str) -> Result<T, RemoteError> {
    let envelope: Envelope<T> =
        serde_json::from_str(text).map_err(|e| RemoteError::Malformed(e.to_string()))?;
    if envelope.code != 0 {
        return Err(RemoteError::Api {
            code: envelope.code,
            message: envelope.msg.unwrap_or_else(|| "unknown error".into()),
        });
    }
    envelope
        .data
        .ok_or_else(|| RemoteError::Malformed("response has no data field".into()))
}
