//! Configuration types for a batch conversion run.
//!
//! Two values drive a run and both are passed explicitly to whoever needs
//! them; nothing is read from process-wide globals:
//!
//! * [`BatchConfig`] — what to convert and how hard to push: input and output
//!   roots, group size, inter-group delay, poll bounds, OCR and language.
//!   Built via [`BatchConfigBuilder`].
//! * [`ApiConfig`] — where the service lives and how to authenticate with it.
//!   Handed to [`crate::pipeline::remote::MinerUClient::new`].
//!
//! # Design choice: builder over constructor
//! Most runs change two or three knobs. The builder lets callers set only
//! those and rely on documented defaults for the rest, while `build()` is the
//! single place where invariants are checked.

use crate::error::BatchError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Language codes accepted by the MinerU v4 extraction endpoint.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "ch",
    "en",
    "korean",
    "japan",
    "chinese_cht",
    "ta",
    "te",
    "ka",
    "th",
    "el",
    "latin",
    "arabic",
];

/// Name of the run summary written under the output root.
pub const SUMMARY_FILE_NAME: &str = "processing_result.json";

/// Configuration for a batch run.
///
/// Immutable once built; every pipeline in the run reads the same value.
///
/// # Example
/// ```rust
/// use mineru_batch::BatchConfig;
/// use std::time::Duration;
///
/// let config = BatchConfig::builder()
///     .input_dir("pdfs")
///     .output_dir("outputs_api")
///     .concurrency_limit(4)
///     .poll_interval(Duration::from_secs(5))
///     .language("ch")
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency_limit, 4);
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Root of the tree scanned for documents. Default: `pdfs`.
    pub input_dir: PathBuf,

    /// Root of the mirrored output tree. Default: `outputs_api`.
    pub output_dir: PathBuf,

    /// Documents per group; all members of a group run at once. Default: 1.
    ///
    /// 1 means strictly sequential processing. The service throttles per
    /// account, so values above 5 mostly buy 429 responses.
    pub concurrency_limit: usize,

    /// Pause between consecutive groups. Default: 1 s.
    pub inter_batch_delay: Duration,

    /// Status checks allowed per document before giving up. Default: 180.
    pub max_poll_attempts: u32,

    /// Pause between status checks of one document. Default: 10 s.
    ///
    /// With the default attempt ceiling a document may wait ~30 minutes,
    /// which covers several-hundred-page scans on a busy day.
    pub poll_interval: Duration,

    /// Skip documents whose output directory already holds Markdown. Default: true.
    pub skip_existing: bool,

    /// Ask the service to run OCR. Default: true.
    pub ocr_enabled: bool,

    /// Document language hint, one of [`SUPPORTED_LANGUAGES`]. Default: `en`.
    pub language: String,

    /// Optional page selection forwarded verbatim, e.g. `"1-5,8"`. Default: None.
    pub page_ranges: Option<String>,

    /// File extensions considered documents, matched case-insensitively.
    /// Default: `["pdf"]`.
    pub extensions: Vec<String>,

    /// Receives run, group and document events. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("pdfs"),
            output_dir: PathBuf::from("outputs_api"),
            concurrency_limit: 1,
            inter_batch_delay: Duration::from_secs(1),
            max_poll_attempts: 180,
            poll_interval: Duration::from_secs(10),
            skip_existing: true,
            ocr_enabled: true,
            language: "en".to_string(),
            page_ranges: None,
            extensions: vec!["pdf".to_string()],
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("input_dir", &self.input_dir)
            .field("output_dir", &self.output_dir)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("inter_batch_delay", &self.inter_batch_delay)
            .field("max_poll_attempts", &self.max_poll_attempts)
            .field("poll_interval", &self.poll_interval)
            .field("skip_existing", &self.skip_existing)
            .field("ocr_enabled", &self.ocr_enabled)
            .field("language", &self.language)
            .field("page_ranges", &self.page_ranges)
            .field("extensions", &self.extensions)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// Where the run summary is written.
    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join(SUMMARY_FILE_NAME)
    }

    /// Upper bound on the time one document may spend polling.
    pub fn polling_ceiling(&self) -> Duration {
        self.poll_interval * self.max_poll_attempts
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn concurrency_limit(mut self, n: usize) -> Self {
        self.config.concurrency_limit = n.max(1);
        self
    }

    pub fn inter_batch_delay(mut self, delay: Duration) -> Self {
        self.config.inter_batch_delay = delay;
        self
    }

    pub fn max_poll_attempts(mut self, n: u32) -> Self {
        self.config.max_poll_attempts = n.max(1);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn skip_existing(mut self, v: bool) -> Self {
        self.config.skip_existing = v;
        self
    }

    pub fn ocr_enabled(mut self, v: bool) -> Self {
        self.config.ocr_enabled = v;
        self
    }

    pub fn language(mut self, code: impl Into<String>) -> Self {
        self.config.language = code.into();
        self
    }

    pub fn page_ranges(mut self, ranges: impl Into<String>) -> Self {
        self.config.page_ranges = Some(ranges.into());
        self
    }

    pub fn extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.extensions = exts
            .into_iter()
            .map(|e| {
                let e: String = e.into();
                e.trim_start_matches('.').to_ascii_lowercase()
            })
            .collect();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, BatchError> {
        let c = &self.config;
        if c.concurrency_limit == 0 {
            return Err(BatchError::InvalidConfig(
                "Concurrency limit must be ≥ 1".into(),
            ));
        }
        if c.max_poll_attempts == 0 {
            return Err(BatchError::InvalidConfig(
                "Max poll attempts must be ≥ 1".into(),
            ));
        }
        if !SUPPORTED_LANGUAGES.contains(&c.language.as_str()) {
            return Err(BatchError::InvalidConfig(format!(
                "Unsupported language '{}'; expected one of: {}",
                c.language,
                SUPPORTED_LANGUAGES.join(", ")
            )));
        }
        if c.extensions.is_empty() || c.extensions.iter().any(|e| e.is_empty()) {
            return Err(BatchError::InvalidConfig(
                "At least one non-empty file extension is required".into(),
            ));
        }
        if let Some(ranges) = &c.page_ranges {
            validate_page_ranges(ranges)?;
        }
        // Aliases such as `./pdfs` vs `pdfs` are caught again at discovery.
        if c.output_dir == c.input_dir {
            return Err(BatchError::InvalidConfig(format!(
                "Output directory '{}' must differ from the input directory",
                c.output_dir.display()
            )));
        }
        Ok(self.config)
    }
}

/// Accepts comma-separated page numbers and `a-b` ranges, 1-indexed.
fn validate_page_ranges(ranges: &str) -> Result<(), BatchError> {
    let bad = || BatchError::InvalidConfig(format!("Invalid page ranges '{ranges}' (expected e.g. \"1-5,8\")"));
    if ranges.trim().is_empty() {
        return Err(bad());
    }
    for part in ranges.split(',') {
        let part = part.trim();
        let (start, end) = match part.split_once('-') {
            Some((a, b)) => (a.trim(), b.trim()),
            None => (part, part),
        };
        let start: u32 = start.parse().map_err(|_| bad())?;
        let end: u32 = end.parse().map_err(|_| bad())?;
        if start == 0 || end < start {
            return Err(bad());
        }
    }
    Ok(())
}

// ── Remote service ───────────────────────────────────────────────────────

/// Connection settings for the MinerU service.
///
/// The token is opaque and sent as a bearer credential with every call.
#[derive(Clone)]
pub struct ApiConfig {
    /// Scheme + host of the service. Default: `https://mineru.net`.
    pub api_base: String,

    /// Bearer token.
    pub api_key: String,

    /// Timeout for JSON calls (upload target, status). Default: 30 s.
    pub request_timeout_secs: u64,

    /// Timeout for the raw byte transfer to the upload URL. Default: 300 s.
    pub transfer_timeout_secs: u64,

    /// Timeout for downloading a result archive. Default: 300 s.
    pub download_timeout_secs: u64,
}

/// Default service endpoint.
pub const DEFAULT_API_BASE: &str = "https://mineru.net";

impl ApiConfig {
    /// Settings for the public endpoint with the given token.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: api_key.into(),
            request_timeout_secs: 30,
            transfer_timeout_secs: 300,
            download_timeout_secs: 300,
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs.max(1);
        self
    }

    pub fn with_transfer_timeout_secs(mut self, secs: u64) -> Self {
        self.transfer_timeout_secs = secs.max(1);
        self
    }

    pub fn with_download_timeout_secs(mut self, secs: u64) -> Self {
        self.download_timeout_secs = secs.max(1);
        self
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &"<redacted>")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("transfer_timeout_secs", &self.transfer_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_recommendations() {
        let c = BatchConfig::default();
        assert_eq!(c.concurrency_limit, 1);
        assert_eq!(c.max_poll_attempts, 180);
        assert_eq!(c.poll_interval, Duration::from_secs(10));
        assert_eq!(c.inter_batch_delay, Duration::from_secs(1));
        assert!(c.skip_existing);
        assert!(c.ocr_enabled);
        assert_eq!(c.language, "en");
        assert_eq!(c.extensions, vec!["pdf"]);
        assert_eq!(c.polling_ceiling(), Duration::from_secs(1800));
    }

    #[test]
    fn builder_clamps_zero_concurrency_and_attempts() {
        let c = BatchConfig::builder()
            .concurrency_limit(0)
            .max_poll_attempts(0)
            .build()
            .unwrap();
        assert_eq!(c.concurrency_limit, 1);
        assert_eq!(c.max_poll_attempts, 1);
    }

    #[test]
    fn unknown_language_is_rejected() {
        let err = BatchConfig::builder().language("klingon").build().unwrap_err();
        assert!(matches!(err, BatchError::InvalidConfig(_)));
        assert!(err.to_string().contains("klingon"));
    }

    #[test]
    fn extensions_are_normalised() {
        let c = BatchConfig::builder()
            .extensions([".PDF", "Docx"])
            .build()
            .unwrap();
        assert_eq!(c.extensions, vec!["pdf", "docx"]);
    }

    #[test]
    fn page_ranges_validation() {
        assert!(BatchConfig::builder().page_ranges("1-5,8").build().is_ok());
        assert!(BatchConfig::builder().page_ranges(" 2 ").build().is_ok());
        assert!(BatchConfig::builder().page_ranges("5-1").build().is_err());
        assert!(BatchConfig::builder().page_ranges("0").build().is_err());
        assert!(BatchConfig::builder().page_ranges("a-b").build().is_err());
        assert!(BatchConfig::builder().page_ranges("").build().is_err());
    }

    #[test]
    fn output_dir_equal_to_input_dir_is_rejected() {
        let err = BatchConfig::builder()
            .input_dir("/data/pdfs")
            .output_dir("/data/pdfs/")
            .build()
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidConfig(_)));
        assert!(BatchConfig::builder()
            .input_dir("/data/pdfs")
            .output_dir("/data/pdfs/md")
            .build()
            .is_ok());
    }

    #[test]
    fn summary_lives_under_output_root() {
        let c = BatchConfig::builder().output_dir("/tmp/out").build().unwrap();
        assert_eq!(c.summary_path(), PathBuf::from("/tmp/out/processing_result.json"));
    }

    #[test]
    fn api_config_debug_hides_key() {
        let api = ApiConfig::new("sk-very-secret").with_api_base("https://example.com/");
        let dbg = format!("{api:?}");
        assert!(!dbg.contains("sk-very-secret"));
        assert!(dbg.contains("<redacted>"));
        assert_eq!(api.api_base, "https://example.com");
    }
}
