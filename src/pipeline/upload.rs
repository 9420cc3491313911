//! Upload coordination: reserve a remote batch for one document and send its
//! bytes.
//!
//! Both steps must succeed for the document to count as submitted; the
//! caller only ever sees a batch id or an error, never a half-finished
//! upload. Nothing is retried here. A failed upload fails the document, and
//! the next run picks it up again because no Markdown was written.

use crate::config::BatchConfig;
use crate::error::{DocumentError, UploadErrorKind};
use crate::pipeline::discover::Document;
use crate::pipeline::remote::{RemoteError, RemoteService, UploadTargetRequest};
use tracing::{debug, info};

/// Upload `doc` and return the batch id to poll.
pub async fn upload(
    remote: &dyn RemoteService,
    doc: &Document,
    config: &BatchConfig,
) -> Result<String, DocumentError> {
    // Read first so an unreadable file never reserves a remote batch.
    let bytes = tokio::fs::read(&doc.source_path)
        .await
        .map_err(|e| DocumentError::Io {
            detail: format!("{}: {}", doc.source_path.display(), e),
        })?;

    let request = UploadTargetRequest::single(
        doc.file_name(),
        config.ocr_enabled,
        config.language.clone(),
        config.page_ranges.clone(),
    );
    let target = remote
        .request_upload_target(&request)
        .await
        .map_err(|e| upload_error("upload target", e))?;
    debug!(
        "{}: upload target acquired (batch_id={})",
        doc.display_name(),
        target.batch_id
    );

    let size = bytes.len();
    remote
        .transfer_bytes(&target.upload_url, bytes)
        .await
        .map_err(|e| upload_error("transfer", e))?;

    info!(
        "{}: uploaded {} bytes, batch_id={}",
        doc.display_name(),
        size,
        target.batch_id
    );
    Ok(target.batch_id)
}

fn upload_error(step: &str, e: RemoteError) -> DocumentError {
    let kind = if e.is_transient() {
        UploadErrorKind::Transient
    } else {
        UploadErrorKind::Fatal
    };
    DocumentError::Upload {
        kind,
        detail: format!("{step}: {e}"),
    }
}
