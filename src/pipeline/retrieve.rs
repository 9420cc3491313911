//! Result retrieval: download a finished job's archive and unpack it into the
//! document's output directory.
//!
//! The directory is cleared first so stale files from an earlier, partial
//! attempt never mix with the new result, and removed again if unpacking
//! fails so the resumability check cannot mistake half-extracted output for
//! a finished document. Only the document's own directory is ever touched.

use crate::error::DocumentError;
use crate::pipeline::remote::RemoteService;
use crate::pipeline::resume::cleanup_partial_output;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Download `artifact_url` and unpack it into `output_dir`.
///
/// Returns the path of the Markdown file inside `output_dir`.
pub async fn retrieve(
    remote: &dyn RemoteService,
    artifact_url: &str,
    output_dir: &Path,
) -> Result<PathBuf, DocumentError> {
    let bytes = remote
        .fetch_artifact(artifact_url)
        .await
        .map_err(|e| DocumentError::Retrieval {
            detail: format!("download: {e}"),
        })?;
    debug!("Downloaded {} bytes for {}", bytes.len(), output_dir.display());

    clear_dir(output_dir).await?;

    let dest = output_dir.to_path_buf();
    let unpacked = tokio::task::spawn_blocking(move || mineru_artifact::unpack_archive(&bytes, &dest))
        .await
        .map_err(|e| DocumentError::Retrieval {
            detail: format!("unpack task panicked: {e}"),
        })
        .and_then(|r| {
            r.map_err(|e| DocumentError::Retrieval {
                detail: format!("unpack: {e}"),
            })
        });

    let report = match unpacked {
        Ok(report) => report,
        Err(e) => {
            cleanup_partial_output(output_dir).await;
            return Err(e);
        }
    };

    let markdown = report
        .files_with_extension("md")
        .find(|p| std::fs::metadata(p).map(|m| m.len() > 0).unwrap_or(false))
        .cloned();
    match markdown {
        Some(path) => {
            info!(
                "Unpacked {} files ({} bytes) into {}",
                report.files.len(),
                report.total_bytes,
                output_dir.display()
            );
            Ok(path)
        }
        None => {
            cleanup_partial_output(output_dir).await;
            Err(DocumentError::Retrieval {
                detail: "archive contains no Markdown file".into(),
            })
        }
    }
}

async fn clear_dir(dir: &Path) -> Result<(), DocumentError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DocumentError::Retrieval {
            detail: format!("cannot clear {}: {e}", dir.display()),
        }),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::remote::{BatchStatus, RemoteError, UploadTarget, UploadTargetRequest};
    use async_trait::async_trait;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    struct ArchiveRemote(Result<Vec<u8>, RemoteError>);

    #[async_trait]
    impl RemoteService for ArchiveRemote {
        async fn request_upload_target(
            &self,
            _request: &UploadTargetRequest,
        ) -> Result<UploadTarget, RemoteError> {
            unreachable!()
        }
        async fn transfer_bytes(&self, _url: &str, _bytes: Vec<u8>) -> Result<(), RemoteError> {
            unreachable!()
        }
        async fn get_batch_status(&self, _batch_id: &str) -> Result<BatchStatus, RemoteError> {
            unreachable!()
        }
        async fn fetch_artifact(&self, _url: &str) -> Result<Vec<u8>, RemoteError> {
            self.0.clone()
        }
    }

    fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut w = zip::ZipWriter::new(&mut buf);
            for (name, body) in entries {
                w.start_file(*name, SimpleFileOptions::default()).unwrap();
                w.write_all(body.as_bytes()).unwrap();
            }
            w.finish().unwrap();
        }
        buf.into_inner()
    }

    #[tokio::test]
    async fn unpacks_and_returns_markdown_path() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("sub/paper");
        let remote = ArchiveRemote(Ok(zip_of(&[
            ("full.md", "# Paper"),
            ("images/a.jpg", "jpg"),
        ])));

        let path = retrieve(&remote, "https://cdn/x.zip", &out).await.unwrap();

        assert_eq!(path, out.join("full.md"));
        assert!(out.join("images/a.jpg").is_file());
    }

    #[tokio::test]
    async fn replaces_stale_output_but_not_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("paper");
        let sibling = dir.path().join("other/full.md");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::create_dir_all(sibling.parent().unwrap()).unwrap();
        std::fs::write(out.join("stale.json"), "{").unwrap();
        std::fs::write(&sibling, "# keep").unwrap();

        let remote = ArchiveRemote(Ok(zip_of(&[("full.md", "# new")])));
        retrieve(&remote, "u", &out).await.unwrap();

        assert!(!out.join("stale.json").exists());
        assert_eq!(std::fs::read_to_string(&sibling).unwrap(), "# keep");
    }

    #[tokio::test]
    async fn corrupt_archive_leaves_no_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("paper");
        let remote = ArchiveRemote(Ok(b"not a zip".to_vec()));

        let err = retrieve(&remote, "u", &out).await.unwrap_err();

        assert!(matches!(err, DocumentError::Retrieval { .. }));
        assert!(err.to_string().contains("unpack"));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn archive_without_markdown_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("paper");
        let remote = ArchiveRemote(Ok(zip_of(&[("layout.json", "{}")])));

        let err = retrieve(&remote, "u", &out).await.unwrap_err();
        assert!(err.to_string().contains("no Markdown"));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn download_failure_does_not_touch_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("paper");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("old.md"), "# old").unwrap();
        let remote = ArchiveRemote(Err(RemoteError::Http {
            status: 404,
            body: "expired".into(),
        }));

        let err = retrieve(&remote, "u", &out).await.unwrap_err();
        assert!(err.to_string().contains("download"));
        assert!(out.join("old.md").exists());
    }
}
