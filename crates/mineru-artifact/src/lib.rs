//! # mineru-artifact
//!
//! Fetch and unpack the result archives produced by the MinerU extraction
//! service. A finished job exposes a `full_zip_url` pointing at a zip that
//! holds the Markdown file, an `images/` directory and a few JSON sidecars.
//!
//! ## How it works
//!
//! 1. [`fetch_archive`] streams the archive into memory through a caller-owned
//!    [`reqwest::Client`], reporting progress every chunk.
//! 2. [`unpack_archive`] writes every entry below a destination directory.
//!    Entry names are resolved through [`zip::read::ZipFile::enclosed_name`],
//!    so an archive can never write outside the destination ("zip slip").
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mineru_artifact::{fetch_archive, unpack_archive};
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), mineru_artifact::ArtifactError> {
//! let client = reqwest::Client::new();
//! let bytes = fetch_archive(&client, "https://cdn.example.com/result.zip", None).await?;
//! let report = unpack_archive(&bytes, Path::new("out/paper"))?;
//! println!("{} files, {} bytes", report.files.len(), report.total_bytes);
//! # Ok(())
//! # }
//! ```

use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by mineru-artifact operations.
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// The request could not be sent or the body could not be read.
    #[error("Download failed: {0}")]
    Download(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status} while downloading '{url}'")]
    HttpStatus { status: u16, url: String },

    /// The bytes are not a readable zip archive.
    #[error("Archive is not a valid zip: {0}")]
    Archive(String),

    /// An entry name points outside the destination directory.
    #[error("Archive entry '{0}' escapes the destination directory")]
    UnsafeEntry(String),

    /// Writing an extracted entry failed.
    #[error("Failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What [`unpack_archive`] wrote to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackReport {
    /// Every regular file written, as `dest` joined with the entry name.
    pub files: Vec<PathBuf>,
    /// Sum of the uncompressed sizes of all files written.
    pub total_bytes: u64,
}

impl UnpackReport {
    /// Files with the given extension (case-insensitive), in archive order.
    pub fn files_with_extension<'a>(&'a self, ext: &'a str) -> impl Iterator<Item = &'a PathBuf> {
        self.files.iter().filter(move |p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(ext))
        })
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Downloads `url` into memory, calling `on_progress(downloaded, total)` after
/// every received chunk.
///
/// The caller supplies the client so that timeouts and default headers stay
/// under its control.
pub async fn fetch_archive(
    client: &reqwest::Client,
    url: &str,
    on_progress: Option<&(dyn Fn(u64, Option<u64>) + Sync)>,
) -> Result<Vec<u8>, ArtifactError> {
    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ArtifactError::Download(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(ArtifactError::HttpStatus {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    let total = response.content_length();
    let capacity = total.unwrap_or(4 * 1024 * 1024) as usize;
    let mut buf = Vec::with_capacity(capacity);
    let mut downloaded: u64 = 0;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ArtifactError::Download(format!("Read error: {e}")))?
    {
        buf.extend_from_slice(&chunk);
        downloaded += chunk.len() as u64;
        if let Some(cb) = on_progress {
            cb(downloaded, total);
        }
    }

    Ok(buf)
}

/// Extracts every entry of the zip held in `archive_bytes` below `dest`.
///
/// `dest` is created if absent. Existing files with the same names are
/// overwritten; nothing outside `dest` is touched.
///
/// This is blocking file I/O; async callers should run it inside
/// `spawn_blocking`.
pub fn unpack_archive(archive_bytes: &[u8], dest: &Path) -> Result<UnpackReport, ArtifactError> {
    unpack_reader(Cursor::new(archive_bytes), dest)
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn unpack_reader<R: Read + Seek>(reader: R, dest: &Path) -> Result<UnpackReport, ArtifactError> {
    let mut archive = ZipArchive::new(reader).map_err(|e| ArtifactError::Archive(e.to_string()))?;

    std::fs::create_dir_all(dest).map_err(|e| ArtifactError::Io {
        path: dest.to_path_buf(),
        source: e,
    })?;

    let mut report = UnpackReport::default();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ArtifactError::Archive(e.to_string()))?;

        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ArtifactError::UnsafeEntry(entry.name().to_string()))?;
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| ArtifactError::Io {
                path: out_path.clone(),
                source: e,
            })?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ArtifactError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = std::fs::File::create(&out_path).map_err(|e| ArtifactError::Io {
            path: out_path.clone(),
            source: e,
        })?;
        let written = std::io::copy(&mut entry, &mut file).map_err(|e| ArtifactError::Io {
            path: out_path.clone(),
            source: e,
        })?;

        report.total_bytes += written;
        report.files.push(out_path);
    }

    Ok(report)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            for (name, data) in entries {
                writer
                    .start_file(*name, SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn unpacks_nested_entries() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = build_zip(&[
            ("paper.md", b"# Title\n"),
            ("images/fig1.jpg", b"\xff\xd8\xff"),
            ("layout.json", b"{}"),
        ]);

        let report = unpack_archive(&bytes, dir.path()).unwrap();

        assert_eq!(report.files.len(), 3);
        assert_eq!(report.total_bytes, 8 + 3 + 2);
        assert!(dir.path().join("images/fig1.jpg").is_file());
        let md: Vec<_> = report.files_with_extension("md").collect();
        assert_eq!(md, vec![&dir.path().join("paper.md")]);
    }

    #[test]
    fn overwrites_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("paper.md"), "stale").unwrap();

        let bytes = build_zip(&[("paper.md", b"fresh")]);
        unpack_archive(&bytes, dir.path()).unwrap();

        let content = std::fs::read_to_string(dir.path().join("paper.md")).unwrap();
        assert_eq!(content, "fresh");
    }

    #[test]
    fn creates_missing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a/b/c");
        let bytes = build_zip(&[("x.md", b"x")]);
        unpack_archive(&bytes, &dest).unwrap();
        assert!(dest.join("x.md").is_file());
    }

    #[test]
    fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("doc");
        let bytes = build_zip(&[("../escape.md", b"nope")]);

        let err = unpack_archive(&bytes, &dest).unwrap_err();
        assert!(matches!(err, ArtifactError::UnsafeEntry(_)), "got {err:?}");
        assert!(!dir.path().join("escape.md").exists());
    }

    #[test]
    fn rejects_garbage_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let err = unpack_archive(b"definitely not a zip", dir.path()).unwrap_err();
        assert!(matches!(err, ArtifactError::Archive(_)));
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        let report = UnpackReport {
            files: vec![PathBuf::from("a/README.MD"), PathBuf::from("a/b.json")],
            total_bytes: 0,
        };
        assert_eq!(report.files_with_extension("md").count(), 1);
    }
}
