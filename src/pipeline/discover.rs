//! Document discovery: walk the input root and map each convertible file to
//! its place in the output tree.
//!
//! ## Why sanitise every path component?
//!
//! Source trees collected from publishers routinely contain names like
//! `EJIS /Paper: part 2 .pdf`. Windows refuses `:` and trailing dots or
//! spaces, and the service echoes the file name back inside its archive.
//! Cleaning each directory component and the stem up front gives every
//! document an output directory that is valid on every platform. Sources
//! that still land on the same directory are moved to numbered siblings by
//! [`assign_unique_output_dirs`] and reported by [`find_collisions`].

use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::output::OutputCollision;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

static INVALID_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[\\/:*?"<>|]"#).unwrap());

/// Fallback for a component that sanitises to nothing (e.g. `...`).
const UNNAMED: &str = "unnamed";

/// One convertible file found under the input root.
///
/// Identity is `source_path`. Immutable after discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Position in discovery order (0-based).
    pub index: usize,
    /// Absolute or root-relative path of the source file.
    pub source_path: PathBuf,
    /// Path relative to the input root, as found on disk.
    pub relative_path: PathBuf,
    /// Where this document's artifacts are unpacked.
    pub output_dir: PathBuf,
    /// Sanitised file stem; also the directory name under `output_dir`'s parent.
    pub logical_name: String,
}

impl Document {
    /// Build a document from its path relative to `input_root`.
    ///
    /// `output_dir` is `output_root / sanitised parent components / sanitised stem`.
    pub fn new(index: usize, input_root: &Path, output_root: &Path, relative_path: &Path) -> Self {
        let logical_name = relative_path
            .file_stem()
            .map(|s| sanitize_component(&s.to_string_lossy()))
            .unwrap_or_else(|| UNNAMED.to_string());

        let mut output_dir = output_root.to_path_buf();
        if let Some(parent) = relative_path.parent() {
            for comp in parent.components() {
                if let Component::Normal(part) = comp {
                    output_dir.push(sanitize_component(&part.to_string_lossy()));
                }
            }
        }
        output_dir.push(&logical_name);

        Self {
            index,
            source_path: input_root.join(relative_path),
            relative_path: relative_path.to_path_buf(),
            output_dir,
            logical_name,
        }
    }

    /// First directory below the input root, or `"."` for top-level files.
    pub fn subfolder(&self) -> String {
        let mut comps = self.relative_path.components();
        match (comps.next(), comps.next()) {
            (Some(Component::Normal(first)), Some(_)) => first.to_string_lossy().into_owned(),
            _ => ".".to_string(),
        }
    }

    /// File name sent to the service, e.g. `paper.pdf`.
    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.pdf", self.logical_name))
    }

    /// Short label for logs and progress output.
    pub fn display_name(&self) -> String {
        self.relative_path.display().to_string()
    }

    /// The output directory before any `_N` suffix was added to keep it unique.
    pub fn mirrored_dir(&self) -> PathBuf {
        match self.output_dir.parent() {
            Some(parent) => parent.join(&self.logical_name),
            None => PathBuf::from(&self.logical_name),
        }
    }
}

/// Case-folded form of an output path; two documents whose keys match would
/// share a directory on Windows and macOS.
fn collision_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// Give every document its own output directory.
///
/// Walks `docs` in order; the first document keeps its mirrored directory and
/// each later one that would share it gets `<stem>_2`, `<stem>_3`, ... The
/// result depends only on the discovery order, so reruns over an unchanged
/// tree pick the same directories. Returns how many documents were renamed.
pub fn assign_unique_output_dirs(docs: &mut [Document]) -> usize {
    let mut taken: HashSet<String> = HashSet::with_capacity(docs.len());
    let mut renamed = 0;
    for doc in docs.iter_mut() {
        if taken.insert(collision_key(&doc.output_dir)) {
            continue;
        }
        let base = doc.mirrored_dir();
        let mut n = 2u32;
        let unique = loop {
            let candidate = base.with_file_name(format!("{}_{n}", doc.logical_name));
            if taken.insert(collision_key(&candidate)) {
                break candidate;
            }
            n += 1;
        };
        warn!(
            "{} shares its output directory with an earlier document; writing to {}",
            doc.display_name(),
            unique.display()
        );
        doc.output_dir = unique;
        renamed += 1;
    }
    renamed
}

/// Make one path component safe on Windows and POSIX alike.
///
/// `\ / : * ? " < > |` become `_`; surrounding whitespace and trailing dots
/// are removed. An empty result becomes `unnamed`.
pub fn sanitize_component(name: &str) -> String {
    let replaced = INVALID_CHARS.replace_all(name, "_");
    let cleaned = replaced.trim().trim_end_matches('.').trim_end();
    if cleaned.is_empty() {
        UNNAMED.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Produces the documents of a run.
///
/// Implementations must be restartable and free of side effects: calling
/// `discover` twice on an unchanged tree yields the same sequence.
pub trait DocumentSource: Send + Sync {
    fn discover(&self) -> Result<Vec<Document>, BatchError>;
}

/// Recursive file-system walk filtered by extension.
#[derive(Debug, Clone)]
pub struct FsDocumentSource {
    input_root: PathBuf,
    output_root: PathBuf,
    extensions: Vec<String>,
}

impl FsDocumentSource {
    pub fn new(
        input_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            extensions: extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(
            config.input_dir.clone(),
            config.output_dir.clone(),
            config.extensions.clone(),
        )
    }

    fn has_wanted_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.iter().any(|w| e.eq_ignore_ascii_case(w)))
    }
}

impl DocumentSource for FsDocumentSource {
    fn discover(&self) -> Result<Vec<Document>, BatchError> {
        let root = &self.input_root;
        if !root.exists() {
            return Err(BatchError::InputDirNotFound { path: root.clone() });
        }
        // Only an unreadable root is fatal; per-entry errors below are skipped.
        std::fs::read_dir(root).map_err(|e| BatchError::Discovery {
            path: root.clone(),
            source: e,
        })?;

        let canonical_root = root.canonicalize().map_err(|e| BatchError::Discovery {
            path: root.clone(),
            source: e,
        })?;
        // A missing output root cannot contain anything to exclude.
        let canonical_output = self.output_root.canonicalize().ok();
        if canonical_output.as_ref() == Some(&canonical_root) {
            return Err(BatchError::InvalidConfig(format!(
                "Output directory '{}' is the input directory; results would be rediscovered as input",
                self.output_root.display()
            )));
        }
        let excluded = canonical_output.filter(|out| out.starts_with(&canonical_root));

        let walker = WalkDir::new(&canonical_root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| match &excluded {
                Some(out) => !e.path().starts_with(out),
                None => true,
            });

        let mut docs = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.has_wanted_extension(entry.path()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&canonical_root) else {
                continue;
            };
            let doc = Document::new(docs.len(), root, &self.output_root, relative);
            debug!("Found {} → {}", doc.display_name(), doc.output_dir.display());
            docs.push(doc);
        }

        assign_unique_output_dirs(&mut docs);
        info!("Discovered {} documents under {}", docs.len(), root.display());
        Ok(docs)
    }
}

/// Groups of sources whose names sanitise to the same output directory.
///
/// Reported against the mirrored directory, so collisions stay visible after
/// [`assign_unique_output_dirs`] has moved the later documents aside.
pub fn find_collisions(docs: &[Document]) -> Vec<OutputCollision> {
    let mut by_dir: BTreeMap<String, OutputCollision> = BTreeMap::new();
    for d in docs {
        by_dir
            .entry(collision_key(&d.mirrored_dir()))
            .or_insert_with(|| OutputCollision {
                output_dir: d.mirrored_dir(),
                sources: Vec::new(),
            })
            .sources
            .push(d.source_path.clone());
    }
    by_dir
        .into_values()
        .filter(|c| c.sources.len() > 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"%PDF-1.7").unwrap();
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_component("a:b*c?d"), "a_b_c_d");
        assert_eq!(sanitize_component(r#"x"y<z>|w"#), "x_y_z__w");
        assert_eq!(sanitize_component("  Paper .  "), "Paper");
        assert_eq!(sanitize_component("EJIS "), "EJIS");
        assert_eq!(sanitize_component("..."), "unnamed");
        assert_eq!(sanitize_component(""), "unnamed");
    }

    #[test]
    fn document_output_dir_mirrors_tree() {
        let d = Document::new(
            0,
            Path::new("/in"),
            Path::new("/out"),
            Path::new("EJIS /sub:dir/My Paper .pdf"),
        );
        assert_eq!(d.output_dir, PathBuf::from("/out/EJIS/sub_dir/My Paper"));
        assert_eq!(d.logical_name, "My Paper");
        assert_eq!(d.source_path, PathBuf::from("/in/EJIS /sub:dir/My Paper .pdf"));
        assert_eq!(d.subfolder(), "EJIS ");
        assert_eq!(d.file_name(), "My Paper .pdf");
    }

    #[test]
    fn discover_is_recursive_sorted_and_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("pdfs");
        touch(&input.join("b/two.pdf"));
        touch(&input.join("a/one.PDF"));
        touch(&input.join("zero.pdf"));
        touch(&input.join("notes.txt"));

        let src = FsDocumentSource::new(&input, dir.path().join("out"), vec!["pdf".into()]);
        let docs = src.discover().unwrap();

        let rels: Vec<_> = docs.iter().map(|d| d.relative_path.clone()).collect();
        assert_eq!(
            rels,
            vec![
                PathBuf::from("a/one.PDF"),
                PathBuf::from("b/two.pdf"),
                PathBuf::from("zero.pdf")
            ]
        );
        assert_eq!(docs.iter().map(|d| d.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(docs[0].output_dir, dir.path().join("out/a/one"));
    }

    #[test]
    fn discover_is_restartable() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("x/1.pdf"));
        touch(&dir.path().join("x/2.pdf"));
        let src = FsDocumentSource::new(dir.path(), "/nowhere", vec!["pdf".into()]);
        assert_eq!(src.discover().unwrap(), src.discover().unwrap());
    }

    #[test]
    fn output_root_inside_input_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("paper.pdf"));
        touch(&dir.path().join("out/paper/paper_origin.pdf"));

        let src = FsDocumentSource::new(dir.path(), dir.path().join("out"), vec!["pdf".into()]);
        let docs = src.discover().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].relative_path, PathBuf::from("paper.pdf"));
    }

    #[test]
    fn missing_root_is_fatal() {
        let src = FsDocumentSource::new("/definitely/not/here", "/out", vec!["pdf".into()]);
        let err = src.discover().unwrap_err();
        assert!(matches!(err, BatchError::InputDirNotFound { .. }));
    }

    #[test]
    fn output_root_equal_to_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("paper.pdf"));
        let src = FsDocumentSource::new(dir.path(), dir.path().join("."), vec!["pdf".into()]);
        assert!(matches!(src.discover().unwrap_err(), BatchError::InvalidConfig(_)));
    }

    #[test]
    fn colliding_documents_get_numbered_directories() {
        let doc = |i, rel: &str| Document::new(i, Path::new("/in"), Path::new("/out"), Path::new(rel));
        let mut docs = vec![
            doc(0, "a:b.pdf"),
            doc(1, "a_b.pdf"),
            doc(2, "a_b_2.pdf"),
            doc(3, "A_B.pdf"),
            doc(4, "c.pdf"),
        ];

        assert_eq!(assign_unique_output_dirs(&mut docs), 3);

        let dirs: Vec<_> = docs.iter().map(|d| d.output_dir.clone()).collect();
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/out/a_b"),
                PathBuf::from("/out/a_b_2"),
                PathBuf::from("/out/a_b_2_2"),
                PathBuf::from("/out/A_B_3"),
                PathBuf::from("/out/c"),
            ]
        );
        // Already-unique documents are left alone on a second pass.
        assert_eq!(assign_unique_output_dirs(&mut docs), 0);
        // The mirrored directory still reveals the clash.
        let c = find_collisions(&docs);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].sources.len(), 3);
    }

    #[test]
    fn discover_separates_colliding_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("pdfs");
        touch(&input.join("x/a:b.pdf"));
        touch(&input.join("x/a_b.pdf"));

        let out = dir.path().join("out");
        let docs = FsDocumentSource::new(&input, &out, vec!["pdf".into()])
            .discover()
            .unwrap();

        assert_eq!(docs[0].output_dir, out.join("x/a_b"));
        assert_eq!(docs[1].output_dir, out.join("x/a_b_2"));
        assert_eq!(docs[1].logical_name, "a_b");
    }

    #[test]
    fn collisions_are_reported() {
        let docs = vec![
            Document::new(0, Path::new("/in"), Path::new("/out"), Path::new("a/x?.pdf")),
            Document::new(1, Path::new("/in"), Path::new("/out"), Path::new("a/x_.pdf")),
            Document::new(2, Path::new("/in"), Path::new("/out"), Path::new("a/y.pdf")),
        ];
        let c = find_collisions(&docs);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].output_dir, PathBuf::from("/out/a/x_"));
        assert_eq!(c[0].sources.len(), 2);
    }
}
