//! Vocabulary exports: the files one vocabulary publishes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use thiserror::Error;

/// File extension vocbench uses for its RDF/XML export.
pub const DEFAULT_EXTENSION: &str = "rdf";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid export path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("duplicate export path '{0}'")]
    DuplicatePath(String),

    #[error("export for '{0}' contains no files")]
    Empty(String),

    #[error("content hash mismatch for '{path}': expected {expected}, computed {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("failed to read export from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// Git blob object id of `content` (`sha1("blob <len>\0" + content)`).
///
/// Comparable to the `sha` GitHub reports for tree entries.
pub fn git_blob_sha(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// One file of an export.
#[derive(Clone, PartialEq, Eq)]
pub struct ExportFile {
    path: String,
    content: Vec<u8>,
    content_hash: String,
}

impl ExportFile {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Result<Self> {
        let path = path.into();
        validate_path(&path)?;
        let content = content.into();
        let content_hash = git_blob_sha(&content);
        Ok(Self {
            path,
            content,
            content_hash,
        })
    }

    /// Build from content and a precomputed hash, which must match.
    pub fn with_hash(
        path: impl Into<String>,
        content: impl Into<Vec<u8>>,
        content_hash: impl Into<String>,
    ) -> Result<Self> {
        let file = Self::new(path, content)?;
        let expected = content_hash.into().to_ascii_lowercase();
        if expected != file.content_hash {
            return Err(ExportError::HashMismatch {
                path: file.path,
                expected,
                actual: file.content_hash,
            });
        }
        Ok(file)
    }

    /// Path relative to the target's path prefix.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }
}

impl std::fmt::Debug for ExportFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportFile")
            .field("path", &self.path)
            .field("len", &self.content.len())
            .field("content_hash", &self.content_hash)
            .finish()
    }
}

/// Everything one vocabulary publishes in a run. Files are sorted by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VocabularyExport {
    vocabulary_id: String,
    files: Vec<ExportFile>,
}

impl VocabularyExport {
    /// Files are sorted by path. An export must carry at least one file: an
    /// empty one would diff as "delete everything under the prefix".
    pub fn new(vocabulary_id: impl Into<String>, mut files: Vec<ExportFile>) -> Result<Self> {
        let vocabulary_id = vocabulary_id.into();
        if files.is_empty() {
            return Err(ExportError::Empty(vocabulary_id));
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let mut seen = BTreeSet::new();
        for file in &files {
            if !seen.insert(file.path.as_str()) {
                return Err(ExportError::DuplicatePath(file.path.clone()));
            }
        }
        Ok(Self {
            vocabulary_id,
            files,
        })
    }

    /// A single-document export, named `<vocabulary>.rdf` unless `file_name` is given.
    pub fn single_file(
        vocabulary_id: impl Into<String>,
        file_name: Option<&str>,
        content: impl Into<Vec<u8>>,
    ) -> Result<Self> {
        let vocabulary_id = vocabulary_id.into();
        let name = match file_name {
            Some(name) => name.to_string(),
            None => format!("{vocabulary_id}.{DEFAULT_EXTENSION}"),
        };
        let file = ExportFile::new(name, content)?;
        Self::new(vocabulary_id, vec![file])
    }

    /// Load from a file drop.
    ///
    /// A file becomes a single-document export. A directory is walked
    /// recursively, keeping relative paths and skipping dot-files.
    pub fn from_path(vocabulary_id: impl Into<String>, source: &Path) -> Result<Self> {
        let vocabulary_id = vocabulary_id.into();
        let metadata = std::fs::metadata(source).map_err(io_error(source))?;

        if metadata.is_file() {
            let content = std::fs::read(source).map_err(io_error(source))?;
            return Self::single_file(vocabulary_id, None, content);
        }

        let mut files = Vec::new();
        collect_files(source, source, &mut files)?;
        Self::new(vocabulary_id, files)
    }

    pub fn vocabulary_id(&self) -> &str {
        &self.vocabulary_id
    }

    pub fn files(&self) -> &[ExportFile] {
        &self.files
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExportError {
    let path = path.to_path_buf();
    move |source| ExportError::Io { path, source }
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<ExportFile>) -> Result<()> {
    for entry in std::fs::read_dir(dir).map_err(io_error(dir))? {
        let entry = entry.map_err(io_error(dir))?;
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let file_type = entry.file_type().map_err(io_error(&path))?;
        if file_type.is_dir() {
            collect_files(root, &path, files)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let content = std::fs::read(&path).map_err(io_error(&path))?;
            files.push(ExportFile::new(relative, content)?);
        }
    }
    Ok(())
}

/// Paths are `/`-separated, relative and free of `.`/`..` segments.
fn validate_path(path: &str) -> Result<()> {
    let invalid = |reason| ExportError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    if path.is_empty() {
        return Err(invalid("empty"));
    }
    if path.starts_with('/') {
        return Err(invalid("absolute"));
    }
    if path.contains('\\') {
        return Err(invalid("backslash separator"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(invalid("empty segment")),
            "." | ".." => return Err(invalid("relative segment")),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_sha_matches_git() {
        // `printf 'hello\n' | git hash-object --stdin`
        assert_eq!(git_blob_sha(b"hello\n"), "ce013625030ba8dba906f756967f9e9ca394464a");
        // `git hash-object /dev/null`
        assert_eq!(git_blob_sha(b""), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn rejects_unsafe_paths() {
        for path in ["", "/etc/passwd", "a/../b", "./a", "a//b", "a/", "a\\b"] {
            assert!(
                matches!(ExportFile::new(path, "x"), Err(ExportError::InvalidPath { .. })),
                "{path:?} should be rejected"
            );
        }
        assert!(ExportFile::new("nested/dir/file.ttl", "x").is_ok());
    }

    #[test]
    fn rejects_duplicate_paths() {
        let files = vec![
            ExportFile::new("a.rdf", "1").expect("valid"),
            ExportFile::new("a.rdf", "2").expect("valid"),
        ];
        assert!(matches!(
            VocabularyExport::new("skos", files),
            Err(ExportError::DuplicatePath(p)) if p == "a.rdf"
        ));
    }

    #[test]
    fn rejects_export_without_files() {
        assert!(matches!(
            VocabularyExport::new("skos", Vec::new()),
            Err(ExportError::Empty(id)) if id == "skos"
        ));
    }

    #[test]
    fn empty_directory_drop_is_rejected() {
        let root = std::env::temp_dir().join(format!("vocpub-empty-drop-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).expect("mkdir");
        std::fs::write(root.join(".DS_Store"), "junk").expect("write");

        let err = VocabularyExport::from_path("skos", &root).expect_err("should fail");
        assert!(matches!(err, ExportError::Empty(_)));

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn with_hash_verifies_content() {
        let hash = git_blob_sha(b"hello\n");
        assert!(ExportFile::with_hash("a", "hello\n", hash.to_uppercase()).is_ok());
        assert!(matches!(
            ExportFile::with_hash("a", "bye\n", hash),
            Err(ExportError::HashMismatch { .. })
        ));
    }

    #[test]
    fn single_file_defaults_to_rdf_name() {
        let export = VocabularyExport::single_file("skos", None, "<rdf:RDF/>").expect("valid");
        assert_eq!(export.files()[0].path(), "skos.rdf");

        let named = VocabularyExport::single_file("skos", Some("core.ttl"), "x").expect("valid");
        assert_eq!(named.files()[0].path(), "core.ttl");
    }

    #[test]
    fn files_are_sorted_by_path() {
        let export = VocabularyExport::new(
            "v",
            vec![
                ExportFile::new("b.ttl", "b").expect("valid"),
                ExportFile::new("a.ttl", "a").expect("valid"),
            ],
        )
        .expect("valid");
        let paths: Vec<_> = export.files().iter().map(ExportFile::path).collect();
        assert_eq!(paths, vec!["a.ttl", "b.ttl"]);
    }

    #[test]
    fn loads_directory_drop() {
        let root = std::env::temp_dir().join(format!("vocpub-export-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(root.join("concepts")).expect("mkdir");
        std::fs::write(root.join("scheme.ttl"), "scheme").expect("write");
        std::fs::write(root.join("concepts/c1.ttl"), "c1").expect("write");
        std::fs::write(root.join(".DS_Store"), "junk").expect("write");

        let export = VocabularyExport::from_path("skos", &root).expect("load");
        let paths: Vec<_> = export.files().iter().map(ExportFile::path).collect();
        assert_eq!(paths, vec!["concepts/c1.ttl", "scheme.ttl"]);

        let single = VocabularyExport::from_path("skos", &root.join("scheme.ttl")).expect("load file");
        assert_eq!(single.files()[0].path(), "skos.rdf");
        assert_eq!(single.files()[0].content(), b"scheme");

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn missing_source_is_io_error() {
        let err = VocabularyExport::from_path("skos", Path::new("/definitely/not/here"))
            .expect_err("should fail");
        assert!(matches!(err, ExportError::Io { .. }));
    }
}
