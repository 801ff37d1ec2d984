use std::path::{Path, PathBuf};

/// A file the user picked for upload.
///
/// Immutable once created; the length is `None` when it cannot be known up
/// front (pipes, character devices, unreadable metadata).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    path: PathBuf,
    name: String,
    len: Option<u64>,
}

impl CandidateFile {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, len: Option<u64>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            len,
        }
    }

    /// Describes the file at `path`, taking the display name from the last
    /// path component. Never fails: problems surface during validation.
    pub async fn inspect(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let len = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(meta.len()),
            _ => None,
        };
        Self { path, name, len }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name sent with the upload and shown on the card.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> Option<u64> {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == Some(0)
    }
}
