//! Plain-text access to source documents.
//!
//! Binary formats (PDF, DOCX) are converted elsewhere; this module only hands
//! out text that already exists on disk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::rules::validate_document_id;

/// File extensions readable as plain text.
pub const TEXT_EXTENSIONS: [&str; 2] = ["txt", "md"];

/// Errors from fetching document text.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// No document with this id exists.
    #[error("document not found: {0}")]
    NotFound(String),
    /// The document exists but is not plain text.
    #[error("unsupported document format: {0}")]
    Unsupported(String),
    /// The id is not a safe file name.
    #[error("invalid document id: {0:?}")]
    InvalidId(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Supplies already-extracted text for a document id.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetch the full text of a document.
    async fn text(&self, document_id: &str) -> Result<String, DocumentError>;
}

/// The document id for a file: its name without the extension.
pub fn document_id_for(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .filter(|s| validate_document_id(s).is_ok())
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| TEXT_EXTENSIONS.iter().any(|t| e.eq_ignore_ascii_case(t)))
}

/// Documents stored as files in one directory, addressed by file stem.
#[derive(Debug, Clone)]
pub struct DirectoryDocuments {
    dir: PathBuf,
}

impl DirectoryDocuments {
    /// Serve documents from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the documents.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn locate(&self, document_id: &str) -> Result<PathBuf, DocumentError> {
        for ext in TEXT_EXTENSIONS {
            let candidate = self.dir.join(format!("{document_id}.{ext}"));
            if tokio::fs::try_exists(&candidate).await? {
                return Ok(candidate);
            }
        }

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DocumentError::NotFound(document_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some(document_id) && !is_text_file(&path) {
                let name = entry.file_name().to_string_lossy().into_owned();
                return Err(DocumentError::Unsupported(name));
            }
        }
        Err(DocumentError::NotFound(document_id.to_string()))
    }
}

#[async_trait]
impl DocumentSource for DirectoryDocuments {
    async fn text(&self, document_id: &str) -> Result<String, DocumentError> {
        validate_document_id(document_id)
            .map_err(|_| DocumentError::InvalidId(document_id.to_string()))?;

        let path = self.locate(document_id).await?;
        tracing::debug!(document_id = %document_id, path = %path.display(), "reading document text");
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(DocumentError::NotFound(document_id.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                Err(DocumentError::Unsupported(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
