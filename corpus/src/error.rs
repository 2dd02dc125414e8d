//! Error types for corpus loading and persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for corpus operations.
pub type Result<T> = std::result::Result<T, CorpusError>;

/// Errors that can occur while building or reading a corpus.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// The source root (or corpus file) does not exist.
    #[error("source missing: {}", .0.display())]
    SourceMissing(PathBuf),

    /// A file could not be parsed.
    #[error("parse error in {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A document violates the field-set rules for its type.
    #[error("invalid document {doc_id}: {reason}")]
    InvalidDocument { doc_id: String, reason: String },

    /// Two documents share a `doc_id` but carry different text.
    #[error("conflicting documents for doc_id {doc_id}")]
    ConflictingDocId { doc_id: String },

    /// A corpus file is not in canonical order.
    #[error("corpus out of order at line {line}")]
    OutOfOrder { line: usize },

    /// Loading produced no documents at all.
    #[error("no documents found under {}", .0.display())]
    EmptyCorpus(PathBuf),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CorpusError {
    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}
