//! Error types for search backends.

use thiserror::Error;

/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors that can occur while indexing or searching.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Vector width differs from the index.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A dense backend was given a row or query without a vector.
    #[error("missing vector for {0}")]
    MissingVector(String),

    /// Invalid backend configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Embedding arithmetic failed.
    #[error(transparent)]
    Embedding(#[from] augur_embeddings::EmbeddingError),
}
