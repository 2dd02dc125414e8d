//! Error types for the embeddings system.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur in the embeddings system.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Provider not configured.
    #[error("embedding provider not configured")]
    ProviderNotConfigured,

    /// The registry has not been initialised, or was shut down.
    #[error("model registry not initialized")]
    RegistryNotInitialized,

    /// A model could not be constructed or warmed up.
    #[error("failed to load model {model}: {reason}")]
    ModelLoadFailed { model: String, reason: String },

    /// Too many callers are already waiting on a model.
    #[error("encode queue for {model} is full ({depth} waiting)")]
    QueueFull { model: String, depth: usize },

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The on-disk cache is unreadable or inconsistent.
    #[error("cache corrupt at {}: {reason}", path.display())]
    CacheCorrupt { path: PathBuf, reason: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl EmbeddingError {
    pub(crate) fn load_failed(model: &str, reason: impl ToString) -> Self {
        Self::ModelLoadFailed {
            model: model.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CacheCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
