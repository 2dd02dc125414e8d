//! Error types for the retrieval pipeline.

use thiserror::Error;

use crate::trace::Stage;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Failure of a single pipeline stage or lane.
///
/// Stage errors never reach the caller directly; the orchestrator records
/// them in the trace and falls back.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    /// The stage missed its deadline.
    #[error("{stage} timed out after {timeout_ms}ms")]
    Timeout { stage: Stage, timeout_ms: u64 },

    /// The stage failed.
    #[error("{stage} failed: {message}")]
    Failed { stage: Stage, message: String },
}

impl StageError {
    pub fn failed(stage: Stage, message: impl ToString) -> Self {
        Self::Failed {
            stage,
            message: message.to_string(),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Timeout { stage, .. } | Self::Failed { stage, .. } => *stage,
        }
    }
}

/// Errors surfaced by the engine.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Corpus loading failed.
    #[error(transparent)]
    Corpus(#[from] augur_corpus::CorpusError),

    /// Embedding model or cache failure.
    #[error(transparent)]
    Embedding(#[from] augur_embeddings::EmbeddingError),

    /// Index construction failed.
    #[error(transparent)]
    Search(#[from] augur_search::SearchError),

    /// Graph loading failed.
    #[error(transparent)]
    Graph(#[from] augur_graph::GraphError),

    /// An embedding row has no matching document.
    #[error("embedding cache row {row} has no matching document")]
    OrphanEmbedding { row: usize },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine was shut down.
    #[error("engine not initialized")]
    NotInitialized,

    /// No retrieval lane produced anything.
    #[error("pipeline failed: {message}")]
    Pipeline { trace_id: String, message: String },

    /// The caller cancelled the query.
    #[error("pipeline cancelled")]
    Cancelled { trace_id: String },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl RetrievalError {
    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Corpus(augur_corpus::CorpusError::SourceMissing(_))
            | Self::Graph(augur_graph::GraphError::SourceMissing(_)) => "source_missing",
            Self::Corpus(_) | Self::Graph(_) => "parse_error",
            Self::Embedding(augur_embeddings::EmbeddingError::CacheCorrupt { .. }) => {
                "cache_corrupt"
            }
            Self::Embedding(augur_embeddings::EmbeddingError::ModelLoadFailed { .. }) => {
                "model_load_failed"
            }
            Self::Embedding(_) | Self::Search(_) | Self::OrphanEmbedding { .. } => "index_error",
            Self::Config(_) => "config_error",
            Self::NotInitialized => "not_initialized",
            Self::Pipeline { .. } => "pipeline_error",
            Self::Cancelled { .. } => "pipeline_cancelled",
            Self::Io(_) | Self::Join(_) => "internal_error",
        }
    }

    /// Trace id of the failed query, when there is one.
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Self::Pipeline { trace_id, .. } | Self::Cancelled { trace_id } => Some(trace_id),
            _ => None,
        }
    }
}
