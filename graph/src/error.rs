//! Error types for the knowledge graph.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur while loading or querying the graph.
#[derive(Error, Debug)]
pub enum GraphError {
    /// The graph directory does not exist.
    #[error("graph directory missing: {}", .0.display())]
    SourceMissing(PathBuf),

    /// A CSV file could not be parsed.
    #[error("parse error in {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A required column is absent from a CSV header.
    #[error("{} is missing required column `{column}`", path.display())]
    MissingColumn { path: PathBuf, column: String },

    /// A store without a source directory cannot be reloaded.
    #[error("graph was not loaded from disk")]
    NotReloadable,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphError {
    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}
