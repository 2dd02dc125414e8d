//! Builder errors and their process exit codes.

use std::path::PathBuf;

use thiserror::Error;

use augur_corpus::CorpusError;
use augur_embeddings::EmbeddingError;

/// Result type alias for builder operations.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Process exit codes of the `augur` binary.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const SOURCE_MISSING: i32 = 2;
    pub const HASH_MISMATCH: i32 = 3;
    pub const UNWRITABLE: i32 = 4;
}

#[derive(Error, Debug)]
pub enum BuildError {
    /// The rule directory is missing or holds no documents.
    #[error("source missing: {}", .0.display())]
    SourceMissing(PathBuf),

    /// The output exists with different content and `--force` was not given.
    #[error(
        "{} has content hash {existing}, rebuild produced {built}; pass --force to overwrite",
        path.display()
    )]
    HashMismatch {
        path: PathBuf,
        existing: String,
        built: String,
    },

    /// The corpus file or embedding cache could not be written.
    #[error("cannot write {}: {message}", path.display())]
    Unwritable { path: PathBuf, message: String },

    /// Rule files could not be turned into documents.
    #[error(transparent)]
    Corpus(#[from] CorpusError),

    /// The embedding model failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

impl BuildError {
    pub fn unwritable(path: impl Into<PathBuf>, err: impl ToString) -> Self {
        Self::Unwritable {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::SourceMissing(_)
            | Self::Corpus(CorpusError::SourceMissing(_) | CorpusError::EmptyCorpus(_)) => {
                exit_code::SOURCE_MISSING
            }
            Self::HashMismatch { .. } => exit_code::HASH_MISMATCH,
            Self::Unwritable { .. } => exit_code::UNWRITABLE,
            Self::Corpus(_) | Self::Embedding(_) => exit_code::FAILURE,
        }
    }
}

/// Exit code for an error surfaced at the CLI edge.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<BuildError>() {
        Some(err) => err.exit_code(),
        None => exit_code::FAILURE,
    }
}
