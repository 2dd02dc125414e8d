//! Search backends for the augur retrieval core.
//!
//! Every backend implements [`SearchBackend`] so the pipeline can swap
//! dense and sparse implementations without touching fusion.

pub mod backend;
pub mod dense;
pub mod error;
pub mod sparse;

pub use backend::{
    BackendStats, IndexRow, RowMeta, SearchBackend, SearchFilter, SearchHit, SearchQuery,
};
pub use dense::{BruteForceIndex, DenseConfig, DenseIndex, HnswConfig, HnswIndex};
pub use error::{Result, SearchError};
pub use sparse::{Bm25Config, Bm25Index};
