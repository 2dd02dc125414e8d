//! # Embeddings
//!
//! Embedding models and the on-disk embedding cache for the augur retrieval
//! core.
//!
//! ## Features
//!
//! - **Model registry**: lazily loaded, shared models with a single-writer
//!   encode gate
//! - **Providers**: deterministic hashing, OpenAI-compatible HTTP, and
//!   on-device fastembed models (`local-models` feature)
//! - **Caching**: float16 matrices keyed by model and corpus hash
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ModelRegistry ──► Model ──► EmbeddingMatrix ──► EmbeddingCache │
//! │       │              │                                          │
//! │       ▼              ▼                                          │
//! │  ModelLoader   EmbeddingProvider (hashing / remote / local)     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod hashing;
#[cfg(feature = "local-models")]
pub mod local;
pub mod matrix;
pub mod provider;
pub mod registry;
pub mod similarity;

pub use cache::{CacheHeader, CacheOutcome, CacheStatus, EmbeddingCache, data_hash};
pub use error::{EmbeddingError, Result};
pub use hashing::HashingProvider;
pub use matrix::EmbeddingMatrix;
pub use provider::{EmbeddingProvider, RemoteProvider};
pub use registry::{
    Device, DevicePreference, Model, ModelLoader, ModelRegistry, RegistryConfig, RemoteConfig,
    default_loader,
};
pub use similarity::{
    cosine_similarity, dot_product, find_top_k, normalize, rank_cmp, rescale_cosine,
};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension of embeddings when the model does not say otherwise
/// (multilingual MiniLM).
pub const DEFAULT_DIMENSION: usize = 384;

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "hashing-384";
