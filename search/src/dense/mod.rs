//! Dense vector search.
//!
//! [`DenseIndex`] picks a backend at build time: brute force for small
//! corpora or when ANN is disabled, HNSW otherwise.

pub mod brute;
pub mod hnsw;

use serde::{Deserialize, Serialize};
use tracing::info;

pub use brute::BruteForceIndex;
pub use hnsw::{HnswConfig, HnswIndex};

use crate::backend::{BackendStats, IndexRow, SearchBackend, SearchHit, SearchQuery};
use crate::error::{Result, SearchError};

/// Dense index configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenseConfig {
    /// Allow the HNSW backend (`USE_ANN`).
    pub ann_enabled: bool,

    /// Corpora smaller than this use brute force even with ANN enabled.
    pub brute_force_threshold: usize,

    pub hnsw: HnswConfig,
}

impl Default for DenseConfig {
    fn default() -> Self {
        Self {
            ann_enabled: true,
            brute_force_threshold: 2000,
            hnsw: HnswConfig::default(),
        }
    }
}

impl DenseConfig {
    pub fn with_ann(mut self, enabled: bool) -> Self {
        self.ann_enabled = enabled;
        self
    }

    pub fn with_brute_force_threshold(mut self, threshold: usize) -> Self {
        self.brute_force_threshold = threshold;
        self
    }

    /// Whether a corpus of `rows` rows would use HNSW.
    pub fn uses_ann(&self, rows: usize) -> bool {
        self.ann_enabled && rows >= self.brute_force_threshold
    }
}

/// Dense index over whichever backend the configuration selects.
pub struct DenseIndex {
    backend: Box<dyn SearchBackend>,
}

impl DenseIndex {
    /// Build a dense index over `rows`.
    pub fn build(config: &DenseConfig, dimension: usize, rows: Vec<IndexRow>) -> Result<Self> {
        if dimension == 0 {
            return Err(SearchError::InvalidConfig(
                "dense index dimension must be positive".to_string(),
            ));
        }
        let count = rows.len();
        let backend: Box<dyn SearchBackend> = if config.uses_ann(count) {
            Box::new(HnswIndex::with_rows(dimension, config.hnsw.clone(), rows)?)
        } else {
            Box::new(BruteForceIndex::with_rows(dimension, rows)?)
        };
        info!(
            backend = backend.name(),
            rows = count,
            dimension,
            "Built dense index"
        );
        Ok(Self { backend })
    }

    /// Wrap an explicit backend.
    pub fn from_backend(backend: Box<dyn SearchBackend>) -> Self {
        Self { backend }
    }
}

impl SearchBackend for DenseIndex {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        self.backend.search(query)
    }

    fn upsert(&mut self, rows: Vec<IndexRow>) -> Result<usize> {
        self.backend.upsert(rows)
    }

    fn stats(&self) -> BackendStats {
        self.backend.stats()
    }
}
