//! Deterministic feature-hashing embedding model.
//!
//! Each term from the corpus tokenizer is hashed (FNV-1a) into one of `dim`
//! buckets with a sign taken from the top hash bit. Whole words weigh more
//! than bigrams. The result needs no model download and is identical on every
//! machine, which makes it the offline and test model.

use async_trait::async_trait;

use augur_corpus::Tokenizer;

use crate::Embedding;
use crate::error::Result;
use crate::provider::EmbeddingProvider;
use crate::similarity::normalize;

/// Default width of hashing embeddings.
pub const DEFAULT_HASHING_DIMENSION: usize = 384;

const WORD_WEIGHT: f32 = 1.0;
const BIGRAM_WEIGHT: f32 = 0.5;

/// Feature-hashing provider.
#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimension: usize,
    model_id: String,
    tokenizer: Tokenizer,
}

impl HashingProvider {
    /// Create a provider producing `dimension`-wide vectors.
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model_id: format!("hashing-{dimension}"),
            tokenizer: Tokenizer::new(),
        }
    }

    /// Parse `hashing` or `hashing-<dim>`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.strip_prefix("hashing") {
            Some("") => Some(Self::default()),
            Some(rest) => rest
                .strip_prefix('-')
                .and_then(|dim| dim.parse().ok())
                .filter(|dim| *dim > 0)
                .map(Self::new),
            None => None,
        }
    }

    /// Embed one text synchronously.
    pub fn embed_sync(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        for term in self.tokenizer.tokenize(text) {
            let hash = fnv1a(term.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            let weight = if term.starts_with('#') {
                BIGRAM_WEIGHT
            } else {
                WORD_WEIGHT
            };
            vector[bucket] += sign * weight;
        }
        normalize(&mut vector);
        vector
    }
}

impl Default for HashingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn name(&self) -> &str {
        "hashing"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn is_available(&self) -> bool {
        true
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(PRIME)
    })
}
