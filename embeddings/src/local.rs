//! On-device embedding model backed by fastembed (ONNX runtime).

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::provider::EmbeddingProvider;
use crate::registry::Device;

/// Name under which the multilingual MiniLM model is registered.
pub const MULTILINGUAL_MINILM: &str = "paraphrase-multilingual-minilm-l12-v2";

/// Multilingual MiniLM embedder.
///
/// Downloads the model on first use. Inference is synchronous, so batches run
/// on the blocking pool.
pub struct LocalProvider {
    model: Arc<Mutex<TextEmbedding>>,
    model_id: String,
    dimension: usize,
}

impl LocalProvider {
    /// Load the model named `name` for `device`.
    pub fn load(name: &str, device: Device) -> Result<Self> {
        let (model, dimension) = match name {
            MULTILINGUAL_MINILM | "multilingual-minilm" => {
                (EmbeddingModel::ParaphraseMLMiniLML12V2, 384)
            }
            other => {
                return Err(EmbeddingError::load_failed(other, "unknown local model"));
            }
        };

        info!("Loading local embedding model {name} on {device}");
        let opts = InitOptions::new(model).with_show_download_progress(false);
        let model =
            TextEmbedding::try_new(opts).map_err(|e| EmbeddingError::load_failed(name, e))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_id: MULTILINGUAL_MINILM.to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| EmbeddingError::InvalidResponse("model lock poisoned".to_string()))?;
            guard
                .embed(texts, None)
                .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))
        })
        .await?
    }

    fn is_available(&self) -> bool {
        true
    }
}
