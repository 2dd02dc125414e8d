//! Embedding providers.
//!
//! A provider turns texts into raw vectors. Batching, normalisation and
//! single-writer gating live in [`crate::registry::Model`].

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Identifier of the model, recorded in cache headers.
    fn model_id(&self) -> &str;

    /// Width of the produced vectors.
    fn dimension(&self) -> usize;

    /// Generate embeddings for multiple texts, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding returned".to_string()))
    }

    /// Check if the provider is available (endpoint set, model present, etc.).
    fn is_available(&self) -> bool;
}

/// Default base URL for [`RemoteProvider`].
pub const DEFAULT_REMOTE_BASE_URL: &str = "https://api.openai.com/v1";

/// Provider for OpenAI-compatible `/embeddings` endpoints.
pub struct RemoteProvider {
    /// API key, sent as a bearer token when present.
    api_key: Option<String>,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Model name sent with every request.
    model: String,

    /// Expected vector width.
    dimension: usize,
}

impl RemoteProvider {
    /// Create a provider for `model` producing `dimension`-wide vectors.
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_REMOTE_BASE_URL.to_string(),
            client: reqwest::Client::new(),
            model: model.into(),
            dimension,
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Dimension of well-known hosted models, if known.
    pub fn known_dimension(model: &str) -> Option<usize> {
        match model {
            "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
            "text-embedding-3-large" => Some(3072),
            _ => None,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteProvider {
    fn name(&self) -> &str {
        "remote"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Generating batch embeddings for {} texts with model: {}",
            texts.len(),
            self.model
        );

        let body = serde_json::json!({
            "input": texts,
            "model": self.model,
        });

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }
        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

            return Err(EmbeddingError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiRequest(format!(
                "API error: {error_text}"
            )));
        }

        let mut result: RemoteEmbeddingResponse = response.json().await?;
        if result.data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                result.data.len()
            )));
        }
        result.data.sort_by_key(|item| item.index);

        let mut embeddings = Vec::with_capacity(result.data.len());
        for item in result.data {
            if item.embedding.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: item.embedding.len(),
                });
            }
            embeddings.push(item.embedding);
        }

        info!("Generated {} batch embeddings", embeddings.len());
        Ok(embeddings)
    }

    fn is_available(&self) -> bool {
        !self.base_url.is_empty()
    }
}

/// OpenAI-compatible response format.
#[derive(Debug, Deserialize)]
struct RemoteEmbeddingResponse {
    data: Vec<RemoteEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct RemoteEmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}
