//! Hypothetical document expansion.
//!
//! The LLM writes a short passage that would answer the query; the dense
//! lane embeds that passage instead of the query. Any failure falls back to
//! the original query.

use std::sync::Arc;

use tracing::warn;

use augur_extraction::LlmClient;

const HYDE_PROMPT: &str = "Write a short reference passage (2-4 sentences) that would answer the \
divinatory question below. Use the vocabulary of astrology, saju or tarot where it applies. \
Answer with the passage only.\n\nQuestion:\n";

/// Query expander backed by an [`LlmClient`].
#[derive(Clone)]
pub struct Hyde {
    client: Arc<dyn LlmClient>,
    max_tokens: usize,
}

impl std::fmt::Debug for Hyde {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hyde")
            .field("model", &self.client.model())
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl Hyde {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            max_tokens: 256,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Hypothetical passage for `query`, or `query` itself when the model
    /// fails or answers with nothing.
    pub async fn expand(&self, query: &str) -> String {
        let prompt = format!("{HYDE_PROMPT}{query}");
        match self.client.complete(&prompt, self.max_tokens).await {
            Ok(passage) if !passage.trim().is_empty() => passage.trim().to_string(),
            Ok(_) => {
                warn!("HyDE returned an empty passage; using the original query");
                query.to_string()
            }
            Err(e) => {
                warn!("HyDE failed: {e}; using the original query");
                query.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use augur_extraction::LlmError;
    use pretty_assertions::assert_eq;

    struct Canned(Result<String, u16>);

    #[async_trait]
    impl LlmClient for Canned {
        fn model(&self) -> &str {
            "canned"
        }

        async fn complete(&self, prompt: &str, _max_tokens: usize) -> Result<String, LlmError> {
            assert!(prompt.ends_with("Jupiter in Sagittarius"));
            self.0.clone().map_err(|status| LlmError::Api {
                status,
                body: "down".to_string(),
            })
        }
    }

    fn hyde(answer: Result<String, u16>) -> Hyde {
        Hyde::new(Arc::new(Canned(answer)))
    }

    #[tokio::test]
    async fn test_expands_query() {
        let passage = hyde(Ok("  Jupiter in Sagittarius widens horizons.\n".to_string()))
            .expand("Jupiter in Sagittarius")
            .await;
        assert_eq!(passage, "Jupiter in Sagittarius widens horizons.");
    }

    #[tokio::test]
    async fn test_falls_back_to_query() {
        for answer in [Ok("   ".to_string()), Err(503)] {
            let passage = hyde(answer).expand("Jupiter in Sagittarius").await;
            assert_eq!(passage, "Jupiter in Sagittarius");
        }
    }
}
