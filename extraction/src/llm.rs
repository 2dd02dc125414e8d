//! The LLM boundary.
//!
//! Every nondeterministic model call in the pipeline goes through
//! [`LlmClient`]. [`OpenAiClient`] speaks the OpenAI-compatible
//! `/chat/completions` protocol; tests substitute their own client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::entity::Entity;
use crate::error::{ExtractionError, LlmError, Result};
use crate::extractor::llm_entity;

/// Default base URL for [`OpenAiClient`].
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";

/// Default chat model.
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// A text completion endpoint.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier, recorded in traces.
    fn model(&self) -> &str;

    /// Complete `prompt`, producing at most `max_tokens` tokens.
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: usize,
    ) -> std::result::Result<String, LlmError>;
}

/// Connection settings for [`OpenAiClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-request deadline.
    pub timeout_ms: u64,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key: None,
            timeout_ms: 8_000,
            temperature: 0.0,
        }
    }
}

impl LlmConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Read `LLM_BASE_URL`, `LLM_MODEL` and `LLM_API_KEY` through `lookup`.
    /// Unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup("LLM_BASE_URL").filter(|v| !v.trim().is_empty()) {
            config = config.with_base_url(url.trim());
        }
        if let Some(model) = lookup("LLM_MODEL").filter(|v| !v.trim().is_empty()) {
            config.model = model.trim().to_string();
        }
        config.api_key = lookup("LLM_API_KEY").filter(|v| !v.trim().is_empty());
        config
    }

    /// Read the `LLM_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Client for OpenAI-compatible chat completion endpoints.
pub struct OpenAiClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> std::result::Result<Self, LlmError> {
        if config.base_url.trim().is_empty() || config.model.trim().is_empty() {
            return Err(LlmError::NotConfigured(
                "base URL and model are required".to_string(),
            ));
        }
        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    async fn send(&self, prompt: &str, max_tokens: usize) -> std::result::Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_tokens,
            "temperature": self.config.temperature,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }
        let response = request.send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatResponse = response.json().await?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(LlmError::InvalidResponse("empty completion".to_string()));
        }
        Ok(text)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(
        &self,
        prompt: &str,
        max_tokens: usize,
    ) -> std::result::Result<String, LlmError> {
        debug!(model = %self.config.model, max_tokens, "LLM completion");
        let deadline = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(deadline, self.send(prompt, max_tokens)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.config.timeout_ms)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

const ENTITY_PROMPT: &str = "Extract astrology, saju (Four Pillars) and tarot entities from the text below.\n\
Answer with a JSON array only. Each item: {\"text\": surface, \"type\": one of planet, sign, house, aspect, element, stem, branch, ten_god, shinsal, tarot_card, \"normalized\": canonical key, \"confidence\": 0..1}.\n\
Use English lowercase keys for planets, signs, aspects and elements, Hangul for stems, branches, ten gods and shinsal, and snake_case card names for tarot.\n\nText:\n";

/// Entity extraction through an [`LlmClient`].
pub struct LlmEntityExtractor {
    client: Arc<dyn LlmClient>,
    max_tokens: usize,
}

impl LlmEntityExtractor {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            max_tokens: 512,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Ask the model for entities in `text`. Records with an unknown type
    /// are skipped.
    pub async fn extract(&self, text: &str) -> Result<Vec<Entity>> {
        let prompt = format!("{ENTITY_PROMPT}{text}");
        let completion = self.client.complete(&prompt, self.max_tokens).await?;
        parse_entities(&completion)
    }
}

#[derive(Debug, Deserialize)]
struct LlmEntityRecord {
    #[serde(default)]
    text: String,
    #[serde(rename = "type")]
    entity_type: String,
    normalized: String,
    #[serde(default = "default_llm_confidence")]
    confidence: f32,
}

fn default_llm_confidence() -> f32 {
    0.7
}

/// Parse the JSON array embedded in a completion.
fn parse_entities(completion: &str) -> Result<Vec<Entity>> {
    let (Some(start), Some(end)) = (completion.find('['), completion.rfind(']')) else {
        return Err(ExtractionError::Parse("no JSON array in completion".to_string()));
    };
    if end < start {
        return Err(ExtractionError::Parse("no JSON array in completion".to_string()));
    }
    let records: Vec<LlmEntityRecord> = serde_json::from_str(&completion[start..=end])
        .map_err(|e| ExtractionError::Parse(e.to_string()))?;

    let mut entities = Vec::with_capacity(records.len());
    for record in records {
        let text = if record.text.is_empty() {
            record.normalized.as_str()
        } else {
            record.text.as_str()
        };
        match llm_entity(text, &record.entity_type, &record.normalized, record.confidence) {
            Some(entity) => entities.push(entity),
            None => warn!(
                "Skipping LLM entity {:?} of unknown type {:?}",
                record.normalized, record.entity_type
            ),
        }
    }
    Ok(entities)
}
