//! Error types for extraction and the LLM boundary.

use thiserror::Error;

/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractionError>;

/// Errors raised by the LLM client.
#[derive(Error, Debug)]
pub enum LlmError {
    /// No endpoint or model configured.
    #[error("LLM client not configured: {0}")]
    NotConfigured(String),

    /// Non-success HTTP status.
    #[error("LLM API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// Rate limited by the endpoint.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The response carried no usable completion.
    #[error("invalid LLM response: {0}")]
    InvalidResponse(String),

    /// The request did not finish in time.
    #[error("LLM request timed out after {0}ms")]
    Timeout(u64),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors that can occur during entity extraction.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// The LLM extractor failed.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// The LLM returned output that is not an entity list.
    #[error("could not parse LLM entities: {0}")]
    Parse(String),
}
