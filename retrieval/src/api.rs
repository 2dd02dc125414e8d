//! Request and response types of the inbound API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use augur_extraction::Relation;
use augur_graph::Path;

use crate::context::BuiltContext;
use crate::error::RetrievalError;
use crate::fusion::FusedHit;
use crate::trace::Trace;

/// A retrieval query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub text: String,

    /// Language hint (`ko`, `en`); detected when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,

    /// Per-query flag overrides keyed by environment name (`USE_BM25`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub flags: BTreeMap<String, bool>,

    /// Caps every stage deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_flag(mut self, name: impl Into<String>, value: bool) -> Self {
        self.flags.insert(name.into(), value);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Trimmed, lowercased domain; blank counts as absent.
    pub fn normalized_domain(&self) -> Option<String> {
        self.domain
            .as_deref()
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
    }

    /// Requested result count, at least one.
    pub fn effective_top_k(&self, default: usize) -> usize {
        self.top_k.unwrap_or(default).max(1)
    }
}

/// What the pipeline did for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    /// Lanes that took part in fusion, with their effective weight.
    pub lanes: BTreeMap<String, f64>,

    /// Hits returned per lane.
    pub lane_hits: BTreeMap<String, usize>,

    /// Graph node ids of the extracted entities.
    pub entities: Vec<String>,

    pub relations: Vec<Relation>,

    /// Traversal paths from the graph lane.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<Path>,

    /// Whether the dense lane embedded a HyDE passage.
    pub expanded: bool,

    /// Candidates scored by the reranker.
    pub reranked: usize,

    /// Fused results, best first.
    pub results: Vec<FusedHit>,

    pub latency_ms: f64,
}

impl QueryStats {
    /// `doc_id` of the best result.
    pub fn top_doc(&self) -> Option<&str> {
        self.results.first().map(|hit| hit.doc_id.as_str())
    }
}

/// Successful query response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub context: BuiltContext,
    pub trace: Trace,
    pub stats: QueryStats,
}

/// Engine health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub index_size: usize,
    pub model_id: String,
    /// Whether the embedding cache on disk matches the loaded corpus.
    pub cache_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidateRequest {
    /// Wildcard over cached query texts (`*`, `?`).
    pub pattern: String,
}

impl InvalidateRequest {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub cleared: usize,
}

/// Error body returned instead of a partial context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl From<&RetrievalError> for ApiError {
    fn from(err: &RetrievalError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            trace_id: err.trace_id().map(str::to_string),
        }
    }
}

impl From<RetrievalError> for ApiError {
    fn from(err: RetrievalError) -> Self {
        Self::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_from_json() {
        let request: QueryRequest = serde_json::from_str(
            r#"{"text":"Jupiter in Sagittarius","flags":{"USE_BM25":false},"top_k":3}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            QueryRequest::new("Jupiter in Sagittarius")
                .with_flag("USE_BM25", false)
                .with_top_k(3)
        );
    }

    #[test]
    fn test_request_normalization() {
        let request = QueryRequest::new("q").with_domain("  Career ").with_top_k(0);
        assert_eq!(request.normalized_domain().as_deref(), Some("career"));
        assert_eq!(request.effective_top_k(5), 1);

        let blank = QueryRequest::new("q").with_domain("   ");
        assert_eq!(blank.normalized_domain(), None);
        assert_eq!(blank.effective_top_k(5), 5);
    }

    #[test]
    fn test_pipeline_error_body() {
        let err = RetrievalError::Pipeline {
            trace_id: "t-1".to_string(),
            message: "every retrieval lane failed".to_string(),
        };
        let body = ApiError::from(err);
        assert_eq!(body.code, "pipeline_error");
        assert_eq!(body.trace_id.as_deref(), Some("t-1"));
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "code": "pipeline_error",
                "message": "pipeline failed: every retrieval lane failed",
                "trace_id": "t-1",
            })
        );
    }
}
