//! One-shot queries against a freshly initialized engine.

use std::collections::BTreeMap;
use std::path::PathBuf;

use augur_retrieval::{
    ApiError, FeatureFlags, QueryRequest, QueryResponse, RetrievalConfig, RetrievalEngine,
    RetrievalError,
};

/// Inputs of the `query` subcommand.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub text: String,
    pub config: Option<PathBuf>,
    pub corpus: Option<PathBuf>,
    pub graph_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub domain: Option<String>,
    pub locale: Option<String>,
    pub top_k: Option<usize>,
    /// `NAME=bool` flag overrides for this query.
    pub flags: Vec<String>,
}

/// Parse `USE_BM25=false` style overrides.
pub fn parse_flags(pairs: &[String]) -> Result<BTreeMap<String, bool>, RetrievalError> {
    let mut flags = BTreeMap::new();
    for pair in pairs {
        let (name, value) = pair.split_once('=').unwrap_or((pair.as_str(), "true"));
        let name = name.trim().to_uppercase();
        if !FeatureFlags::NAMES.contains(&name.as_str()) {
            return Err(RetrievalError::Config(format!("unknown flag {name}")));
        }
        let value = augur_retrieval::config::parse_bool(value)
            .ok_or_else(|| RetrievalError::Config(format!("{name}: not a boolean: {value}")))?;
        flags.insert(name, value);
    }
    Ok(flags)
}

/// Load the configuration, build the engine and run one query.
pub async fn run_query(options: &QueryOptions) -> Result<QueryResponse, RetrievalError> {
    let mut config = RetrievalConfig::load(options.config.as_deref())?;
    if let Some(corpus) = &options.corpus {
        config.corpus_path = corpus.clone();
    }
    if let Some(dir) = &options.graph_dir {
        config.graph_dir = Some(dir.clone());
    }
    if let Some(dir) = &options.cache_dir {
        config.cache_dir = Some(dir.clone());
    }

    let mut request = QueryRequest::new(&options.text);
    request.domain = options.domain.clone();
    request.locale = options.locale.clone();
    request.top_k = options.top_k;
    request.flags = parse_flags(&options.flags)?;

    let engine = RetrievalEngine::init(config).await?;
    let response = engine.query(&request).await;
    engine.shutdown().await;
    response
}

/// JSON body for a failed query.
pub fn error_body(err: &RetrievalError) -> serde_json::Value {
    serde_json::json!({ "error": ApiError::from(err) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_flags() {
        let flags =
            parse_flags(&["use_bm25=false".to_string(), "USE_GRAPH".to_string()]).unwrap();
        assert_eq!(
            flags.into_iter().collect::<Vec<_>>(),
            vec![
                ("USE_BM25".to_string(), false),
                ("USE_GRAPH".to_string(), true)
            ]
        );
        assert!(parse_flags(&["USE_NOTHING=1".to_string()]).is_err());
        assert!(parse_flags(&["USE_BM25=maybe".to_string()]).is_err());
    }
}
