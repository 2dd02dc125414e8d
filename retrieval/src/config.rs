//! Configuration for the retrieval engine.
//!
//! Layering is defaults, then an optional TOML file, then environment flags.
//! Environment access goes through a lookup closure.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use augur_corpus::LoaderConfig;
use augur_embeddings::{DEFAULT_MODEL, DevicePreference, RegistryConfig};
use augur_extraction::{ExtractorConfig, LlmConfig};
use augur_graph::TraversalConfig;
use augur_search::{Bm25Config, DenseConfig};

use crate::context::ContextStyle;
use crate::error::{Result, RetrievalError};
use crate::fusion::LaneWeights;

/// Feature switches, one per environment flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// `USE_DENSE`
    pub dense: bool,
    /// `USE_ANN`
    pub ann: bool,
    /// `USE_BM25`
    pub bm25: bool,
    /// `USE_GRAPH`. Off unless asked for.
    pub graph: bool,
    /// `USE_RERANKER`
    pub reranker: bool,
    /// `USE_HYDE`
    pub hyde: bool,
    /// `USE_LLM_NER`
    pub llm_ner: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            dense: true,
            ann: true,
            bm25: true,
            graph: false,
            reranker: true,
            hyde: false,
            llm_ner: false,
        }
    }
}

impl FeatureFlags {
    /// Flag names understood by [`FeatureFlags::set`].
    pub const NAMES: [&'static str; 7] = [
        "USE_DENSE",
        "USE_ANN",
        "USE_BM25",
        "USE_GRAPH",
        "USE_RERANKER",
        "USE_HYDE",
        "USE_LLM_NER",
    ];

    /// Set a flag by its environment name. Returns `false` for unknown names.
    pub fn set(&mut self, name: &str, value: bool) -> bool {
        let slot = match name.trim().to_uppercase().as_str() {
            "USE_DENSE" => &mut self.dense,
            "USE_ANN" => &mut self.ann,
            "USE_BM25" => &mut self.bm25,
            "USE_GRAPH" => &mut self.graph,
            "USE_RERANKER" => &mut self.reranker,
            "USE_HYDE" => &mut self.hyde,
            "USE_LLM_NER" => &mut self.llm_ner,
            _ => return false,
        };
        *slot = value;
        true
    }

    /// Copy with per-query overrides applied. Unknown names are ignored.
    pub fn with_overrides(&self, overrides: &BTreeMap<String, bool>) -> Self {
        let mut flags = self.clone();
        for (name, value) in overrides {
            if !flags.set(name, *value) {
                tracing::warn!("Ignoring unknown flag {name}");
            }
        }
        flags
    }

    /// Apply every flag present in the environment.
    pub fn apply_lookup(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        for name in Self::NAMES {
            if let Some(value) = lookup(name).as_deref().and_then(parse_bool) {
                self.set(name, value);
            }
        }
    }
}

/// Per-lane and per-stage deadlines in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub extract_ms: u64,
    pub expand_ms: u64,
    pub dense_ms: u64,
    pub sparse_ms: u64,
    pub graph_ms: u64,
    pub rerank_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            extract_ms: 2_000,
            expand_ms: 8_000,
            dense_ms: 2_000,
            sparse_ms: 1_000,
            graph_ms: 1_000,
            rerank_ms: 3_000,
        }
    }
}

impl TimeoutConfig {
    /// Every deadline capped at `budget_ms`.
    pub fn capped(&self, budget_ms: u64) -> Self {
        Self {
            extract_ms: self.extract_ms.min(budget_ms),
            expand_ms: self.expand_ms.min(budget_ms),
            dense_ms: self.dense_ms.min(budget_ms),
            sparse_ms: self.sparse_ms.min(budget_ms),
            graph_ms: self.graph_ms.min(budget_ms),
            rerank_ms: self.rerank_ms.min(budget_ms),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Built JSONL corpus, or a rule directory loaded on start.
    pub corpus_path: PathBuf,

    /// Graph CSV directory. The graph lane is disabled when absent.
    pub graph_dir: Option<PathBuf>,

    /// Embedding cache directory. Embeddings are recomputed on every start
    /// when absent.
    pub cache_dir: Option<PathBuf>,

    /// Registry name of the embedding model.
    pub model: String,

    pub flags: FeatureFlags,

    /// Default lane weights.
    pub weights: LaneWeights,

    /// Lane weight overrides per query domain.
    pub domain_weights: BTreeMap<String, LaneWeights>,

    pub timeouts: TimeoutConfig,

    /// Results returned when the request does not say.
    pub top_k: usize,

    /// Candidates requested from each lane.
    pub lane_k: usize,

    /// Candidates handed to the reranker.
    pub rerank_candidates: usize,

    /// Reranker batch size.
    pub rerank_batch_size: usize,

    /// RRF smoothing constant.
    pub rrf_k: f64,

    /// PageRank bonus weight, clamped to `[0, 0.05]`.
    pub pagerank_alpha: f64,

    /// Context budget in characters.
    pub max_context_chars: usize,

    /// Default context style.
    pub style: ContextStyle,

    /// Context style overrides per query domain.
    pub domain_styles: BTreeMap<String, ContextStyle>,

    /// Query cache capacity; zero disables the cache.
    pub query_cache_size: usize,

    pub dense: DenseConfig,
    pub bm25: Bm25Config,
    pub traversal: TraversalConfig,
    pub extractor: ExtractorConfig,
    pub loader: LoaderConfig,
    pub registry: RegistryConfig,
    pub llm: LlmConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            corpus_path: PathBuf::from("data/tarot_corpus_v1.jsonl"),
            graph_dir: None,
            cache_dir: None,
            model: DEFAULT_MODEL.to_string(),
            flags: FeatureFlags::default(),
            weights: LaneWeights::default(),
            domain_weights: BTreeMap::new(),
            timeouts: TimeoutConfig::default(),
            top_k: 5,
            lane_k: 20,
            rerank_candidates: 50,
            rerank_batch_size: 16,
            rrf_k: 60.0,
            pagerank_alpha: 0.02,
            max_context_chars: 4_000,
            style: ContextStyle::default(),
            domain_styles: BTreeMap::new(),
            query_cache_size: 128,
            dense: DenseConfig::default(),
            bm25: Bm25Config::default(),
            traversal: TraversalConfig::default(),
            extractor: ExtractorConfig::default(),
            loader: LoaderConfig::default(),
            registry: RegistryConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl RetrievalConfig {
    /// Create a configuration for the corpus at `corpus_path`.
    pub fn new(corpus_path: impl Into<PathBuf>) -> Self {
        Self {
            corpus_path: corpus_path.into(),
            ..Self::default()
        }
    }

    pub fn with_graph_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.graph_dir = Some(dir.into());
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_flags(mut self, flags: FeatureFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_domain_weights(mut self, domain: impl Into<String>, weights: LaneWeights) -> Self {
        self.domain_weights.insert(domain.into(), weights);
        self
    }

    pub fn with_max_context_chars(mut self, max_chars: usize) -> Self {
        self.max_context_chars = max_chars;
        self
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RetrievalError::Config(e.to_string()))
    }

    /// Read a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_lookup(&|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_lookup(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        self.flags.apply_lookup(lookup);
        self.dense.ann_enabled = self.flags.ann;

        let set = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(path) = set("CORPUS_PATH") {
            self.corpus_path = PathBuf::from(path);
        }
        if let Some(dir) = set("GRAPH_DIR") {
            self.graph_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = set("EMBED_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(model) = set("EMBED_MODEL") {
            self.model = model;
        }
        if let Some(value) = set("MAX_CONTEXT_CHARS") {
            self.max_context_chars = value.parse().map_err(|_| {
                RetrievalError::Config(format!("MAX_CONTEXT_CHARS is not a number: {value}"))
            })?;
        }
        if let Some(value) = set("RAG_DEVICE") {
            self.registry.device = DevicePreference::parse(&value).ok_or_else(|| {
                RetrievalError::Config(format!("RAG_DEVICE must be auto, cpu or cuda: {value}"))
            })?;
        }

        let llm = LlmConfig::from_lookup(lookup);
        if lookup("LLM_BASE_URL").is_some() {
            self.llm.base_url = llm.base_url;
        }
        if lookup("LLM_MODEL").is_some() {
            self.llm.model = llm.model;
        }
        if llm.api_key.is_some() {
            self.llm.api_key = llm.api_key;
        }
        Ok(())
    }

    /// Lane weights for a query domain.
    pub fn weights_for(&self, domain: Option<&str>) -> &LaneWeights {
        domain
            .and_then(|d| self.domain_weights.get(d))
            .unwrap_or(&self.weights)
    }

    /// Context style for a query domain.
    pub fn style_for(&self, domain: Option<&str>) -> &ContextStyle {
        domain
            .and_then(|d| self.domain_styles.get(d))
            .unwrap_or(&self.style)
    }
}

/// Parse the boolean spellings used in environment flags.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RetrievalConfig::default();
        config
            .apply_lookup(&env(&[
                ("USE_BM25", "false"),
                ("USE_ANN", "0"),
                ("USE_HYDE", "yes"),
                ("CORPUS_PATH", "/data/corpus.jsonl"),
                ("MAX_CONTEXT_CHARS", "1200"),
                ("RAG_DEVICE", "cpu"),
                ("LLM_MODEL", "local-llm"),
            ]))
            .unwrap();

        assert!(!config.flags.bm25);
        assert!(!config.dense.ann_enabled);
        assert!(config.flags.hyde);
        assert_eq!(config.corpus_path, PathBuf::from("/data/corpus.jsonl"));
        assert_eq!(config.max_context_chars, 1200);
        assert_eq!(config.registry.device, DevicePreference::Cpu);
        assert_eq!(config.llm.model, "local-llm");
    }

    #[test]
    fn test_bad_env_values() {
        let mut config = RetrievalConfig::default();
        assert!(
            config
                .apply_lookup(&env(&[("MAX_CONTEXT_CHARS", "lots")]))
                .is_err()
        );
        assert!(config.apply_lookup(&env(&[("RAG_DEVICE", "tpu")])).is_err());
    }

    #[test]
    fn test_toml_layering() {
        let config = RetrievalConfig::from_toml(
            r#"
            corpus_path = "corpus.jsonl"
            top_k = 8

            [flags]
            reranker = false

            [domain_weights.love]
            dense = 0.5
            sparse = 1.0
            graph = 0.9
            "#,
        )
        .unwrap();
        assert_eq!(config.top_k, 8);
        assert!(!config.flags.reranker);
        assert!(config.flags.bm25);
        assert_eq!(config.weights_for(Some("love")).graph, 0.9);
        assert_eq!(config.weights_for(Some("love")).rerank, 1.0);
        assert_eq!(config.weights_for(Some("career")).graph, 0.6);
        assert_eq!(config.max_context_chars, 4_000);
    }

    #[test]
    fn test_flag_overrides() {
        let flags = FeatureFlags::default().with_overrides(&BTreeMap::from([
            ("USE_BM25".to_string(), false),
            ("use_graph".to_string(), true),
            ("USE_NOTHING".to_string(), true),
        ]));
        assert!(!flags.bm25);
        assert!(flags.graph);
        assert!(flags.dense);
    }
}
