//! End-to-end tests of the retrieval engine over the fixture corpus.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use augur_corpus::{CorpusLoader, DocType};
use augur_embeddings::{DEFAULT_MODEL, EmbeddingCache, ModelRegistry, RegistryConfig, data_hash};
use augur_extraction::EntityExtractor;
use augur_retrieval::{
    Document, EngineBuilder, LaneOutput, LaneRequest, LaneWeights, QueryRequest, Reranker,
    RetrievalConfig, RetrievalEngine, RetrievalLane, SpanStatus, Stage, StageError,
};
use augur_search::SearchHit;

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load_rules(dir: &Path) -> Vec<Document> {
    let tagger = Arc::new(EntityExtractor::new()).into_tagger();
    CorpusLoader::new().with_tagger(tagger).load(dir).unwrap()
}

fn registry() -> Arc<ModelRegistry> {
    Arc::new(ModelRegistry::new(RegistryConfig::default()))
}

fn builder(config: RetrievalConfig) -> EngineBuilder {
    RetrievalEngine::builder(config).with_registry(registry())
}

async fn fixture_engine() -> (RetrievalEngine, Vec<Document>) {
    let docs = load_rules(&fixtures().join("rules"));
    let config = RetrievalConfig::new(fixtures().join("rules")).with_graph_dir(fixtures().join("graph"));
    let engine = builder(config).with_documents(docs.clone()).build().await.unwrap();
    (engine, docs)
}

fn doc<'a>(docs: &'a [Document], doc_id: &str) -> &'a Document {
    docs.iter().find(|d| d.doc_id == doc_id).unwrap()
}

fn ids(response: &augur_retrieval::QueryResponse) -> Vec<String> {
    response
        .stats
        .results
        .iter()
        .map(|hit| hit.doc_id.clone())
        .collect()
}

#[tokio::test]
async fn test_dense_only_query() {
    let (engine, docs) = fixture_engine().await;
    let request = QueryRequest::new("Jupiter in Sagittarius")
        .with_flag("USE_BM25", false)
        .with_flag("USE_RERANKER", false)
        .with_flag("USE_HYDE", false);
    let response = engine.query(&request).await.unwrap();

    let top = doc(&docs, response.stats.top_doc().unwrap());
    assert!(top.has_tag("planet:jupiter"));
    assert!(top.has_tag("sign:sagittarius"));
    assert_eq!(
        response.stats.lanes.into_iter().collect::<Vec<_>>(),
        vec![("dense".to_string(), 1.0)]
    );
    assert_eq!(response.trace.status_of(Stage::Sparse), Some(&SpanStatus::Skipped));
    assert!(response.context.text.contains("Jupiter in Sagittarius"));
}

#[tokio::test]
async fn test_bm25_matches_misspelled_query() {
    let (engine, docs) = fixture_engine().await;
    let request = QueryRequest::new("Juppiter Saggitarius").with_flag("USE_DENSE", false);
    let response = engine.query(&request).await.unwrap();

    assert!(!response.stats.lanes.contains_key("dense"));
    let top5: Vec<&Document> = response
        .stats
        .results
        .iter()
        .take(5)
        .map(|hit| doc(&docs, &hit.doc_id))
        .collect();
    assert!(top5.iter().any(|d| d.has_tag("planet:jupiter")));
}

#[tokio::test]
async fn test_graph_lane_alone() {
    let (engine, docs) = fixture_engine().await;
    let request = QueryRequest::new("갑목 일간")
        .with_flag("USE_DENSE", false)
        .with_flag("USE_BM25", false)
        .with_flag("USE_RERANKER", false)
        .with_flag("USE_GRAPH", true);
    let response = engine.query(&request).await.unwrap();

    let entities: BTreeSet<&str> = response.stats.entities.iter().map(String::as_str).collect();
    assert!(entities.contains("stem:갑"));
    assert!(entities.contains("element:wood"));
    assert!(!response.stats.paths.is_empty());
    assert_eq!(response.trace.status_of(Stage::Graph), Some(&SpanStatus::Ok));
    assert!(
        response
            .stats
            .results
            .iter()
            .any(|hit| doc(&docs, &hit.doc_id).has_tag("stem:갑"))
    );
    assert_eq!(
        response.stats.lanes.keys().collect::<Vec<_>>(),
        vec!["graph"]
    );
}

/// Returns its ids in order, with descending scores.
struct FixedLane {
    kind: Stage,
    ids: Vec<&'static str>,
    delay: Option<Duration>,
}

impl FixedLane {
    fn new(kind: Stage, ids: &[&'static str]) -> Self {
        Self {
            kind,
            ids: ids.to_vec(),
            delay: None,
        }
    }

    fn slow(kind: Stage, delay: Duration) -> Self {
        Self {
            kind,
            ids: Vec::new(),
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl RetrievalLane for FixedLane {
    fn kind(&self) -> Stage {
        self.kind
    }

    async fn retrieve(&self, _request: &LaneRequest) -> Result<LaneOutput, StageError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let hits = self
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| SearchHit::new(*id, 0.9 - i as f32 * 0.1))
            .collect();
        Ok(LaneOutput::hits(hits))
    }
}

/// Prefers the text that sorts last.
struct ReverseReranker;

impl Reranker for ReverseReranker {
    fn name(&self) -> &str {
        "reverse"
    }

    fn score_batch(&self, _query: &str, texts: &[&str]) -> Result<Vec<f32>, StageError> {
        Ok(texts
            .iter()
            .map(|t| f32::from(t.as_bytes().first().copied().unwrap_or_default()))
            .collect())
    }
}

fn memory_doc(id: &str, text: &str) -> Document {
    Document {
        doc_id: id.to_string(),
        doc_type: DocType::Corpus,
        card_id: None,
        domain: "general".to_string(),
        orientation: None,
        position: None,
        text: text.to_string(),
        tags: Default::default(),
        source: "memory".to_string(),
        version: "v1".to_string(),
    }
}

#[tokio::test]
async fn test_reranker_breaks_fusion_ties() {
    let mut config = RetrievalConfig::default();
    config.weights = LaneWeights {
        dense: 1.0,
        sparse: 1.0,
        ..LaneWeights::default()
    };
    let engine = builder(config)
        .with_documents(vec![
            memory_doc("a", "a first passage."),
            memory_doc("b", "b second passage."),
        ])
        .with_lane(Arc::new(FixedLane::new(Stage::Dense, &["a", "b"])))
        .with_lane(Arc::new(FixedLane::new(Stage::Sparse, &["b", "a"])))
        .with_reranker(Arc::new(ReverseReranker))
        .build()
        .await
        .unwrap();

    let plain = QueryRequest::new("passage").with_flag("USE_RERANKER", false);
    let response = engine.query(&plain).await.unwrap();
    assert_eq!(ids(&response), vec!["a", "b"]);
    assert_eq!(response.stats.results[0].score, response.stats.results[1].score);

    let reranked = QueryRequest::new("passage");
    for _ in 0..2 {
        let response = engine.query(&reranked).await.unwrap();
        assert_eq!(ids(&response), vec!["b", "a"]);
        assert_eq!(response.stats.reranked, 2);
        assert!(response.context.text.starts_with("1. [memory] b second"));
    }
}

fn copy_rules(from: &Path, to: &Path) {
    for entry in fs::read_dir(from).unwrap() {
        let path = entry.unwrap().path();
        let target = to.join(path.file_name().unwrap());
        if path.is_dir() {
            fs::create_dir_all(&target).unwrap();
            copy_rules(&path, &target);
        } else {
            fs::copy(&path, &target).unwrap();
        }
    }
}

fn corpus_hash(rules: &Path) -> String {
    let texts: Vec<String> = load_rules(rules).into_iter().map(|d| d.text).collect();
    data_hash(DEFAULT_MODEL, &texts)
}

#[tokio::test]
async fn test_embedding_cache_follows_corpus_edits() {
    let temp = tempfile::tempdir().unwrap();
    let rules = temp.path().join("rules");
    let cache_dir = temp.path().join("cache");
    fs::create_dir_all(&rules).unwrap();
    copy_rules(&fixtures().join("rules"), &rules);

    let config = RetrievalConfig::new(&rules).with_cache_dir(&cache_dir);
    let cache_file = EmbeddingCache::new(&cache_dir).path_for(DEFAULT_MODEL);
    let query = QueryRequest::new("snake dream").with_flag("USE_RERANKER", false);

    let first = builder(config.clone()).build().await.unwrap();
    assert!(first.health().await.cache_valid);
    let original_bytes = fs::read(&cache_file).unwrap();
    let original_hash = corpus_hash(&rules);
    let before = first.query(&query).await.unwrap();
    assert!(before.context.text.contains("hidden wisdom"));

    let symbols = rules.join("dream/symbols.json");
    let original_json = fs::read_to_string(&symbols).unwrap();
    fs::write(
        &symbols,
        original_json.replace("hidden wisdom", "shed habits and renewal"),
    )
    .unwrap();

    let edited = builder(config.clone()).build().await.unwrap();
    let edited_hash = corpus_hash(&rules);
    assert_ne!(edited_hash, original_hash);
    let edited_bytes = fs::read(&cache_file).unwrap();
    assert_ne!(edited_bytes, original_bytes);
    assert!(String::from_utf8_lossy(&edited_bytes).contains(&edited_hash));
    assert!(!first.health().await.cache_valid);
    assert!(edited.health().await.cache_valid);

    let after = edited.query(&query).await.unwrap();
    assert!(after.context.text.contains("shed habits and renewal"));
    assert!(!after.context.text.contains("hidden wisdom"));

    fs::write(&symbols, original_json).unwrap();
    let reverted = builder(config).build().await.unwrap();
    assert!(reverted.health().await.cache_valid);
    assert_eq!(fs::read(&cache_file).unwrap(), original_bytes);
}

#[tokio::test]
async fn test_slow_graph_lane_times_out() {
    let mut config = RetrievalConfig::default();
    config.timeouts.graph_ms = 1;
    let engine = builder(config)
        .with_documents(load_rules(&fixtures().join("rules")))
        .with_lane(Arc::new(FixedLane::slow(Stage::Graph, Duration::from_millis(200))))
        .build()
        .await
        .unwrap();

    let request = QueryRequest::new("Jupiter in Sagittarius").with_flag("USE_GRAPH", true);
    let response = engine.query(&request).await.unwrap();

    assert!(!response.context.is_empty());
    assert_eq!(
        response.trace.status_of(Stage::Graph),
        Some(&SpanStatus::StageTimeout)
    );
    assert!(response.stats.lanes.contains_key("dense"));
    assert!(response.stats.lanes.contains_key("sparse"));
    assert!(!response.stats.lanes.contains_key("graph"));
}

#[tokio::test]
async fn test_repeated_queries_are_deterministic() {
    let docs = load_rules(&fixtures().join("rules"));
    let mut config = RetrievalConfig::new(fixtures().join("rules"));
    config.query_cache_size = 0;
    let engine = builder(config).with_documents(docs).build().await.unwrap();

    let request = QueryRequest::new("career growth with Jupiter");
    let first = engine.query(&request).await.unwrap();
    let second = engine.query(&request).await.unwrap();
    assert!(!second.trace.cached);
    assert_eq!(first.stats.results, second.stats.results);
    assert_eq!(first.context, second.context);
}

#[tokio::test]
async fn test_disabling_a_lane_keeps_other_lane_hits() {
    let (engine, _) = fixture_engine().await;
    let sparse_ids = |response: &augur_retrieval::QueryResponse| -> BTreeSet<String> {
        response
            .stats
            .results
            .iter()
            .filter(|hit| hit.lanes.contains(&Stage::Sparse))
            .map(|hit| hit.doc_id.clone())
            .collect()
    };
    let base = QueryRequest::new("Venus in Libra love")
        .with_top_k(50)
        .with_flag("USE_RERANKER", false);

    let hybrid = engine.query(&base).await.unwrap();
    let sparse_only = engine
        .query(&base.clone().with_flag("USE_DENSE", false))
        .await
        .unwrap();

    assert_eq!(hybrid.stats.lane_hits["sparse"], sparse_only.stats.lane_hits["sparse"]);
    assert_eq!(sparse_ids(&hybrid), sparse_ids(&sparse_only));
}

#[tokio::test]
async fn test_context_respects_budget() {
    let docs = load_rules(&fixtures().join("rules"));
    let config = RetrievalConfig::new(fixtures().join("rules")).with_max_context_chars(140);
    let engine = builder(config).with_documents(docs).build().await.unwrap();

    let response = engine
        .query(&QueryRequest::new("dream of fortune and wealth"))
        .await
        .unwrap();
    let text = &response.context.text;
    assert!(!text.is_empty());
    assert!(text.chars().count() <= 140);
    assert!(text.trim_end().ends_with(['.', '!', '?']));
}

#[tokio::test]
async fn test_domain_filter_limits_results() {
    let (engine, docs) = fixture_engine().await;
    let response = engine
        .query(&QueryRequest::new("Saturn discipline and Jupiter travel").with_domain("career"))
        .await
        .unwrap();

    assert!(!response.stats.results.is_empty());
    let top = doc(&docs, response.stats.top_doc().unwrap());
    assert_eq!(top.domain, "career");
    // A domain filter also admits general rules.
    for hit in &response.stats.results {
        let domain = doc(&docs, &hit.doc_id).domain.as_str();
        assert!(domain == "career" || domain == "general", "{domain}");
    }
}
