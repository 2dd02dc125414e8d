//! Retrieval engine implementation.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use augur_corpus::{CorpusLoader, Document, read_jsonl};
use augur_embeddings::{EmbeddingCache, EmbeddingMatrix, Model, ModelRegistry, registry};
use augur_extraction::{EntityExtractor, LlmClient, LlmEntityExtractor, OpenAiClient};
use augur_graph::{GraphError, GraphStore};
use augur_search::{Bm25Index, DenseIndex, IndexRow, SearchBackend};

use crate::api::{
    HealthResponse, InvalidateRequest, InvalidateResponse, QueryRequest, QueryResponse,
};
use crate::config::RetrievalConfig;
use crate::error::{Result, RetrievalError};
use crate::hyde::Hyde;
use crate::lanes::{DenseLane, GraphLane, RetrievalLane, SparseLane};
use crate::metrics::{Metrics, SearchMetrics};
use crate::pipeline::Pipeline;
use crate::query_cache::{QueryCache, QueryKey};
use crate::rerank::Reranker;

/// Everything built at init and shared read-only by queries.
struct EngineState {
    pipeline: Pipeline,
    model: Arc<Model>,
    texts: Vec<String>,
    embedding_cache: Option<EmbeddingCache>,
}

/// Hybrid retrieval engine.
///
/// This is the entry point of the retrieval core. It coordinates:
/// - Corpus loading and the embedding cache
/// - Dense, sparse and graph lanes
/// - Reranking, fusion and context assembly
/// - The query cache and search metrics
pub struct RetrievalEngine {
    config: Arc<RetrievalConfig>,
    state: RwLock<Option<Arc<EngineState>>>,
    cache: QueryCache<QueryResponse>,
    metrics: Metrics,
    owns_registry: bool,
}

impl RetrievalEngine {
    /// Create a new engine builder.
    pub fn builder(config: RetrievalConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Build an engine from `config` with the default components.
    pub async fn init(config: RetrievalConfig) -> Result<Self> {
        EngineBuilder::new(config).build().await
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    async fn state(&self) -> Result<Arc<EngineState>> {
        self.state
            .read()
            .await
            .clone()
            .ok_or(RetrievalError::NotInitialized)
    }

    /// Run a query.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        self.query_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Run a query that stops early once `cancel` fires.
    pub async fn query_with_cancel(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse> {
        let started = Instant::now();
        let state = self.state().await?;
        let key = self.cache_key(request);

        if let Some(mut response) = self.cache.get(&key) {
            self.metrics.record_cache_hit();
            self.metrics
                .record_search(started.elapsed().as_secs_f64() * 1000.0);
            debug!("Query cache hit for {:?}", key.text);
            response.trace.cached = true;
            return Ok(response);
        }
        if self.cache.is_enabled() {
            self.metrics.record_cache_miss();
        }

        match state.pipeline.run(request, cancel).await {
            Ok(response) => {
                self.metrics
                    .record_search(started.elapsed().as_secs_f64() * 1000.0);
                if response.stats.reranked > 0 {
                    self.metrics.record_rerank();
                }
                self.cache.insert(key, response.clone());
                Ok(response)
            }
            Err(e) => {
                self.metrics.record_error();
                error!(
                    code = e.code(),
                    trace_id = e.trace_id().unwrap_or_default(),
                    "Query failed: {e}"
                );
                Err(e)
            }
        }
    }

    fn cache_key(&self, request: &QueryRequest) -> QueryKey {
        let flags = self.config.flags.with_overrides(&request.flags);
        QueryKey::new(
            request.text.trim(),
            format!(
                "{:?}|{:?}|{:?}|{flags:?}",
                request.locale,
                request.normalized_domain(),
                request.effective_top_k(self.config.top_k),
            ),
        )
    }

    /// Engine health. Reports `ok: false` after shutdown.
    pub async fn health(&self) -> HealthResponse {
        let Ok(state) = self.state().await else {
            return HealthResponse {
                ok: false,
                index_size: 0,
                model_id: String::new(),
                cache_valid: false,
            };
        };
        let cache_valid = match &state.embedding_cache {
            Some(cache) => cache.is_valid(state.model.model_id(), &state.texts).await,
            None => false,
        };
        HealthResponse {
            ok: true,
            index_size: state.pipeline.document_count(),
            model_id: state.model.model_id().to_string(),
            cache_valid,
        }
    }

    /// Drop cached responses whose query text matches the pattern.
    pub fn invalidate_cache(&self, request: &InvalidateRequest) -> InvalidateResponse {
        let cleared = self.cache.invalidate(&request.pattern);
        info!("Invalidated {cleared} cached queries matching {:?}", request.pattern);
        InvalidateResponse { cleared }
    }

    pub fn metrics(&self) -> SearchMetrics {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Release the indices and, if this engine installed it, the model
    /// registry. Queries fail with `NotInitialized` afterwards.
    pub async fn shutdown(&self) {
        self.state.write().await.take();
        self.cache.clear();
        if self.owns_registry {
            registry::shutdown();
        }
        info!("Retrieval engine shut down");
    }
}

/// Builder for [`RetrievalEngine`].
pub struct EngineBuilder {
    config: RetrievalConfig,
    registry: Option<Arc<ModelRegistry>>,
    documents: Option<Vec<Document>>,
    lanes: Vec<Arc<dyn RetrievalLane>>,
    reranker: Option<Arc<dyn Reranker>>,
    llm: Option<Arc<dyn LlmClient>>,
}

impl EngineBuilder {
    pub fn new(config: RetrievalConfig) -> Self {
        Self {
            config,
            registry: None,
            documents: None,
            lanes: Vec::new(),
            reranker: None,
            llm: None,
        }
    }

    /// Use `registry` instead of the process-wide one.
    pub fn with_registry(mut self, registry: Arc<ModelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Serve `documents` instead of reading `corpus_path`.
    pub fn with_documents(mut self, documents: Vec<Document>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Replace the built-in lane of the same kind.
    pub fn with_lane(mut self, lane: Arc<dyn RetrievalLane>) -> Self {
        self.lanes.push(lane);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// LLM used by HyDE and the LLM entity extractor.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Load the corpus, embeddings, indices and graph.
    pub async fn build(self) -> Result<RetrievalEngine> {
        let mut config = self.config;
        config.dense.ann_enabled = config.dense.ann_enabled && config.flags.ann;
        let config = Arc::new(config);
        info!("Initializing retrieval engine");

        let documents = match self.documents {
            Some(documents) => documents,
            None => load_documents(&config).await?,
        };
        if documents.is_empty() {
            return Err(augur_corpus::CorpusError::EmptyCorpus(config.corpus_path.clone()).into());
        }

        let (registry, owns_registry) = match self.registry {
            Some(registry) => (registry, false),
            None => match registry::global() {
                Ok(registry) => (registry, false),
                Err(_) => (registry::init(config.registry.clone()), true),
            },
        };
        let model = registry.get_model(&config.model).await?;

        let texts: Vec<String> = documents.iter().map(|doc| doc.text.clone()).collect();
        let embedding_cache = config.cache_dir.as_ref().map(EmbeddingCache::new);
        let matrix = match &embedding_cache {
            Some(cache) => {
                let outcome = cache.load_or_build(&texts, &model).await?;
                info!(
                    status = ?outcome.status,
                    data_hash = %outcome.data_hash,
                    "Embedding cache ready"
                );
                outcome.matrix
            }
            None => model.encode(&texts, true).await?,
        };
        let rows = index_rows(&documents, &matrix)?;

        let dense_config = config.dense.clone();
        let dimension = matrix.dim();
        let dense_rows = rows.clone();
        let dense: Arc<dyn SearchBackend> = Arc::new(
            tokio::task::spawn_blocking(move || {
                DenseIndex::build(&dense_config, dimension, dense_rows)
            })
            .await??,
        );
        let bm25_config = config.bm25.clone();
        let sparse: Arc<dyn SearchBackend> = Arc::new(
            tokio::task::spawn_blocking(move || {
                let rows = rows
                    .into_iter()
                    .map(|row| IndexRow {
                        vector: None,
                        ..row
                    })
                    .collect();
                Bm25Index::with_rows(bm25_config, rows)
            })
            .await?,
        );
        info!(
            "Indexed {} documents ({} dense, {} sparse)",
            documents.len(),
            dense.name(),
            sparse.name()
        );

        let mut pipeline = Pipeline::new(Arc::clone(&config), &documents)
            .with_lane(Arc::new(DenseLane::new(Arc::clone(&model), dense)))
            .with_lane(Arc::new(SparseLane::new(sparse)));

        if let Some(graph) = load_graph(&config).await? {
            let graph = Arc::new(graph);
            let tags = pipeline.tags();
            pipeline = pipeline
                .with_lane(Arc::new(GraphLane::new(
                    Arc::clone(&graph),
                    tags,
                    config.traversal.clone(),
                )))
                .with_graph(graph);
        }
        for lane in self.lanes {
            pipeline = pipeline.with_lane(lane);
        }

        if let Some(reranker) = self.reranker.or_else(|| default_reranker(&config)) {
            info!("Reranker: {}", reranker.name());
            pipeline = pipeline.with_reranker(reranker);
        }

        if let Some(llm) = self.llm.or_else(|| default_llm(&config)) {
            info!("LLM boundary: {}", llm.model());
            pipeline = pipeline
                .with_hyde(Hyde::new(Arc::clone(&llm)))
                .with_llm_extractor(Arc::new(LlmEntityExtractor::new(llm)));
        }

        info!("Retrieval engine initialized");
        Ok(RetrievalEngine {
            cache: QueryCache::new(config.query_cache_size),
            config,
            state: RwLock::new(Some(Arc::new(EngineState {
                pipeline,
                model,
                texts,
                embedding_cache,
            }))),
            metrics: Metrics::new(),
            owns_registry,
        })
    }
}

/// Read a built JSONL corpus, or load a rule directory.
async fn load_documents(config: &RetrievalConfig) -> Result<Vec<Document>> {
    let path = config.corpus_path.clone();
    let loader = config.loader.clone();
    let extractor = config.extractor.clone();
    let documents = tokio::task::spawn_blocking(move || {
        if path.is_dir() {
            let tagger = Arc::new(EntityExtractor::with_config(extractor)).into_tagger();
            CorpusLoader::with_config(loader)
                .with_tagger(tagger)
                .load(&path)
        } else {
            read_jsonl(&path)
        }
    })
    .await??;
    info!(
        "Loaded {} documents from {}",
        documents.len(),
        config.corpus_path.display()
    );
    Ok(documents)
}

/// Pair documents with embedding rows. Any count mismatch is fatal.
fn index_rows(documents: &[Document], matrix: &EmbeddingMatrix) -> Result<Vec<IndexRow>> {
    if matrix.rows() != documents.len() {
        return Err(RetrievalError::OrphanEmbedding {
            row: documents.len().min(matrix.rows()),
        });
    }
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let vector = matrix
                .row(i)
                .ok_or(RetrievalError::OrphanEmbedding { row: i })?;
            Ok(IndexRow::from_document(doc, Some(vector.to_vec())))
        })
        .collect()
}

/// Load the graph, or `None` when it is not configured or missing.
async fn load_graph(config: &RetrievalConfig) -> Result<Option<GraphStore>> {
    let Some(dir) = config.graph_dir.clone() else {
        info!("No graph directory configured; graph lane disabled");
        return Ok(None);
    };
    match tokio::task::spawn_blocking(move || GraphStore::load(&dir)).await? {
        Ok(graph) => {
            let stats = graph.stats();
            info!(
                "Loaded graph with {} nodes and {} edges",
                stats.nodes, stats.edges
            );
            Ok(Some(graph))
        }
        Err(GraphError::SourceMissing(path)) => {
            warn!(
                "Graph directory {} is missing; graph lane disabled",
                path.display()
            );
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(feature = "local-models")]
fn default_reranker(config: &RetrievalConfig) -> Option<Arc<dyn Reranker>> {
    if !config.flags.reranker {
        return None;
    }
    match crate::rerank::CrossEncoderReranker::load() {
        Ok(reranker) => Some(Arc::new(reranker)),
        Err(e) => {
            warn!("Reranker disabled: {e}");
            None
        }
    }
}

#[cfg(not(feature = "local-models"))]
fn default_reranker(_config: &RetrievalConfig) -> Option<Arc<dyn Reranker>> {
    Some(Arc::new(crate::rerank::LexicalReranker::new()))
}

/// The configured LLM client, when LLM features may be used.
fn default_llm(config: &RetrievalConfig) -> Option<Arc<dyn LlmClient>> {
    let wanted = config.flags.hyde || config.flags.llm_ner || config.llm.api_key.is_some();
    if !wanted {
        return None;
    }
    match OpenAiClient::new(config.llm.clone()) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("LLM features disabled: {e}");
            None
        }
    }
}
