//! The query state machine.
//!
//! ```text
//! INIT → EXTRACT → EXPAND? → RETRIEVE → RERANK? → FUSE → BUILD → DONE | ERROR
//! ```
//!
//! Stage failures are recorded in the trace and downgraded. Only the failure
//! of every enabled retrieval lane aborts the query.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use augur_corpus::{DEFAULT_DOMAIN, Document};
use augur_extraction::{Entity, EntityExtractor, LlmEntityExtractor, Locale, merge_entities};
use augur_graph::GraphStore;
use augur_search::SearchFilter;

use crate::api::{QueryRequest, QueryResponse, QueryStats};
use crate::config::{FeatureFlags, RetrievalConfig, TimeoutConfig};
use crate::context::{self, ContextEntry};
use crate::error::{Result, RetrievalError, StageError};
use crate::fusion::{Fusion, LaneRanking};
use crate::hyde::Hyde;
use crate::lanes::{LaneRequest, RetrievalLane, TagIndex};
use crate::rerank::{RerankCandidate, Reranked, Reranker, rerank};
use crate::trace::{PipelineState, SpanGuard, SpanStatus, Stage, Trace};

/// Whether `flags` enable `lane`.
pub fn lane_enabled(flags: &FeatureFlags, lane: Stage) -> bool {
    match lane {
        Stage::Dense => flags.dense,
        Stage::Sparse => flags.bm25,
        Stage::Graph => flags.graph,
        _ => false,
    }
}

fn lane_timeout_ms(timeouts: &TimeoutConfig, lane: Stage) -> u64 {
    match lane {
        Stage::Dense => timeouts.dense_ms,
        Stage::Sparse => timeouts.sparse_ms,
        Stage::Graph => timeouts.graph_ms,
        _ => timeouts.dense_ms,
    }
}

/// Await `fut` unless `cancel` fires first.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    trace_id: &str,
    fut: F,
) -> Result<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RetrievalError::Cancelled {
            trace_id: trace_id.to_string(),
        }),
        out = fut => Ok(out),
    }
}

/// Read-only query pipeline over a loaded corpus.
pub struct Pipeline {
    config: Arc<RetrievalConfig>,
    documents: Arc<HashMap<String, Document>>,
    tags: Arc<TagIndex>,
    extractor: Arc<EntityExtractor>,
    llm_extractor: Option<Arc<LlmEntityExtractor>>,
    hyde: Option<Hyde>,
    lanes: Vec<Arc<dyn RetrievalLane>>,
    reranker: Option<Arc<dyn Reranker>>,
    graph: Option<Arc<GraphStore>>,
}

impl Pipeline {
    pub fn new(config: Arc<RetrievalConfig>, documents: &[Document]) -> Self {
        let extractor = EntityExtractor::with_config(config.extractor.clone());
        Self {
            config,
            tags: Arc::new(TagIndex::new(documents)),
            documents: Arc::new(
                documents
                    .iter()
                    .map(|doc| (doc.doc_id.clone(), doc.clone()))
                    .collect(),
            ),
            extractor: Arc::new(extractor),
            llm_extractor: None,
            hyde: None,
            lanes: Vec::new(),
            reranker: None,
            graph: None,
        }
    }

    /// Add a lane, replacing any lane of the same kind.
    pub fn with_lane(mut self, lane: Arc<dyn RetrievalLane>) -> Self {
        self.lanes.retain(|l| l.kind() != lane.kind());
        self.lanes.push(lane);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_hyde(mut self, hyde: Hyde) -> Self {
        self.hyde = Some(hyde);
        self
    }

    pub fn with_llm_extractor(mut self, extractor: Arc<LlmEntityExtractor>) -> Self {
        self.llm_extractor = Some(extractor);
        self
    }

    pub fn with_graph(mut self, graph: Arc<GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn tags(&self) -> Arc<TagIndex> {
        Arc::clone(&self.tags)
    }

    pub fn document(&self, doc_id: &str) -> Option<&Document> {
        self.documents.get(doc_id)
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Kinds of the installed lanes.
    pub fn lane_kinds(&self) -> Vec<Stage> {
        self.lanes.iter().map(|lane| lane.kind()).collect()
    }

    pub fn has_reranker(&self) -> bool {
        self.reranker.is_some()
    }

    /// Largest normalized PageRank among the node tags of `doc_id`.
    fn pagerank_norm(&self, doc_id: &str) -> f64 {
        let (Some(graph), Some(meta)) = (&self.graph, self.tags.meta(doc_id)) else {
            return 0.0;
        };
        meta.tags
            .iter()
            .filter_map(|tag| graph.pagerank_norm(tag))
            .fold(0.0, f64::max)
    }

    /// Run one query.
    pub async fn run(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse> {
        let started = Instant::now();
        let mut trace = Trace::new();
        let trace_id = trace.trace_id.clone();
        let mut stats = QueryStats::default();

        let query = request.text.trim();
        let flags = self.config.flags.with_overrides(&request.flags);
        let timeouts = match request.timeout_ms {
            Some(budget) => self.config.timeouts.capped(budget),
            None => self.config.timeouts.clone(),
        };
        let top_k = request.effective_top_k(self.config.top_k);
        let domain = request.normalized_domain();
        debug!(%trace_id, "Query {query:?} domain={domain:?} top_k={top_k}");

        // EXTRACT
        self.checkpoint(cancel, &mut trace, Stage::Extract)?;
        trace.enter(PipelineState::Extract);
        let guard = SpanGuard::start(Stage::Extract, query);
        let locale = request.locale.as_deref().map_or(Locale::Auto, Locale::parse);
        let mut entities = self.extractor.extract(query, locale);
        if flags.llm_ner
            && let Some(llm) = &self.llm_extractor
        {
            let deadline = Duration::from_millis(timeouts.extract_ms);
            match cancellable(cancel, &trace_id, timeout(deadline, llm.extract(query))).await? {
                Ok(Ok(found)) => entities = merge_entities(entities.into_iter().chain(found)),
                Ok(Err(e)) => warn!(%trace_id, "LLM entity extraction failed: {e}"),
                Err(_) => warn!(
                    %trace_id,
                    "LLM entity extraction timed out after {}ms", timeouts.extract_ms
                ),
            }
        }
        let relations = self.extractor.extract_relations(query, Some(entities.as_slice()));
        let mut seeds: Vec<String> = Vec::with_capacity(entities.len());
        for id in entities.iter().map(Entity::node_id) {
            if !seeds.contains(&id) {
                seeds.push(id);
            }
        }
        trace.finish(guard, entities.len(), SpanStatus::Ok);
        stats.entities = seeds.clone();
        stats.relations = relations;

        // EXPAND
        self.checkpoint(cancel, &mut trace, Stage::Expand)?;
        let mut dense_query = query.to_string();
        match &self.hyde {
            Some(hyde) if flags.hyde && flags.dense => {
                trace.enter(PipelineState::Expand);
                let guard = SpanGuard::start(Stage::Expand, query);
                let deadline = Duration::from_millis(timeouts.expand_ms);
                match cancellable(cancel, &trace_id, timeout(deadline, hyde.expand(query))).await? {
                    Ok(passage) => {
                        stats.expanded = passage != query;
                        dense_query = passage;
                        trace.finish(guard, 1, SpanStatus::Ok);
                    }
                    Err(_) => trace.fail(
                        guard,
                        &StageError::Timeout {
                            stage: Stage::Expand,
                            timeout_ms: timeouts.expand_ms,
                        },
                    ),
                }
            }
            _ => trace.skip(Stage::Expand),
        }

        // RETRIEVE
        self.checkpoint(cancel, &mut trace, Stage::Retrieve)?;
        trace.enter(PipelineState::Retrieve);
        let filter = match domain.as_deref() {
            Some(d) if d != DEFAULT_DOMAIN => SearchFilter::new().with_domain(d),
            _ => SearchFilter::new(),
        };
        let lane_request = LaneRequest {
            query: query.to_string(),
            dense_query,
            seeds,
            domain: domain.clone(),
            filter,
            k: self.config.lane_k.max(top_k),
        };

        let mut active = Vec::new();
        for lane in &self.lanes {
            if lane_enabled(&flags, lane.kind()) {
                active.push(Arc::clone(lane));
            } else {
                trace.skip(lane.kind());
            }
        }
        if active.is_empty() {
            trace.enter(PipelineState::Error);
            return Err(RetrievalError::Pipeline {
                trace_id,
                message: "no retrieval lane is enabled".to_string(),
            });
        }

        let runs = active.into_iter().map(|lane| {
            let request = &lane_request;
            let timeout_ms = lane_timeout_ms(&timeouts, lane.kind());
            async move {
                let guard = SpanGuard::start(lane.kind(), &request.query);
                let deadline = Duration::from_millis(timeout_ms);
                let result = match timeout(deadline, lane.retrieve(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(StageError::Timeout {
                        stage: lane.kind(),
                        timeout_ms,
                    }),
                };
                (guard, result)
            }
        });
        let outcomes = cancellable(cancel, &trace_id, join_all(runs)).await?;

        let mut rankings = Vec::with_capacity(outcomes.len());
        for (guard, result) in outcomes {
            let lane = guard.stage();
            match result {
                Ok(output) => {
                    trace.finish(guard, output.hits.len(), SpanStatus::Ok);
                    stats.lane_hits.insert(lane.to_string(), output.hits.len());
                    stats.paths.extend(output.paths);
                    rankings.push(LaneRanking::new(lane, output.hits));
                }
                Err(e) => {
                    warn!(%trace_id, "{e}; continuing without the {lane} lane");
                    trace.fail(guard, &e);
                }
            }
        }
        if rankings.is_empty() {
            trace.enter(PipelineState::Error);
            return Err(RetrievalError::Pipeline {
                trace_id,
                message: "every retrieval lane failed".to_string(),
            });
        }

        let weights = self.config.weights_for(domain.as_deref()).clone();
        let alpha = if flags.graph {
            self.config.pagerank_alpha
        } else {
            0.0
        };
        let fusion = Fusion::new(self.config.rrf_k, alpha);
        let pagerank = |doc_id: &str| self.pagerank_norm(doc_id);

        // RERANK
        self.checkpoint(cancel, &mut trace, Stage::Rerank)?;
        match &self.reranker {
            Some(reranker) if flags.reranker => {
                trace.enter(PipelineState::Rerank);
                let guard = SpanGuard::start(Stage::Rerank, query);
                let candidates: Vec<RerankCandidate> = fusion
                    .fuse(&rankings, &weights, &pagerank)
                    .iter()
                    .take(self.config.rerank_candidates)
                    .filter_map(|hit| {
                        self.documents
                            .get(&hit.doc_id)
                            .map(|doc| RerankCandidate::new(&doc.doc_id, &doc.text))
                    })
                    .collect();

                let result = self
                    .run_reranker(Arc::clone(reranker), query, candidates, &timeouts, cancel, &trace_id)
                    .await?;
                match result {
                    Ok(reranked) => {
                        stats.reranked = reranked.scored;
                        trace.finish(guard, reranked.scored, SpanStatus::Ok);
                        rankings.push(LaneRanking::new(Stage::Rerank, reranked.hits));
                    }
                    Err(e) => {
                        warn!(%trace_id, "{e}; fusing without reranking");
                        trace.fail(guard, &e);
                    }
                }
            }
            None if flags.reranker => {
                debug!(%trace_id, "Reranking requested but no reranker is loaded");
                trace.skip_because(Stage::Rerank, "no reranker loaded");
            }
            _ => trace.skip(Stage::Rerank),
        }

        // FUSE
        self.checkpoint(cancel, &mut trace, Stage::Fuse)?;
        trace.enter(PipelineState::Fuse);
        let guard = SpanGuard::start(Stage::Fuse, query);
        let mut fused = fusion.fuse(&rankings, &weights, &pagerank);
        fused.truncate(top_k);
        for ranking in &rankings {
            stats
                .lanes
                .insert(ranking.lane.to_string(), weights.weight(ranking.lane));
        }
        trace.finish(guard, fused.len(), SpanStatus::Ok);

        // BUILD
        self.checkpoint(cancel, &mut trace, Stage::Build)?;
        trace.enter(PipelineState::Build);
        let guard = SpanGuard::start(Stage::Build, query);
        let entries: Vec<ContextEntry> = fused
            .iter()
            .filter_map(|hit| {
                let doc = self.documents.get(&hit.doc_id);
                if doc.is_none() {
                    warn!(%trace_id, "Fused result {} has no document", hit.doc_id);
                }
                doc
            })
            .map(|doc| ContextEntry::new(&doc.doc_id, &doc.text).with_source(&doc.source))
            .collect();
        let context = context::build(
            &entries,
            self.config.max_context_chars,
            self.config.style_for(domain.as_deref()),
        );
        trace.finish(guard, context.citations.len(), SpanStatus::Ok);
        trace.enter(PipelineState::Done);

        stats.results = fused;
        stats.latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(
            %trace_id,
            "Query done in {:.1}ms with {} citations",
            stats.latency_ms,
            context.citations.len()
        );

        Ok(QueryResponse {
            context,
            trace,
            stats,
        })
    }

    /// Score `candidates` on the blocking pool. The outer deadline is twice
    /// the scoring ceiling so a batch started before the ceiling can finish.
    async fn run_reranker(
        &self,
        reranker: Arc<dyn Reranker>,
        query: &str,
        candidates: Vec<RerankCandidate>,
        timeouts: &TimeoutConfig,
        cancel: &CancellationToken,
        trace_id: &str,
    ) -> Result<std::result::Result<Reranked, StageError>> {
        let ceiling = Duration::from_millis(timeouts.rerank_ms);
        let batch_size = self.config.rerank_batch_size;
        let query = query.to_string();
        let k = candidates.len();
        let task = tokio::task::spawn_blocking(move || {
            rerank(reranker.as_ref(), &query, &candidates, k, batch_size, ceiling)
        });

        let outcome = cancellable(cancel, trace_id, timeout(ceiling * 2, task)).await?;
        Ok(match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StageError::failed(Stage::Rerank, join)),
            Err(_) => Err(StageError::Timeout {
                stage: Stage::Rerank,
                timeout_ms: timeouts.rerank_ms * 2,
            }),
        })
    }

    /// Stop before `next` when the caller cancelled.
    fn checkpoint(&self, cancel: &CancellationToken, trace: &mut Trace, next: Stage) -> Result<()> {
        if cancel.is_cancelled() {
            trace.enter(PipelineState::Error);
            trace.mark(next, SpanStatus::PipelineCancelled);
            warn!(trace_id = %trace.trace_id, "Query cancelled before {next}");
            return Err(RetrievalError::Cancelled {
                trace_id: trace.trace_id.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lanes::LaneOutput;
    use async_trait::async_trait;
    use augur_corpus::DocType;
    use augur_search::SearchHit;
    use pretty_assertions::assert_eq;

    fn doc(id: &str, text: &str) -> Document {
        Document {
            doc_id: id.to_string(),
            doc_type: DocType::Corpus,
            card_id: None,
            domain: "general".to_string(),
            orientation: None,
            position: None,
            text: text.to_string(),
            tags: Default::default(),
            source: "fixture".to_string(),
            version: "v1".to_string(),
        }
    }

    struct FixedLane {
        kind: Stage,
        ids: Vec<&'static str>,
        delay: Option<Duration>,
        fail: bool,
    }

    impl FixedLane {
        fn new(kind: Stage, ids: &[&'static str]) -> Self {
            Self {
                kind,
                ids: ids.to_vec(),
                delay: None,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl RetrievalLane for FixedLane {
        fn kind(&self) -> Stage {
            self.kind
        }

        async fn retrieve(&self, request: &LaneRequest) -> std::result::Result<LaneOutput, StageError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(StageError::failed(self.kind, "index offline"));
            }
            Ok(LaneOutput::hits(
                self.ids
                    .iter()
                    .take(request.k)
                    .map(|id| SearchHit::new(*id, 0.5))
                    .collect(),
            ))
        }
    }

    fn pipeline() -> Pipeline {
        let docs = vec![
            doc("a", "Jupiter expands."),
            doc("b", "Saturn restricts."),
            doc("c", "Mars acts."),
        ];
        Pipeline::new(Arc::new(RetrievalConfig::default()), &docs)
    }

    #[tokio::test]
    async fn test_fuses_lanes_and_builds_context() {
        let pipeline = pipeline()
            .with_lane(Arc::new(FixedLane::new(Stage::Dense, &["a", "b"])))
            .with_lane(Arc::new(FixedLane::new(Stage::Sparse, &["b", "c"])));
        let response = pipeline
            .run(&QueryRequest::new("planets"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.context.citations, vec!["b", "a", "c"]);
        assert_eq!(response.trace.state, PipelineState::Done);
        assert_eq!(response.trace.status_of(Stage::Rerank), Some(&SpanStatus::Skipped));
        assert_eq!(response.stats.lanes.get("sparse"), Some(&0.8));
    }

    #[tokio::test]
    async fn test_lane_failure_is_downgraded() {
        let broken = FixedLane {
            fail: true,
            ..FixedLane::new(Stage::Sparse, &["c"])
        };
        let pipeline = pipeline()
            .with_lane(Arc::new(FixedLane::new(Stage::Dense, &["a"])))
            .with_lane(Arc::new(broken));
        let response = pipeline
            .run(&QueryRequest::new("planets"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.context.citations, vec!["a"]);
        assert_eq!(response.trace.status_of(Stage::Sparse), Some(&SpanStatus::StageError));
        assert!(!response.stats.lanes.contains_key("sparse"));
    }

    #[tokio::test]
    async fn test_every_lane_failing_is_fatal() {
        let broken = FixedLane {
            fail: true,
            ..FixedLane::new(Stage::Dense, &["a"])
        };
        let err = pipeline()
            .with_lane(Arc::new(broken))
            .run(&QueryRequest::new("planets"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "pipeline_error");
        assert!(err.trace_id().is_some());
    }

    #[tokio::test]
    async fn test_cancellation_short_circuits() {
        let slow = FixedLane {
            delay: Some(Duration::from_secs(30)),
            ..FixedLane::new(Stage::Dense, &["a"])
        };
        let pipeline = pipeline().with_lane(Arc::new(slow));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = pipeline
            .run(&QueryRequest::new("planets"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "pipeline_cancelled");
    }

    #[tokio::test]
    async fn test_lanes_without_hits_give_an_empty_context() {
        let pipeline = pipeline()
            .with_lane(Arc::new(FixedLane::new(Stage::Dense, &[])))
            .with_lane(Arc::new(FixedLane::new(Stage::Sparse, &[])));
        let response = pipeline
            .run(&QueryRequest::new("unknown omen"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(response.context.is_empty());
        assert!(response.context.citations.is_empty());
        assert!(response.stats.results.is_empty());
        assert_eq!(response.trace.state, PipelineState::Done);
        assert_eq!(response.trace.status_of(Stage::Dense), Some(&SpanStatus::Ok));
        assert_eq!(response.trace.status_of(Stage::Sparse), Some(&SpanStatus::Ok));
    }

    #[tokio::test]
    async fn test_requested_rerank_without_reranker_is_noted() {
        let pipeline = pipeline().with_lane(Arc::new(FixedLane::new(Stage::Dense, &["a"])));
        let response = pipeline
            .run(
                &QueryRequest::new("planets").with_flag("USE_RERANKER", true),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let span = response.trace.span(Stage::Rerank).unwrap();
        assert_eq!(span.status, SpanStatus::Skipped);
        assert_eq!(span.error.as_deref(), Some("no reranker loaded"));
        assert_eq!(response.context.citations, vec!["a"]);

        let off = pipeline
            .run(
                &QueryRequest::new("planets").with_flag("USE_RERANKER", false),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(off.trace.span(Stage::Rerank).unwrap().error, None);
    }

    #[tokio::test]
    async fn test_flags_disable_lanes_per_query() {
        let pipeline = pipeline()
            .with_lane(Arc::new(FixedLane::new(Stage::Dense, &["a"])))
            .with_lane(Arc::new(FixedLane::new(Stage::Sparse, &["c"])));
        let response = pipeline
            .run(
                &QueryRequest::new("planets").with_flag("USE_BM25", false),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.context.citations, vec!["a"]);
        assert_eq!(response.trace.status_of(Stage::Sparse), Some(&SpanStatus::Skipped));
        assert_eq!(
            response.stats.lanes,
            std::collections::BTreeMap::from([("dense".to_string(), 1.0)])
        );
    }
}
