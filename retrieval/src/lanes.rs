//! Retrieval lanes.
//!
//! Each lane turns a [`LaneRequest`] into a ranked list of `doc_id`s. The
//! pipeline runs the enabled lanes concurrently and fuses their output.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use augur_corpus::Document;
use augur_embeddings::Model;
use augur_graph::{GraphStore, Path, TraversalConfig};
use augur_search::{IndexRow, RowMeta, SearchBackend, SearchFilter, SearchHit, SearchQuery};

use crate::error::StageError;
use crate::trace::Stage;

/// Inputs shared by every lane.
#[derive(Debug, Clone, Default)]
pub struct LaneRequest {
    /// The query as typed.
    pub query: String,
    /// Text the dense lane embeds; the HyDE passage when expansion ran.
    pub dense_query: String,
    /// Graph node ids of the extracted entities.
    pub seeds: Vec<String>,
    pub domain: Option<String>,
    pub filter: SearchFilter,
    /// Hits wanted from each lane.
    pub k: usize,
}

/// Ranked output of one lane.
#[derive(Debug, Clone, Default)]
pub struct LaneOutput {
    pub hits: Vec<SearchHit>,
    /// Traversal paths, from the graph lane only.
    pub paths: Vec<Path>,
}

impl LaneOutput {
    pub fn hits(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            paths: Vec::new(),
        }
    }
}

/// A retrieval channel.
#[async_trait]
pub trait RetrievalLane: Send + Sync {
    /// `Stage::Dense`, `Stage::Sparse` or `Stage::Graph`.
    fn kind(&self) -> Stage;

    async fn retrieve(&self, request: &LaneRequest) -> Result<LaneOutput, StageError>;
}

/// Run a synchronous index search on the blocking pool.
async fn search_blocking(
    stage: Stage,
    index: Arc<dyn SearchBackend>,
    query: SearchQuery,
) -> Result<Vec<SearchHit>, StageError> {
    tokio::task::spawn_blocking(move || index.search(&query))
        .await
        .map_err(|e| StageError::failed(stage, e))?
        .map_err(|e| StageError::failed(stage, e))
}

/// Embeds the query and searches the dense index.
pub struct DenseLane {
    model: Arc<Model>,
    index: Arc<dyn SearchBackend>,
}

impl DenseLane {
    pub fn new(model: Arc<Model>, index: Arc<dyn SearchBackend>) -> Self {
        Self { model, index }
    }
}

#[async_trait]
impl RetrievalLane for DenseLane {
    fn kind(&self) -> Stage {
        Stage::Dense
    }

    async fn retrieve(&self, request: &LaneRequest) -> Result<LaneOutput, StageError> {
        let text = if request.dense_query.trim().is_empty() {
            &request.query
        } else {
            &request.dense_query
        };
        let vector = self
            .model
            .encode_query(text)
            .await
            .map_err(|e| StageError::failed(Stage::Dense, e))?;
        let query = SearchQuery::vector(vector, request.k).with_filter(request.filter.clone());
        let hits = search_blocking(Stage::Dense, Arc::clone(&self.index), query).await?;
        Ok(LaneOutput::hits(hits))
    }
}

/// BM25 over the raw query text.
pub struct SparseLane {
    index: Arc<dyn SearchBackend>,
}

impl SparseLane {
    pub fn new(index: Arc<dyn SearchBackend>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl RetrievalLane for SparseLane {
    fn kind(&self) -> Stage {
        Stage::Sparse
    }

    async fn retrieve(&self, request: &LaneRequest) -> Result<LaneOutput, StageError> {
        let query =
            SearchQuery::text(request.query.clone(), request.k).with_filter(request.filter.clone());
        let hits = search_blocking(Stage::Sparse, Arc::clone(&self.index), query).await?;
        Ok(LaneOutput::hits(hits))
    }
}

/// Maps graph node ids to the documents tagged with them.
#[derive(Debug, Clone, Default)]
pub struct TagIndex {
    rows: Vec<(String, RowMeta)>,
    by_id: HashMap<String, usize>,
    by_tag: HashMap<String, Vec<usize>>,
}

impl TagIndex {
    pub fn new(documents: &[Document]) -> Self {
        let mut index = Self::default();
        for doc in documents {
            let row = IndexRow::from_document(doc, None);
            let slot = index.rows.len();
            for tag in &row.meta.tags {
                index.by_tag.entry(tag.clone()).or_default().push(slot);
            }
            index.by_id.insert(row.doc_id.clone(), slot);
            index.rows.push((row.doc_id, row.meta));
        }
        index
    }

    /// Documents carrying `tag`, as `(doc_id, meta)`.
    pub fn tagged<'a>(&'a self, tag: &str) -> impl Iterator<Item = (&'a str, &'a RowMeta)> + 'a {
        self.by_tag
            .get(tag)
            .into_iter()
            .flatten()
            .map(|&slot| (self.rows[slot].0.as_str(), &self.rows[slot].1))
    }

    pub fn meta(&self, doc_id: &str) -> Option<&RowMeta> {
        self.by_id.get(doc_id).map(|&slot| &self.rows[slot].1)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Expands extracted entities through the knowledge graph and projects the
/// reached nodes onto tagged documents.
#[derive(Clone)]
pub struct GraphLane {
    graph: Arc<GraphStore>,
    tags: Arc<TagIndex>,
    traversal: TraversalConfig,
}

impl GraphLane {
    pub fn new(graph: Arc<GraphStore>, tags: Arc<TagIndex>, traversal: TraversalConfig) -> Self {
        Self {
            graph,
            tags,
            traversal,
        }
    }

    /// Score every reached node: seeds score 1, other nodes the best
    /// `Π weight · decay^depth` over the path prefixes that reach them.
    fn node_scores(&self, seeds: &[String], paths: &[Path]) -> HashMap<String, f32> {
        let mut scores: HashMap<String, f32> = HashMap::new();
        for seed in seeds.iter().filter(|s| self.graph.contains(s)) {
            scores.insert(seed.clone(), 1.0);
        }
        for path in paths {
            let mut product = 1.0f32;
            for (depth, (step, node)) in path.steps.iter().zip(path.nodes.iter().skip(1)).enumerate()
            {
                product *= step.weight;
                let score = product * self.traversal.decay.powi(depth as i32 + 1);
                let entry = scores.entry(node.clone()).or_insert(0.0);
                if score > *entry {
                    *entry = score;
                }
            }
        }
        scores
    }

    fn expand(&self, request: &LaneRequest) -> LaneOutput {
        let paths = self
            .graph
            .traverse(&request.seeds, request.domain.as_deref(), &self.traversal);
        let node_scores = self.node_scores(&request.seeds, &paths);

        let mut doc_scores: HashMap<&str, f32> = HashMap::new();
        for (node, score) in &node_scores {
            for (doc_id, meta) in self.tags.tagged(node) {
                if !request.filter.matches(meta) {
                    continue;
                }
                let entry = doc_scores.entry(doc_id).or_insert(0.0);
                if *score > *entry {
                    *entry = *score;
                }
            }
        }

        let mut hits: Vec<SearchHit> = doc_scores
            .into_iter()
            .map(|(doc_id, score)| SearchHit::new(doc_id, score.clamp(0.0, 1.0)))
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.doc_id.cmp(&b.doc_id)));
        hits.truncate(request.k);

        tracing::debug!(
            "Graph lane: {} seeds, {} paths, {} nodes, {} docs",
            request.seeds.len(),
            paths.len(),
            node_scores.len(),
            hits.len()
        );
        LaneOutput { hits, paths }
    }
}

#[async_trait]
impl RetrievalLane for GraphLane {
    fn kind(&self) -> Stage {
        Stage::Graph
    }

    async fn retrieve(&self, request: &LaneRequest) -> Result<LaneOutput, StageError> {
        if request.seeds.is_empty() {
            return Ok(LaneOutput::default());
        }
        let lane = self.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || lane.expand(&request))
            .await
            .map_err(|e| StageError::failed(Stage::Graph, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use augur_corpus::DocType;
    use augur_graph::{GraphEdge, GraphNode};
    use pretty_assertions::assert_eq;

    fn doc(id: &str, domain: &str, tags: &[&str]) -> Document {
        Document {
            doc_id: id.to_string(),
            doc_type: DocType::Corpus,
            card_id: None,
            domain: domain.to_string(),
            orientation: None,
            position: None,
            text: format!("text of {id}"),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            source: "test".to_string(),
            version: "v1".to_string(),
        }
    }

    fn graph() -> GraphStore {
        let node = |id: &str| {
            let (kind, label) = id.split_once(':').unwrap_or(("concept", id));
            GraphNode::new(id, label, kind)
        };
        GraphStore::new(
            vec![node("stem:갑"), node("element:wood"), node("element:fire")],
            vec![
                GraphEdge::new("stem:갑", "element:wood", "has_element", 1.0),
                GraphEdge::new("element:wood", "element:fire", "generates", 0.5),
            ],
        )
    }

    fn lane(docs: &[Document]) -> GraphLane {
        GraphLane::new(
            Arc::new(graph()),
            Arc::new(TagIndex::new(docs)),
            TraversalConfig::default(),
        )
    }

    fn request(seeds: &[&str]) -> LaneRequest {
        LaneRequest {
            query: "갑목".to_string(),
            seeds: seeds.iter().map(|s| (*s).to_string()).collect(),
            k: 10,
            ..LaneRequest::default()
        }
    }

    #[tokio::test]
    async fn test_graph_lane_projects_nodes_to_docs() {
        let docs = vec![
            doc("d_stem", "general", &["stem:갑"]),
            doc("d_wood", "general", &["element:wood"]),
            doc("d_fire", "general", &["element:fire"]),
            doc("d_none", "general", &["planet:mars"]),
        ];
        let out = lane(&docs).retrieve(&request(&["stem:갑"])).await.unwrap();

        let ids: Vec<&str> = out.hits.iter().map(|h| h.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["d_stem", "d_wood", "d_fire"]);
        assert!(!out.paths.is_empty());
        // wood: 1.0 · 0.6; fire: 1.0 · 0.5 · 0.6²
        assert!((out.hits[1].score - 0.6).abs() < 1e-6);
        assert!((out.hits[2].score - 0.18).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_graph_lane_respects_filter() {
        let docs = vec![
            doc("d_love", "love", &["element:wood"]),
            doc("d_career", "career", &["element:wood"]),
        ];
        let mut req = request(&["stem:갑"]);
        req.filter = SearchFilter::new().with_domain("love");
        let out = lane(&docs).retrieve(&req).await.unwrap();
        let ids: Vec<&str> = out.hits.iter().map(|h| h.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["d_love"]);
    }

    #[tokio::test]
    async fn test_graph_lane_without_known_seeds_is_empty() {
        let docs = vec![doc("d_stem", "general", &["stem:갑"])];
        let out = lane(&docs).retrieve(&request(&[])).await.unwrap();
        assert!(out.hits.is_empty());
        let out = lane(&docs).retrieve(&request(&["planet:pluto"])).await.unwrap();
        assert!(out.hits.is_empty());
        assert!(out.paths.is_empty());
    }
}
