//! The in-memory knowledge graph.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{GraphError, Result};
use crate::loader::load_dir;
use crate::model::{GraphEdge, GraphNode};
use crate::pagerank::{PageRankConfig, pagerank};

/// The node graph type.
pub type NodeGraph = DiGraph<GraphNode, GraphEdge>;

/// Graph statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    /// Edges dropped at load (unknown endpoints, bad rows).
    pub dropped_edges: usize,
}

/// Node and edge tables with indexed adjacency and cached PageRank.
#[derive(Debug, Clone)]
pub struct GraphStore {
    source: Option<PathBuf>,
    graph: NodeGraph,
    index: HashMap<String, NodeIndex>,
    pagerank: Vec<f64>,
    max_pagerank: f64,
    dropped_edges: usize,
}

impl GraphStore {
    /// Build a store from node and edge records.
    ///
    /// Duplicate node ids keep the first record. Edges that reference an
    /// unknown node are dropped with a warning.
    pub fn new(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Self {
        let mut graph = NodeGraph::new();
        let mut index = HashMap::new();
        for node in nodes {
            if index.contains_key(&node.id) {
                warn!("Duplicate graph node {}; keeping first", node.id);
                continue;
            }
            let id = node.id.clone();
            index.insert(id, graph.add_node(node));
        }

        let mut dropped_edges = 0;
        for edge in edges {
            match (index.get(&edge.src), index.get(&edge.dst)) {
                (Some(&a), Some(&b)) => {
                    graph.add_edge(a, b, edge);
                }
                _ => {
                    warn!(
                        "Dropping edge {} -[{}]-> {}: unknown node",
                        edge.src, edge.rel, edge.dst
                    );
                    dropped_edges += 1;
                }
            }
        }

        let pagerank = pagerank(&graph, PageRankConfig::default());
        let max_pagerank = pagerank.iter().copied().fold(0.0, f64::max);
        Self {
            source: None,
            graph,
            index,
            pagerank,
            max_pagerank,
            dropped_edges,
        }
    }

    /// Load from a directory of graph CSVs.
    pub fn load(dir: &Path) -> Result<Self> {
        let data = load_dir(dir)?;
        let mut store = Self::new(data.nodes, data.edges);
        store.dropped_edges += data.rows_dropped;
        store.source = Some(dir.to_path_buf());
        info!(
            nodes = store.node_count(),
            edges = store.edge_count(),
            dropped = store.dropped_edges,
            "Loaded knowledge graph from {}",
            dir.display()
        );
        Ok(store)
    }

    /// Re-read the source directory and recompute PageRank.
    pub fn reload(&mut self) -> Result<()> {
        let dir = self.source.clone().ok_or(GraphError::NotReloadable)?;
        *self = Self::load(&dir)?;
        Ok(())
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes: self.node_count(),
            edges: self.edge_count(),
            dropped_edges: self.dropped_edges,
        }
    }

    /// All nodes in load order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_weights()
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&i| &self.graph[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub(crate) fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    /// Outgoing edges of `id`, optionally restricted to one relation.
    ///
    /// Sorted by target id then relation.
    pub fn neighbors(&self, id: &str, rel: Option<&str>) -> Vec<(&GraphEdge, &GraphNode)> {
        self.adjacent(id, Direction::Outgoing, rel)
    }

    /// Incoming edges of `id`, sorted by source id then relation.
    pub fn incoming(&self, id: &str) -> Vec<(&GraphEdge, &GraphNode)> {
        self.adjacent(id, Direction::Incoming, None)
    }

    fn adjacent(
        &self,
        id: &str,
        direction: Direction,
        rel: Option<&str>,
    ) -> Vec<(&GraphEdge, &GraphNode)> {
        let Some(node) = self.node_index(id) else {
            return Vec::new();
        };
        let mut out: Vec<(&GraphEdge, &GraphNode)> = self
            .graph
            .edges_directed(node, direction)
            .filter(|e| rel.is_none_or(|r| e.weight().rel == r))
            .map(|e| {
                let other = match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                (e.weight(), &self.graph[other])
            })
            .collect();
        out.sort_by(|a, b| a.1.id.cmp(&b.1.id).then_with(|| a.0.rel.cmp(&b.0.rel)));
        out
    }

    /// PageRank of every node, highest first, ties on id.
    pub fn pagerank(&self) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .graph
            .node_indices()
            .map(|i| (self.graph[i].id.as_str(), self.pagerank[i.index()]))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }

    pub fn pagerank_of(&self, id: &str) -> Option<f64> {
        self.node_index(id).map(|i| self.pagerank[i.index()])
    }

    /// PageRank scaled so the top node scores 1.
    pub fn pagerank_norm(&self, id: &str) -> Option<f64> {
        let pr = self.pagerank_of(id)?;
        Some(if self.max_pagerank > 0.0 {
            pr / self.max_pagerank
        } else {
            0.0
        })
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}
