//! Weighted PageRank over the node graph.

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::model::{GraphEdge, GraphNode};

/// PageRank parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRankConfig {
    pub damping: f64,
    pub iterations: usize,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            iterations: 30,
        }
    }
}

/// Compute PageRank, indexed by node index.
///
/// Transitions are proportional to edge weight. Mass at nodes without
/// outgoing edges is spread uniformly over all nodes. Scores sum to 1.
pub fn pagerank(graph: &DiGraph<GraphNode, GraphEdge>, config: PageRankConfig) -> Vec<f64> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }
    let uniform = 1.0 / n as f64;

    let out_weight: Vec<f64> = graph
        .node_indices()
        .map(|i| {
            graph
                .edges_directed(i, Direction::Outgoing)
                .map(|e| f64::from(e.weight().weight))
                .sum()
        })
        .collect();

    let mut scores = vec![uniform; n];
    for _ in 0..config.iterations {
        let dangling: f64 = graph
            .node_indices()
            .filter(|i| out_weight[i.index()] <= 0.0)
            .map(|i| scores[i.index()])
            .sum();

        let base = (1.0 - config.damping) * uniform + config.damping * dangling * uniform;
        let mut next = vec![base; n];
        for i in graph.node_indices() {
            next[i.index()] += config.damping * incoming_mass(graph, i, &scores, &out_weight);
        }
        scores = next;
    }
    scores
}

fn incoming_mass(
    graph: &DiGraph<GraphNode, GraphEdge>,
    node: NodeIndex,
    scores: &[f64],
    out_weight: &[f64],
) -> f64 {
    graph
        .edges_directed(node, Direction::Incoming)
        .map(|e| {
            let src = e.source().index();
            scores[src] * f64::from(e.weight().weight) / out_weight[src]
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(usize, usize, f32)], n: usize) -> DiGraph<GraphNode, GraphEdge> {
        let mut g = DiGraph::new();
        let idx: Vec<_> = (0..n)
            .map(|i| g.add_node(GraphNode::new(format!("n:{i}"), "", "n")))
            .collect();
        for &(a, b, w) in edges {
            g.add_edge(idx[a], idx[b], GraphEdge::new("", "", "r", w));
        }
        g
    }

    #[test]
    fn test_scores_sum_to_one() {
        let g = graph(&[(0, 1, 1.0), (1, 2, 1.0), (2, 0, 1.0), (3, 0, 2.0)], 5);
        let pr = pagerank(&g, PageRankConfig::default());
        let total: f64 = pr.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_hub_ranks_highest() {
        let g = graph(&[(1, 0, 1.0), (2, 0, 1.0), (3, 0, 1.0), (0, 1, 1.0)], 4);
        let pr = pagerank(&g, PageRankConfig::default());
        assert!(pr[0] > pr[1]);
        assert!(pr[1] > pr[2]);
        assert!((pr[2] - pr[3]).abs() < 1e-12);
    }

    #[test]
    fn test_weights_shape_transitions() {
        let g = graph(&[(0, 1, 3.0), (0, 2, 1.0)], 3);
        let pr = pagerank(&g, PageRankConfig::default());
        assert!(pr[1] > pr[2]);
    }
}
