//! Bounded breadth-first path expansion from seed nodes.

use std::collections::{BTreeSet, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::GraphStore;

/// Traversal bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    pub max_depth: usize,

    /// Global cap on returned paths.
    pub max_paths: usize,

    /// Per-hop score decay.
    pub decay: f32,

    /// Follow edges against their direction too.
    pub undirected: bool,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_paths: 8,
            decay: 0.6,
            undirected: true,
        }
    }
}

/// One hop of a path, in walk order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    pub from: String,
    pub rel: String,
    pub to: String,
    pub weight: f32,
    /// False when the edge was walked against its direction.
    pub forward: bool,
}

/// A path from a seed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    /// Node ids, seed first.
    pub nodes: Vec<String>,
    pub steps: Vec<PathStep>,
    /// `∏ weight · decay^depth`.
    pub score: f32,
    /// `Σ 1 / weight`.
    pub cost: f32,
}

impl Path {
    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    pub fn seed(&self) -> &str {
        self.nodes.first().map(String::as_str).unwrap_or_default()
    }

    pub fn end(&self) -> &str {
        self.nodes.last().map(String::as_str).unwrap_or_default()
    }
}

/// A path under construction.
#[derive(Debug, Clone)]
struct Frontier {
    indices: Vec<NodeIndex>,
    steps: Vec<PathStep>,
    weight_product: f32,
    cost: f32,
}

impl GraphStore {
    /// Expand paths from `seeds`.
    ///
    /// Shorter paths are found first; expansion stops once `max_paths`
    /// distinct node sets are collected. With a `domain`, only edges that
    /// apply to that domain are followed. Results are ordered by score
    /// descending, then by node ids.
    pub fn traverse(
        &self,
        seeds: &[String],
        domain: Option<&str>,
        config: &TraversalConfig,
    ) -> Vec<Path> {
        let mut queue = VecDeque::new();
        let mut seen_seeds = HashSet::new();
        for seed in seeds {
            if let Some(i) = self.node_index(seed)
                && seen_seeds.insert(i)
            {
                queue.push_back(Frontier {
                    indices: vec![i],
                    steps: Vec::new(),
                    weight_product: 1.0,
                    cost: 0.0,
                });
            }
        }

        let mut node_sets: HashSet<BTreeSet<NodeIndex>> = HashSet::new();
        let mut paths = Vec::new();
        'bfs: while let Some(frontier) = queue.pop_front() {
            if frontier.steps.len() >= config.max_depth {
                continue;
            }
            let Some(&last) = frontier.indices.last() else {
                continue;
            };
            for (next, step) in self.hops(last, domain, config.undirected) {
                if frontier.indices.contains(&next) {
                    continue;
                }
                let mut extended = frontier.clone();
                extended.indices.push(next);
                extended.weight_product *= step.weight;
                extended.cost += 1.0 / step.weight;
                extended.steps.push(step);

                let key: BTreeSet<NodeIndex> = extended.indices.iter().copied().collect();
                if node_sets.insert(key) {
                    paths.push(self.finish(&extended, config.decay));
                    if paths.len() >= config.max_paths {
                        break 'bfs;
                    }
                }
                queue.push_back(extended);
            }
        }

        paths.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.nodes.cmp(&b.nodes))
        });
        debug!(seeds = seeds.len(), paths = paths.len(), "Graph traversal finished");
        paths
    }

    /// Edges leaving `node`, in deterministic order.
    fn hops(
        &self,
        node: NodeIndex,
        domain: Option<&str>,
        undirected: bool,
    ) -> Vec<(NodeIndex, PathStep)> {
        let graph = self.graph();
        let mut hops: Vec<(NodeIndex, PathStep)> = Vec::new();
        let mut directions = vec![Direction::Outgoing];
        if undirected {
            directions.push(Direction::Incoming);
        }
        for direction in directions {
            for e in graph.edges_directed(node, direction) {
                let edge = e.weight();
                if !edge.applies_to(domain) {
                    continue;
                }
                let other = match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                hops.push((
                    other,
                    PathStep {
                        from: graph[node].id.clone(),
                        rel: edge.rel.clone(),
                        to: graph[other].id.clone(),
                        weight: edge.weight,
                        forward: direction == Direction::Outgoing,
                    },
                ));
            }
        }
        hops.sort_by(|a, b| {
            a.1.to
                .cmp(&b.1.to)
                .then_with(|| a.1.rel.cmp(&b.1.rel))
                .then_with(|| b.1.weight.total_cmp(&a.1.weight))
        });
        hops
    }

    fn finish(&self, frontier: &Frontier, decay: f32) -> Path {
        let graph = self.graph();
        let depth = frontier.steps.len() as i32;
        Path {
            nodes: frontier
                .indices
                .iter()
                .map(|&i| graph[i].id.clone())
                .collect(),
            steps: frontier.steps.clone(),
            score: frontier.weight_product * decay.powi(depth),
            cost: frontier.cost,
        }
    }
}
