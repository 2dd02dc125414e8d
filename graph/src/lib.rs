//! Knowledge graph for the augur retrieval core.
//!
//! Nodes are astrological, saju and tarot concepts addressed by tag-form ids
//! (`planet:jupiter`, `stem:갑`). The store is loaded from CSV, ranks nodes
//! with PageRank, and expands seed entities into scored paths.

pub mod error;
pub mod loader;
pub mod model;
pub mod pagerank;
pub mod store;
pub mod traversal;

pub use error::{GraphError, Result};
pub use loader::{GraphData, is_graph_file, load_dir};
pub use model::{GENERAL_DOMAIN, GraphEdge, GraphNode, RelationFamily, node_id};
pub use pagerank::PageRankConfig;
pub use store::{GraphStats, GraphStore};
pub use traversal::{Path, PathStep, TraversalConfig};
