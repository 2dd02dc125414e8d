//! CSV loading for graph nodes and edges.
//!
//! Files are named `nodes_<domain>_<type>.csv` and `edges_<domain>_<rel>.csv`.
//! The name supplies defaults for cells the file leaves blank.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{GraphError, Result};
use crate::model::{GraphEdge, GraphNode};

/// Relation used when neither the row nor the file name names one.
pub const DEFAULT_RELATION: &str = "related_to";

/// Everything read from a graph directory.
#[derive(Debug, Clone, Default)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub files_loaded: usize,
    /// Files that could not be read, with the reason.
    pub files_skipped: Vec<(PathBuf, String)>,
    pub rows_dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Nodes,
    Edges,
}

/// Defaults parsed from a graph file name.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileDefaults {
    kind: FileKind,
    domain: Option<String>,
    /// Node type for node files, relation for edge files.
    label: Option<String>,
}

fn file_defaults(path: &Path) -> Option<FileDefaults> {
    if path.extension().and_then(|e| e.to_str()) != Some("csv") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (kind, rest) = if let Some(rest) = stem.strip_prefix("nodes_") {
        (FileKind::Nodes, rest)
    } else if let Some(rest) = stem.strip_prefix("edges_") {
        (FileKind::Edges, rest)
    } else {
        return None;
    };
    let (domain, label) = match rest.split_once('_') {
        Some((domain, label)) => (domain, label),
        None => (rest, ""),
    };
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_lowercase());
    Some(FileDefaults {
        kind,
        domain: non_empty(domain),
        label: non_empty(label),
    })
}

/// Whether a file name follows the graph CSV convention.
pub fn is_graph_file(path: &Path) -> bool {
    file_defaults(path).is_some()
}

/// Load every graph CSV under `dir`, in sorted path order.
pub fn load_dir(dir: &Path) -> Result<GraphData> {
    if !dir.is_dir() {
        return Err(GraphError::SourceMissing(dir.to_path_buf()));
    }

    let mut data = GraphData::default();
    let entries = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file());

    for entry in entries {
        let path = entry.path();
        let Some(defaults) = file_defaults(path) else {
            continue;
        };
        let result = match defaults.kind {
            FileKind::Nodes => read_nodes(path, &defaults).map(|(nodes, dropped)| {
                data.nodes.extend(nodes);
                dropped
            }),
            FileKind::Edges => read_edges(path, &defaults).map(|(edges, dropped)| {
                data.edges.extend(edges);
                dropped
            }),
        };
        match result {
            Ok(dropped) => {
                data.files_loaded += 1;
                data.rows_dropped += dropped;
            }
            Err(e) => {
                warn!("Skipping graph file {}: {e}", path.display());
                data.files_skipped.push((path.to_path_buf(), e.to_string()));
            }
        }
    }

    debug!(
        nodes = data.nodes.len(),
        edges = data.edges.len(),
        files = data.files_loaded,
        "Loaded graph CSVs"
    );
    Ok(data)
}

/// Header lookup for one CSV file.
struct Columns {
    path: PathBuf,
    names: Vec<String>,
}

impl Columns {
    fn read(path: &Path, reader: &mut csv::Reader<std::fs::File>) -> Result<Self> {
        let names = reader
            .headers()
            .map_err(|e| GraphError::parse(path, e.to_string()))?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();
        Ok(Self {
            path: path.to_path_buf(),
            names,
        })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|h| h == name)
    }

    fn require(&self, name: &str) -> Result<usize> {
        self.position(name).ok_or_else(|| GraphError::MissingColumn {
            path: self.path.clone(),
            column: name.to_string(),
        })
    }
}

fn cell(record: &csv::StringRecord, index: Option<usize>) -> Option<String> {
    index
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| GraphError::parse(path, e.to_string()))
}

fn read_nodes(path: &Path, defaults: &FileDefaults) -> Result<(Vec<GraphNode>, usize)> {
    let mut reader = open(path)?;
    let columns = Columns::read(path, &mut reader)?;
    let id_col = columns.require("id")?;
    let label_col = columns.require("label")?;
    let type_col = columns.require("type")?;
    let description_col = columns.position("description");
    let domains_col = columns.position("domain_tags");

    let mut nodes = Vec::new();
    let mut dropped = 0;
    for (row, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!("Dropping row {} of {}: {e}", row + 1, path.display());
                dropped += 1;
                continue;
            }
        };
        let Some(id) = cell(&record, Some(id_col)) else {
            warn!("Dropping row {} of {}: empty id", row + 1, path.display());
            dropped += 1;
            continue;
        };
        let label = cell(&record, Some(label_col)).unwrap_or_else(|| id.clone());
        let Some(node_type) = cell(&record, Some(type_col)).or_else(|| defaults.label.clone())
        else {
            warn!("Dropping node {id} in {}: no type", path.display());
            dropped += 1;
            continue;
        };

        let mut node = GraphNode::new(id, label, node_type);
        node.description = cell(&record, description_col);
        match cell(&record, domains_col) {
            Some(tags) => node.domain_tags.extend(
                tags.split(';')
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty()),
            ),
            None => node.domain_tags.extend(defaults.domain.clone()),
        }
        nodes.push(node);
    }
    Ok((nodes, dropped))
}

fn read_edges(path: &Path, defaults: &FileDefaults) -> Result<(Vec<GraphEdge>, usize)> {
    let mut reader = open(path)?;
    let columns = Columns::read(path, &mut reader)?;
    let src_col = columns.require("src")?;
    let dst_col = columns.require("dst")?;
    let weight_col = columns.require("weight")?;
    let rel_col = columns.position("rel");
    let domain_col = columns.position("domain");

    let mut edges = Vec::new();
    let mut dropped = 0;
    for (row, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!("Dropping row {} of {}: {e}", row + 1, path.display());
                dropped += 1;
                continue;
            }
        };
        let (Some(src), Some(dst)) = (cell(&record, Some(src_col)), cell(&record, Some(dst_col)))
        else {
            warn!("Dropping row {} of {}: empty endpoint", row + 1, path.display());
            dropped += 1;
            continue;
        };
        let weight = cell(&record, Some(weight_col)).and_then(|w| w.parse::<f32>().ok());
        let Some(weight) = weight.filter(|w| w.is_finite() && *w > 0.0) else {
            warn!("Dropping edge {src} -> {dst} in {}: weight must be positive", path.display());
            dropped += 1;
            continue;
        };
        let rel = cell(&record, rel_col)
            .or_else(|| defaults.label.clone())
            .unwrap_or_else(|| DEFAULT_RELATION.to_string());

        let mut edge = GraphEdge::new(src, dst, rel, weight);
        edge.domain = cell(&record, domain_col)
            .map(|d| d.to_lowercase())
            .or_else(|| defaults.domain.clone());
        edges.push(edge);
    }
    Ok((edges, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_file_defaults() {
        let d = file_defaults(Path::new("edges_love_yukhap.csv")).unwrap();
        assert_eq!(d.kind, FileKind::Edges);
        assert_eq!(d.domain.as_deref(), Some("love"));
        assert_eq!(d.label.as_deref(), Some("yukhap"));

        let d = file_defaults(Path::new("nodes_saju_ten_god.csv")).unwrap();
        assert_eq!(d.label.as_deref(), Some("ten_god"));

        assert!(file_defaults(Path::new("stems.csv")).is_none());
        assert!(file_defaults(Path::new("nodes_saju_stem.json")).is_none());
    }

    #[test]
    fn test_rows_default_from_file_name() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "nodes_saju_stem.csv",
            "id,label,type\nstem:갑,갑,\nstem:을,을,stem\n",
        );
        write(
            dir.path(),
            "edges_general_generates.csv",
            "src,dst,weight,rel\nstem:갑,stem:을,0.8,\nstem:을,stem:갑,0,\nstem:갑,stem:을,x,\n",
        );

        let data = load_dir(dir.path()).unwrap();
        assert_eq!(data.nodes.len(), 2);
        assert_eq!(data.nodes[0].node_type, "stem");
        assert!(data.nodes[0].domain_tags.contains("saju"));

        assert_eq!(data.edges.len(), 1);
        assert_eq!(data.edges[0].rel, "generates");
        assert_eq!(data.edges[0].domain.as_deref(), Some("general"));
        assert_eq!(data.rows_dropped, 2);
    }

    #[test]
    fn test_missing_column_skips_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "edges_general_rules.csv", "src,dst\na,b\n");
        let data = load_dir(dir.path()).unwrap();
        assert_eq!(data.files_loaded, 0);
        assert_eq!(data.files_skipped.len(), 1);
    }

    #[test]
    fn test_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load_dir(&dir.path().join("nope")),
            Err(GraphError::SourceMissing(_))
        ));
    }
}
