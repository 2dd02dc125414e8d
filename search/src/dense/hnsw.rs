//! Approximate dense search over an HNSW graph (`hnsw_rs`).

use std::collections::HashMap;

use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use augur_embeddings::{dot_product, rank_cmp, rescale_cosine};

use crate::backend::{BackendStats, IndexRow, SearchBackend, SearchHit, SearchQuery};
use crate::dense::brute::{prepare_query, prepare_vector};
use crate::error::Result;

/// HNSW construction and search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Links per node.
    pub m: usize,

    /// Candidate list size while building.
    pub ef_construction: usize,

    /// Lower bound for the search candidate list; the effective value is
    /// `max(ef_search_min, 4k)`.
    pub ef_search_min: usize,

    /// Number of times the candidate list doubles when filters leave fewer
    /// than `k` results.
    pub filter_retries: u32,

    /// Maximum number of layers.
    pub max_layers: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search_min: 64,
            filter_retries: 2,
            max_layers: 16,
        }
    }
}

/// HNSW cosine index.
///
/// Rows are inserted sequentially in input order. An upsert of an existing
/// `doc_id` tombstones the old graph node and inserts a new one; the graph is
/// rebuilt when it outgrows its capacity.
pub struct HnswIndex {
    config: HnswConfig,
    dimension: usize,
    graph: Hnsw<'static, f32, DistCosine>,
    capacity: usize,

    /// Graph node id to row. `None` marks a tombstone.
    nodes: Vec<Option<IndexRow>>,

    /// `doc_id` to live graph node id.
    live: HashMap<String, usize>,
}

impl HnswIndex {
    /// Create an empty index.
    pub fn new(dimension: usize, config: HnswConfig) -> Self {
        let capacity = 1024;
        Self {
            graph: new_graph(&config, capacity),
            config,
            dimension,
            capacity,
            nodes: Vec::new(),
            live: HashMap::new(),
        }
    }

    /// Build an index holding `rows`.
    pub fn with_rows(dimension: usize, config: HnswConfig, rows: Vec<IndexRow>) -> Result<Self> {
        let mut index = Self::new(dimension, config);
        index.upsert(rows)?;
        Ok(index)
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    fn tombstones(&self) -> usize {
        self.nodes.len() - self.live.len()
    }

    /// Rebuild the graph from live rows in node order.
    fn rebuild(&mut self, capacity: usize) {
        let rows: Vec<IndexRow> = std::mem::take(&mut self.nodes)
            .into_iter()
            .flatten()
            .collect();
        self.capacity = capacity;
        self.graph = new_graph(&self.config, capacity);
        self.live.clear();
        for row in rows {
            self.insert_prepared(row);
        }
        info!(rows = self.nodes.len(), capacity, "Rebuilt HNSW graph");
    }

    fn insert_prepared(&mut self, row: IndexRow) {
        let id = self.nodes.len();
        if let Some(vector) = row.vector.as_deref() {
            self.graph.insert_slice((vector, id));
        }
        if let Some(old) = self.live.insert(row.doc_id.clone(), id) {
            self.nodes[old] = None;
        }
        self.nodes.push(Some(row));
    }

    /// Score live, filter-matching neighbours exactly.
    fn collect(
        &self,
        query: &SearchQuery,
        vector: &[f32],
        ef: usize,
    ) -> Result<Vec<(String, f32)>> {
        let knbn = ef.min(self.nodes.len()).max(1);
        let mut scored = Vec::new();
        for neighbour in self.graph.search(vector, knbn, ef) {
            let Some(Some(row)) = self.nodes.get(neighbour.d_id) else {
                continue;
            };
            if !query.filter.matches(&row.meta) {
                continue;
            }
            if let Some(stored) = row.vector.as_deref() {
                scored.push((row.doc_id.clone(), dot_product(vector, stored)?));
            }
        }
        Ok(scored)
    }
}

fn new_graph(config: &HnswConfig, capacity: usize) -> Hnsw<'static, f32, DistCosine> {
    Hnsw::<f32, DistCosine>::new(
        config.m,
        capacity,
        config.max_layers,
        config.ef_construction,
        DistCosine {},
    )
}

impl SearchBackend for HnswIndex {
    fn name(&self) -> &str {
        "hnsw"
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let vector = prepare_query(query, self.dimension)?;
        if query.k == 0 || self.live.is_empty() {
            return Ok(Vec::new());
        }

        let base_ef = self.config.ef_search_min.max(4 * query.k);
        let mut ef = base_ef;
        let mut scored = self.collect(query, &vector, ef)?;
        for attempt in 0..self.config.filter_retries {
            if scored.len() >= query.k || ef >= self.nodes.len() {
                break;
            }
            ef *= 2;
            debug!(attempt = attempt + 1, ef, "Filtered HNSW search came up short; widening");
            scored = self.collect(query, &vector, ef)?;
        }

        scored.sort_by(rank_cmp);
        scored.truncate(query.k);
        Ok(scored
            .into_iter()
            .map(|(doc_id, score)| SearchHit::new(doc_id, rescale_cosine(score)))
            .collect())
    }

    fn upsert(&mut self, rows: Vec<IndexRow>) -> Result<usize> {
        let mut prepared = Vec::with_capacity(rows.len());
        for mut row in rows {
            prepare_vector(&mut row, self.dimension)?;
            prepared.push(row);
        }

        let needed = self.nodes.len() + prepared.len();
        if needed > self.capacity {
            let capacity = needed.max(self.live.len() + prepared.len()).next_power_of_two();
            self.rebuild(capacity);
        }

        let written = prepared.len();
        for row in prepared {
            self.insert_prepared(row);
        }
        debug!("Upserted {written} rows into HNSW index");
        Ok(written)
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            backend: self.name().to_string(),
            rows: self.live.len(),
            dimension: Some(self.dimension),
            tombstones: self.tombstones(),
            vocabulary: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RowMeta, SearchFilter};
    use crate::dense::brute::BruteForceIndex;
    use augur_corpus::DocType;
    use augur_embeddings::HashingProvider;
    use pretty_assertions::assert_eq;

    fn rows(n: usize) -> Vec<IndexRow> {
        let provider = HashingProvider::new(32);
        (0..n)
            .map(|i| {
                let text = format!("rule {i} about planet {} and sign {}", i % 7, i % 12);
                IndexRow {
                    doc_id: format!("d_{i:04}"),
                    vector: Some(provider.embed_sync(&text)),
                    text,
                    meta: RowMeta {
                        domain: if i % 2 == 0 { "love" } else { "career" }.to_string(),
                        doc_type: DocType::Rule,
                        tags: Default::default(),
                    },
                }
            })
            .collect()
    }

    #[test]
    fn test_exact_vector_is_top_hit() {
        let data = rows(300);
        let index = HnswIndex::with_rows(32, HnswConfig::default(), data.clone()).unwrap();
        assert_eq!(index.len(), 300);

        let target = &data[123];
        let query = SearchQuery::vector(target.vector.clone().unwrap(), 5);
        let hits = index.search(&query).unwrap();
        assert_eq!(hits.len(), 5);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits.iter().any(|h| h.doc_id == target.doc_id));
    }

    #[test]
    fn test_scores_agree_with_brute_force() {
        let data = rows(200);
        let hnsw = HnswIndex::with_rows(32, HnswConfig::default(), data.clone()).unwrap();
        let brute = BruteForceIndex::with_rows(32, data.clone()).unwrap();

        let query = SearchQuery::vector(data[7].vector.clone().unwrap(), 3);
        let a = hnsw.search(&query).unwrap();
        let b = brute.search(&query).unwrap();
        assert_eq!(a[0].doc_id, b[0].doc_id);
        assert!((a[0].score - b[0].score).abs() < 1e-6);
    }

    #[test]
    fn test_filtered_search_returns_only_matches() {
        let data = rows(300);
        let index = HnswIndex::with_rows(32, HnswConfig::default(), data.clone()).unwrap();

        let query = SearchQuery::vector(data[1].vector.clone().unwrap(), 10)
            .with_filter(SearchFilter::new().with_domain("love"));
        let hits = index.search(&query).unwrap();
        assert_eq!(hits.len(), 10);
        assert!(hits.iter().all(|h| {
            let n: usize = h.doc_id[2..].parse().unwrap();
            n % 2 == 0
        }));
    }

    #[test]
    fn test_upsert_tombstones_and_rebuilds() {
        let data = rows(20);
        let mut index = HnswIndex::with_rows(32, HnswConfig::default(), data.clone()).unwrap();

        let mut replaced = data[0].clone();
        replaced.vector = data[5].vector.clone();
        index.upsert(vec![replaced]).unwrap();
        assert_eq!(index.stats().rows, 20);
        assert_eq!(index.stats().tombstones, 1);

        let hits = index
            .search(&SearchQuery::vector(data[5].vector.clone().unwrap(), 20))
            .unwrap();
        let zeros = hits.iter().filter(|h| h.doc_id == "d_0000").count();
        assert_eq!(zeros, 1);

        // Outgrowing the initial capacity drops tombstones; the 20 re-inserted
        // ids become fresh ones.
        index.upsert(rows(1100)).unwrap();
        assert_eq!(index.stats().rows, 1100);
        assert_eq!(index.stats().tombstones, 20);
    }
}
