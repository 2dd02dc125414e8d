//! Exact dense search by a single scan.

use std::collections::HashMap;

use tracing::debug;

use augur_embeddings::{find_top_k, normalize, rescale_cosine};

use crate::backend::{BackendStats, IndexRow, SearchBackend, SearchHit, SearchQuery};
use crate::error::{Result, SearchError};

/// Brute-force cosine index. Always exact.
#[derive(Debug, Clone)]
pub struct BruteForceIndex {
    /// Stored rows, vectors unit length.
    rows: Vec<IndexRow>,

    /// `doc_id` to row position.
    positions: HashMap<String, usize>,

    /// Expected dimension of embeddings.
    dimension: usize,
}

impl BruteForceIndex {
    /// Create an empty index.
    pub fn new(dimension: usize) -> Self {
        Self {
            rows: Vec::new(),
            positions: HashMap::new(),
            dimension,
        }
    }

    /// Create an index holding `rows`.
    pub fn with_rows(dimension: usize, rows: Vec<IndexRow>) -> Result<Self> {
        let mut index = Self::new(dimension);
        index.upsert(rows)?;
        Ok(index)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Get a stored row.
    pub fn get(&self, doc_id: &str) -> Option<&IndexRow> {
        self.positions.get(doc_id).map(|&i| &self.rows[i])
    }

    /// Check if a `doc_id` exists in the index.
    pub fn contains(&self, doc_id: &str) -> bool {
        self.positions.contains_key(doc_id)
    }
}

/// Validate and normalise a row vector.
pub(crate) fn prepare_vector(row: &mut IndexRow, dimension: usize) -> Result<()> {
    let vector = row
        .vector
        .as_mut()
        .ok_or_else(|| SearchError::MissingVector(row.doc_id.clone()))?;
    if vector.len() != dimension {
        return Err(SearchError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    normalize(vector);
    Ok(())
}

/// Validate a query vector and return it normalised.
pub(crate) fn prepare_query(query: &SearchQuery, dimension: usize) -> Result<Vec<f32>> {
    let mut vector = query
        .vector
        .clone()
        .ok_or_else(|| SearchError::MissingVector("query".to_string()))?;
    if vector.len() != dimension {
        return Err(SearchError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    normalize(&mut vector);
    Ok(vector)
}

impl SearchBackend for BruteForceIndex {
    fn name(&self) -> &str {
        "brute"
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let vector = prepare_query(query, self.dimension)?;
        if query.k == 0 || self.rows.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = self
            .rows
            .iter()
            .filter(|row| query.filter.matches(&row.meta))
            .filter_map(|row| row.vector.as_deref().map(|v| (row.doc_id.as_str(), v)));

        let hits = find_top_k(&vector, candidates, query.k)?
            .into_iter()
            .map(|(doc_id, score)| SearchHit::new(doc_id, rescale_cosine(score)))
            .collect();
        Ok(hits)
    }

    fn upsert(&mut self, rows: Vec<IndexRow>) -> Result<usize> {
        let mut written = 0;
        for mut row in rows {
            prepare_vector(&mut row, self.dimension)?;
            match self.positions.get(&row.doc_id) {
                Some(&i) => self.rows[i] = row,
                None => {
                    self.positions.insert(row.doc_id.clone(), self.rows.len());
                    self.rows.push(row);
                }
            }
            written += 1;
        }
        debug!("Upserted {written} rows into brute-force index");
        Ok(written)
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            backend: self.name().to_string(),
            rows: self.rows.len(),
            dimension: Some(self.dimension),
            tombstones: 0,
            vocabulary: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RowMeta, SearchFilter};
    use augur_corpus::DocType;
    use pretty_assertions::assert_eq;

    fn row(doc_id: &str, domain: &str, vector: Vec<f32>) -> IndexRow {
        IndexRow {
            doc_id: doc_id.to_string(),
            text: String::new(),
            vector: Some(vector),
            meta: RowMeta {
                domain: domain.to_string(),
                doc_type: DocType::Rule,
                tags: Default::default(),
            },
        }
    }

    #[test]
    fn test_search_orders_by_score_then_id() {
        let index = BruteForceIndex::with_rows(
            2,
            vec![
                row("c", "general", vec![0.0, 1.0]),
                row("b", "general", vec![1.0, 0.0]),
                row("a", "general", vec![2.0, 0.0]),
            ],
        )
        .unwrap();

        let hits = index.search(&SearchQuery::vector(vec![1.0, 0.0], 3)).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[2].score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_filter_and_upsert_replace() {
        let mut index = BruteForceIndex::with_rows(
            2,
            vec![
                row("love", "love", vec![1.0, 0.0]),
                row("work", "career", vec![1.0, 0.1]),
            ],
        )
        .unwrap();

        let query = SearchQuery::vector(vec![1.0, 0.0], 5)
            .with_filter(SearchFilter::new().with_domain("career"));
        let hits = index.search(&query).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "work");

        index.upsert(vec![row("love", "love", vec![0.0, 1.0])]).unwrap();
        assert_eq!(index.len(), 2);
        let top = index.search(&SearchQuery::vector(vec![0.0, 1.0], 1)).unwrap();
        assert_eq!(top[0].doc_id, "love");
    }

    #[test]
    fn test_dimension_and_missing_vector_errors() {
        let mut index = BruteForceIndex::new(3);
        assert!(matches!(
            index.upsert(vec![row("x", "general", vec![1.0])]),
            Err(SearchError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            index.search(&SearchQuery::text("no vector", 3)),
            Err(SearchError::MissingVector(_))
        ));
    }
}
