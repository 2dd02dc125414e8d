//! The uniform backend interface shared by dense and sparse indices.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use augur_corpus::{DEFAULT_DOMAIN, DocType, Document};

use crate::error::Result;

/// Metadata used for post-retrieval filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMeta {
    pub domain: String,
    pub doc_type: DocType,
    pub tags: BTreeSet<String>,
}

/// A single indexed row.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub doc_id: String,
    pub text: String,
    /// Unit-length embedding; required by dense backends only.
    pub vector: Option<Vec<f32>>,
    pub meta: RowMeta,
}

impl IndexRow {
    /// Build a row from a corpus document.
    pub fn from_document(doc: &Document, vector: Option<Vec<f32>>) -> Self {
        Self {
            doc_id: doc.doc_id.clone(),
            text: doc.text.clone(),
            vector,
            meta: RowMeta {
                domain: doc.domain.clone(),
                doc_type: doc.doc_type,
                tags: doc.tags.clone(),
            },
        }
    }
}

/// Metadata filter applied after retrieval.
///
/// Empty fields do not constrain. A domain filter also admits rows in the
/// `general` domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub doc_types: BTreeSet<DocType>,

    /// Row must carry at least one of these tags.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags_any: BTreeSet<String>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_doc_type(mut self, doc_type: DocType) -> Self {
        self.doc_types.insert(doc_type);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags_any.insert(tag.into());
        self
    }

    /// Whether the filter constrains anything.
    pub fn is_empty(&self) -> bool {
        self.domain.is_none() && self.doc_types.is_empty() && self.tags_any.is_empty()
    }

    pub fn matches(&self, meta: &RowMeta) -> bool {
        if let Some(domain) = &self.domain
            && meta.domain != *domain
            && meta.domain != DEFAULT_DOMAIN
        {
            return false;
        }
        if !self.doc_types.is_empty() && !self.doc_types.contains(&meta.doc_type) {
            return false;
        }
        if !self.tags_any.is_empty() && self.tags_any.is_disjoint(&meta.tags) {
            return false;
        }
        true
    }
}

/// A search request. Dense backends read `vector`, sparse backends `text`.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: String,
    pub vector: Option<Vec<f32>>,
    pub k: usize,
    pub filter: SearchFilter,
}

impl SearchQuery {
    pub fn text(text: impl Into<String>, k: usize) -> Self {
        Self {
            text: text.into(),
            k,
            ..Self::default()
        }
    }

    pub fn vector(vector: Vec<f32>, k: usize) -> Self {
        Self {
            vector: Some(vector),
            k,
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// One scored result. Scores are in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub score: f32,
}

impl SearchHit {
    pub fn new(doc_id: impl Into<String>, score: f32) -> Self {
        Self {
            doc_id: doc_id.into(),
            score,
        }
    }
}

/// Backend statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendStats {
    pub backend: String,
    pub rows: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    /// Rows superseded by an upsert but still present in the structure.
    pub tombstones: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary: Option<usize>,
}

/// Uniform interface over search indices.
///
/// Searches are CPU-bound and synchronous; async callers should run them on
/// the blocking pool.
pub trait SearchBackend: Send + Sync {
    /// Backend name (`brute`, `hnsw`, `bm25`).
    fn name(&self) -> &str;

    /// Top-`k` rows for the query, score descending, ties on `doc_id`.
    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>>;

    /// Insert or replace rows by `doc_id`. Returns the number of rows written.
    fn upsert(&mut self, rows: Vec<IndexRow>) -> Result<usize>;

    fn stats(&self) -> BackendStats;

    fn len(&self) -> usize {
        self.stats().rows
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
