//! BM25 lexical index.
//!
//! Terms come from the corpus tokenizer, so Korean words with attached
//! particles still match through their character bigrams.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use augur_corpus::{Tokenizer, TokenizerConfig};
use augur_embeddings::rank_cmp;

use crate::backend::{BackendStats, IndexRow, RowMeta, SearchBackend, SearchHit, SearchQuery};
use crate::error::Result;

/// BM25 parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Config {
    /// Term-frequency saturation.
    pub k1: f32,

    /// Length normalisation.
    pub b: f32,

    /// Emit bigrams for Latin words of at least this many characters.
    pub min_latin_bigram_len: usize,

    /// Emit bigrams for Latin words at all.
    pub latin_bigrams: bool,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            min_latin_bigram_len: 3,
            latin_bigrams: true,
        }
    }
}

#[derive(Debug, Clone)]
struct SparseDoc {
    doc_id: String,
    meta: RowMeta,
    term_freqs: HashMap<String, u32>,
    len: usize,
}

/// In-memory BM25 index.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    config: Bm25Config,
    tokenizer: Tokenizer,
    docs: Vec<SparseDoc>,
    positions: HashMap<String, usize>,
    postings: HashMap<String, Vec<usize>>,
    idf: HashMap<String, f32>,
    avg_len: f32,
}

impl Bm25Index {
    /// Create an empty index.
    pub fn new(config: Bm25Config) -> Self {
        let tokenizer = Tokenizer::with_config(TokenizerConfig {
            cjk_bigrams: true,
            latin_bigrams: config.latin_bigrams,
            min_latin_bigram_len: config.min_latin_bigram_len,
        });
        Self {
            config,
            tokenizer,
            docs: Vec::new(),
            positions: HashMap::new(),
            postings: HashMap::new(),
            idf: HashMap::new(),
            avg_len: 0.0,
        }
    }

    /// Build an index over `rows`.
    pub fn with_rows(config: Bm25Config, rows: Vec<IndexRow>) -> Self {
        let mut index = Self::new(config);
        index.insert_rows(rows);
        index.recompute();
        index
    }

    /// Inverse document frequency of a term, if indexed.
    pub fn idf(&self, term: &str) -> Option<f32> {
        self.idf.get(term).copied()
    }

    fn insert_rows(&mut self, rows: Vec<IndexRow>) -> usize {
        let mut written = 0;
        for row in rows {
            let terms = self.tokenizer.tokenize(&row.text);
            let mut term_freqs = HashMap::new();
            for term in &terms {
                *term_freqs.entry(term.clone()).or_insert(0u32) += 1;
            }
            let doc = SparseDoc {
                doc_id: row.doc_id,
                meta: row.meta,
                term_freqs,
                len: terms.len(),
            };
            match self.positions.get(&doc.doc_id) {
                Some(&i) => self.docs[i] = doc,
                None => {
                    self.positions.insert(doc.doc_id.clone(), self.docs.len());
                    self.docs.push(doc);
                }
            }
            written += 1;
        }
        written
    }

    /// Rebuild postings, idf and average length.
    fn recompute(&mut self) {
        self.postings.clear();
        for (i, doc) in self.docs.iter().enumerate() {
            for term in doc.term_freqs.keys() {
                self.postings.entry(term.clone()).or_default().push(i);
            }
        }

        let n = self.docs.len() as f32;
        self.idf = self
            .postings
            .iter()
            .map(|(term, docs)| {
                let df = docs.len() as f32;
                (term.clone(), (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
            })
            .collect();

        let total: usize = self.docs.iter().map(|d| d.len).sum();
        self.avg_len = if self.docs.is_empty() {
            0.0
        } else {
            total as f32 / n
        };
        debug!(
            docs = self.docs.len(),
            terms = self.postings.len(),
            "Recomputed BM25 statistics"
        );
    }
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new(Bm25Config::default())
    }
}

impl SearchBackend for Bm25Index {
    fn name(&self) -> &str {
        "bm25"
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        if query.k == 0 || self.docs.is_empty() {
            return Ok(Vec::new());
        }

        let terms: BTreeSet<String> = self.tokenizer.tokenize(&query.text).into_iter().collect();
        let Bm25Config { k1, b, .. } = self.config;
        let avg_len = self.avg_len.max(1.0);

        let mut scores: HashMap<usize, f32> = HashMap::new();
        for term in &terms {
            let (Some(postings), Some(idf)) = (self.postings.get(term), self.idf.get(term)) else {
                continue;
            };
            for &i in postings {
                let doc = &self.docs[i];
                let tf = doc.term_freqs.get(term).copied().unwrap_or(0) as f32;
                let norm = k1 * (1.0 - b + b * doc.len as f32 / avg_len);
                *scores.entry(i).or_insert(0.0) += idf * tf * (k1 + 1.0) / (tf + norm);
            }
        }

        let mut ranked: Vec<(String, f32)> = scores
            .into_iter()
            .filter(|(i, score)| *score > 0.0 && query.filter.matches(&self.docs[*i].meta))
            .map(|(i, score)| (self.docs[i].doc_id.clone(), score))
            .collect();
        ranked.sort_by(rank_cmp);
        ranked.truncate(query.k);

        let top = ranked.first().map(|(_, s)| *s).unwrap_or(0.0);
        Ok(ranked
            .into_iter()
            .map(|(doc_id, score)| SearchHit::new(doc_id, if top > 0.0 { score / top } else { 0.0 }))
            .collect())
    }

    fn upsert(&mut self, rows: Vec<IndexRow>) -> Result<usize> {
        let written = self.insert_rows(rows);
        self.recompute();
        Ok(written)
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            backend: self.name().to_string(),
            rows: self.docs.len(),
            dimension: None,
            tombstones: 0,
            vocabulary: Some(self.postings.len()),
        }
    }
}
