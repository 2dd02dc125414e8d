//! Second-pass scoring of fused candidates.
//!
//! A [`Reranker`] scores `(query, text)` pairs in batches. [`rerank`] drives
//! it under a wall-time ceiling: once the ceiling passes no further batch is
//! started, and unscored candidates follow the scored ones in input order.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use augur_corpus::Tokenizer;
use augur_search::SearchHit;

use crate::error::StageError;
use crate::trace::Stage;

/// A candidate handed to the reranker.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankCandidate {
    pub doc_id: String,
    pub text: String,
}

impl RerankCandidate {
    pub fn new(doc_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            text: text.into(),
        }
    }
}

/// Pairwise relevance scorer.
///
/// Scoring is synchronous and CPU-bound; the pipeline calls it on the
/// blocking pool.
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// One score per text, higher is more relevant.
    fn score_batch(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>, StageError>;
}

/// Result of a rerank pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reranked {
    /// Scored candidates first, then unscored ones in input order.
    pub hits: Vec<SearchHit>,
    /// Number of candidates that received a score.
    pub scored: usize,
}

/// Rerank `candidates` and keep the best `k`.
///
/// Scored candidates are ordered by score, ties keeping input order.
/// Unscored candidates carry a score of zero.
pub fn rerank(
    reranker: &dyn Reranker,
    query: &str,
    candidates: &[RerankCandidate],
    k: usize,
    batch_size: usize,
    ceiling: Duration,
) -> Result<Reranked, StageError> {
    let started = Instant::now();
    let batch_size = batch_size.max(1);
    let mut scored: Vec<(usize, f32)> = Vec::with_capacity(candidates.len());

    for (batch_no, batch) in candidates.chunks(batch_size).enumerate() {
        if started.elapsed() >= ceiling {
            tracing::debug!(
                "Rerank ceiling of {}ms reached after {} candidates",
                ceiling.as_millis(),
                scored.len()
            );
            break;
        }
        let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
        let scores = reranker.score_batch(query, &texts)?;
        if scores.len() != texts.len() {
            return Err(StageError::failed(
                Stage::Rerank,
                format!(
                    "{} returned {} scores for {} texts",
                    reranker.name(),
                    scores.len(),
                    texts.len()
                ),
            ));
        }
        let offset = batch_no * batch_size;
        scored.extend(scores.into_iter().enumerate().map(|(i, s)| (offset + i, s)));
    }

    let scored_count = scored.len();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let hits = scored
        .iter()
        .map(|(i, score)| SearchHit::new(candidates[*i].doc_id.clone(), *score))
        .chain(
            candidates[scored_count..]
                .iter()
                .map(|c| SearchHit::new(c.doc_id.clone(), 0.0)),
        )
        .take(k)
        .collect();

    Ok(Reranked {
        hits,
        scored: scored_count,
    })
}

/// Deterministic reranker scoring the share of query terms found in the text.
#[derive(Debug, Clone, Default)]
pub struct LexicalReranker {
    tokenizer: Tokenizer,
}

impl LexicalReranker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reranker for LexicalReranker {
    fn name(&self) -> &str {
        "lexical"
    }

    fn score_batch(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>, StageError> {
        let query_terms: HashSet<String> = self.tokenizer.tokenize(query).into_iter().collect();
        if query_terms.is_empty() {
            return Ok(vec![0.0; texts.len()]);
        }
        Ok(texts
            .iter()
            .map(|text| {
                let terms: HashSet<String> = self.tokenizer.tokenize(text).into_iter().collect();
                query_terms.intersection(&terms).count() as f32 / query_terms.len() as f32
            })
            .collect())
    }
}

#[cfg(feature = "local-models")]
pub use cross_encoder::CrossEncoderReranker;

#[cfg(feature = "local-models")]
mod cross_encoder {
    use std::sync::{Mutex, PoisonError};

    use fastembed::{RerankInitOptions, RerankerModel, TextRerank};

    use super::Reranker;
    use crate::error::StageError;
    use crate::trace::Stage;

    /// BGE cross-encoder (BAAI/bge-reranker-base).
    pub struct CrossEncoderReranker {
        model: Mutex<TextRerank>,
    }

    impl CrossEncoderReranker {
        /// Load the model, downloading it on first use.
        pub fn load() -> Result<Self, StageError> {
            let opts = RerankInitOptions::new(RerankerModel::BGERerankerBase)
                .with_show_download_progress(false);
            let model =
                TextRerank::try_new(opts).map_err(|e| StageError::failed(Stage::Rerank, e))?;
            Ok(Self {
                model: Mutex::new(model),
            })
        }
    }

    impl Reranker for CrossEncoderReranker {
        fn name(&self) -> &str {
            "bge-reranker-base"
        }

        fn score_batch(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>, StageError> {
            let docs: Vec<&str> = texts.to_vec();
            let results = self
                .model
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .rerank(query, &docs, false, None)
                .map_err(|e| StageError::failed(Stage::Rerank, e))?;

            let mut scores = vec![0.0; texts.len()];
            for result in results {
                if let Some(slot) = scores.get_mut(result.index) {
                    // Logits to (0, 1).
                    *slot = 1.0 / (1.0 + (-result.score).exp());
                }
            }
            Ok(scores)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn candidates() -> Vec<RerankCandidate> {
        vec![
            RerankCandidate::new("a", "The Tower card means sudden upheaval"),
            RerankCandidate::new("b", "Jupiter in Sagittarius brings luck"),
            RerankCandidate::new("c", "Jupiter rules Sagittarius"),
            RerankCandidate::new("d", "Dreams of water"),
        ]
    }

    fn ids(reranked: &Reranked) -> Vec<&str> {
        reranked.hits.iter().map(|h| h.doc_id.as_str()).collect()
    }

    #[test]
    fn test_lexical_scores_overlap() {
        let reranked = rerank(
            &LexicalReranker::new(),
            "Jupiter in Sagittarius",
            &candidates(),
            10,
            2,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(ids(&reranked), vec!["b", "c", "a", "d"]);
        assert_eq!(reranked.scored, 4);
        assert_eq!(reranked.hits[0].score, 1.0);
    }

    struct SlowReranker {
        calls: AtomicUsize,
    }

    impl Reranker for SlowReranker {
        fn name(&self) -> &str {
            "slow"
        }

        fn score_batch(&self, _query: &str, texts: &[&str]) -> Result<Vec<f32>, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            Ok(texts.iter().map(|t| t.len() as f32).collect())
        }
    }

    #[test]
    fn test_ceiling_leaves_tail_in_input_order() {
        let reranker = SlowReranker {
            calls: AtomicUsize::new(0),
        };
        let reranked = rerank(
            &reranker,
            "q",
            &candidates(),
            10,
            2,
            Duration::from_millis(10),
        )
        .unwrap();
        assert_eq!(reranker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(reranked.scored, 2);
        // Batch one scored by length: a is longer than b.
        assert_eq!(ids(&reranked), vec!["a", "b", "c", "d"]);
        assert_eq!(reranked.hits[3].score, 0.0);
    }

    struct BrokenReranker;

    impl Reranker for BrokenReranker {
        fn name(&self) -> &str {
            "broken"
        }

        fn score_batch(&self, _query: &str, _texts: &[&str]) -> Result<Vec<f32>, StageError> {
            Ok(vec![1.0])
        }
    }

    #[test]
    fn test_score_count_mismatch_is_an_error() {
        let err = rerank(
            &BrokenReranker,
            "q",
            &candidates(),
            10,
            4,
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert_eq!(err.stage(), Stage::Rerank);
    }

    #[test]
    fn test_truncates_to_k() {
        let reranked = rerank(
            &LexicalReranker::new(),
            "Jupiter",
            &candidates(),
            2,
            16,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(ids(&reranked), vec!["b", "c"]);
    }
}
