//! Weighted reciprocal rank fusion.
//!
//! `score(d) = Σ w_lane / (k + rank_lane(d))` over every lane that returned
//! `d`, plus a small PageRank bonus for documents tagged with graph nodes.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use augur_search::SearchHit;

use crate::trace::Stage;

/// Upper bound for the PageRank bonus weight.
pub const MAX_PAGERANK_ALPHA: f64 = 0.05;

/// Default RRF smoothing constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Per-lane fusion weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneWeights {
    pub dense: f64,
    pub sparse: f64,
    pub graph: f64,
    pub rerank: f64,
}

impl Default for LaneWeights {
    fn default() -> Self {
        Self {
            dense: 1.0,
            sparse: 0.8,
            graph: 0.6,
            rerank: 1.0,
        }
    }
}

impl LaneWeights {
    /// Weight of `lane`; stages that are not lanes weigh nothing.
    pub fn weight(&self, lane: Stage) -> f64 {
        match lane {
            Stage::Dense => self.dense,
            Stage::Sparse => self.sparse,
            Stage::Graph => self.graph,
            Stage::Rerank => self.rerank,
            _ => 0.0,
        }
    }
}

/// One lane's ranked output, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneRanking {
    pub lane: Stage,
    pub hits: Vec<SearchHit>,
}

impl LaneRanking {
    pub fn new(lane: Stage, hits: Vec<SearchHit>) -> Self {
        Self { lane, hits }
    }
}

/// A fused result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedHit {
    pub doc_id: String,
    pub score: f64,
    /// Dense similarity, when the dense lane returned the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dense_score: Option<f32>,
    /// Lanes that returned the document.
    pub lanes: Vec<Stage>,
}

/// Reciprocal rank fusion with a PageRank bonus.
#[derive(Debug, Clone, PartialEq)]
pub struct Fusion {
    k: f64,
    alpha: f64,
}

impl Default for Fusion {
    fn default() -> Self {
        Self::new(DEFAULT_RRF_K, 0.0)
    }
}

impl Fusion {
    /// `alpha` is clamped to `[0, 0.05]`.
    pub fn new(k: f64, alpha: f64) -> Self {
        Self {
            k: if k > 0.0 { k } else { DEFAULT_RRF_K },
            alpha: alpha.clamp(0.0, MAX_PAGERANK_ALPHA),
        }
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Fuse `rankings` into a single list.
    ///
    /// `pagerank` maps a `doc_id` to the largest normalized PageRank among
    /// its node tags. Order is fused score desc, dense score desc, `doc_id`
    /// asc.
    pub fn fuse(
        &self,
        rankings: &[LaneRanking],
        weights: &LaneWeights,
        pagerank: &dyn Fn(&str) -> f64,
    ) -> Vec<FusedHit> {
        let mut fused: HashMap<&str, FusedHit> = HashMap::new();

        for ranking in rankings {
            let weight = weights.weight(ranking.lane);
            for (i, hit) in ranking.hits.iter().enumerate() {
                let entry = fused.entry(hit.doc_id.as_str()).or_insert_with(|| FusedHit {
                    doc_id: hit.doc_id.clone(),
                    score: 0.0,
                    dense_score: None,
                    lanes: Vec::new(),
                });
                // A lane lists each document once; keep the best rank if not.
                if entry.lanes.contains(&ranking.lane) {
                    continue;
                }
                entry.score += weight / (self.k + (i + 1) as f64);
                entry.lanes.push(ranking.lane);
                if ranking.lane == Stage::Dense {
                    entry.dense_score = Some(hit.score);
                }
            }
        }

        let mut hits: Vec<FusedHit> = fused.into_values().collect();
        if self.alpha > 0.0 {
            for hit in &mut hits {
                let pr = pagerank(&hit.doc_id).clamp(0.0, 1.0);
                hit.score += self.alpha * pr / (self.k + 1.0);
            }
        }
        hits.sort_by(fused_order);
        hits
    }
}

fn fused_order(a: &FusedHit, b: &FusedHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| match (a.dense_score, b.dense_score) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.doc_id.cmp(&b.doc_id))
}
