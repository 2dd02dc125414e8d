//! Process-level search counters.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// Latencies kept for the average and p95.
const LATENCY_WINDOW: usize = 1024;

/// Snapshot of [`Metrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchMetrics {
    pub searches_total: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors_total: u64,
    pub rerank_hits: u64,
    pub avg_latency_ms: f64,
    pub cache_hit_rate: f64,
    pub p95_latency_ms: f64,
}

/// Counters shared by every query. Nothing decays; call [`Metrics::reset`].
#[derive(Debug, Default)]
pub struct Metrics {
    searches_total: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    errors_total: AtomicU64,
    rerank_hits: AtomicU64,
    latencies: Mutex<VecDeque<f64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_search(&self, latency_ms: f64) {
        self.searches_total.fetch_add(1, Ordering::Relaxed);
        let mut latencies = self.latencies.lock().unwrap_or_else(PoisonError::into_inner);
        if latencies.len() == LATENCY_WINDOW {
            latencies.pop_front();
        }
        latencies.push_back(latency_ms);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rerank(&self) {
        self.rerank_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SearchMetrics {
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;

        let mut latencies: Vec<f64> = self
            .latencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        latencies.sort_by(f64::total_cmp);

        let avg_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };
        // Nearest-rank percentile.
        let p95_latency_ms = match latencies.len() {
            0 => 0.0,
            n => latencies[((n as f64 * 0.95).ceil() as usize).clamp(1, n) - 1],
        };

        SearchMetrics {
            searches_total: self.searches_total.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            errors_total: self.errors_total.load(Ordering::Relaxed),
            rerank_hits: self.rerank_hits.load(Ordering::Relaxed),
            avg_latency_ms,
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                cache_hits as f64 / lookups as f64
            },
            p95_latency_ms,
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.searches_total,
            &self.cache_hits,
            &self.cache_misses,
            &self.errors_total,
            &self.rerank_hits,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.latencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
