//! Bounded LRU of query responses.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use lru::LruCache;
use wildmatch::WildMatch;

/// Cache key: the query text plus a fingerprint of every other parameter
/// that shapes the response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub text: String,
    pub params: String,
}

impl QueryKey {
    pub fn new(text: impl Into<String>, params: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: params.into(),
        }
    }
}

/// LRU cache written on miss only. A capacity of zero disables it.
#[derive(Debug)]
pub struct QueryCache<V> {
    inner: Option<Mutex<LruCache<QueryKey, V>>>,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn get(&self, key: &QueryKey) -> Option<V> {
        let mut cache = self.inner.as_ref()?.lock().unwrap_or_else(PoisonError::into_inner);
        cache.get(key).cloned()
    }

    pub fn insert(&self, key: QueryKey, value: V) {
        if let Some(inner) = &self.inner {
            inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .put(key, value);
        }
    }

    /// Remove entries whose query text matches the wildcard `pattern`
    /// (`*` and `?`). Returns the number removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let Some(inner) = &self.inner else {
            return 0;
        };
        let matcher = WildMatch::new(pattern);
        let mut cache = inner.lock().unwrap_or_else(PoisonError::into_inner);
        let doomed: Vec<QueryKey> = cache
            .iter()
            .filter(|(key, _)| matcher.matches(&key.text))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            cache.pop(key);
        }
        doomed.len()
    }

    pub fn clear(&self) -> usize {
        let Some(inner) = &self.inner else {
            return 0;
        };
        let mut cache = inner.lock().unwrap_or_else(PoisonError::into_inner);
        let cleared = cache.len();
        cache.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.inner
            .as_ref()
            .map_or(0, |inner| inner.lock().unwrap_or_else(PoisonError::into_inner).len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
