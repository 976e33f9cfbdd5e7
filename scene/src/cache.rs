//! Compute-once caches shared across concurrent queries.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Hit/miss counters of a [`KeyedCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: usize,
    pub misses: usize,
}

/// A map whose values are computed at most once per key.
///
/// The map lock is only held to find or insert a key's cell; the value is
/// computed outside it inside the cell's `OnceLock`. Concurrent first access
/// to one key runs the computation once while the other callers wait on that
/// cell alone. Readers of finished keys never wait on unrelated keys.
pub struct KeyedCache<K, V> {
    cells: RwLock<HashMap<K, Arc<OnceLock<V>>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<K, V> Default for KeyedCache<K, V> {
    fn default() -> Self {
        Self {
            cells: RwLock::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> KeyedCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(&self, key: &K, compute: impl FnOnce() -> V) -> V {
        let cell = self.cell(key);
        let mut computed = false;
        let value = cell.get_or_init(|| {
            computed = true;
            compute()
        });
        if computed {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        value.clone()
    }

    /// The finished value for `key`, without computing it.
    pub fn get(&self, key: &K) -> Option<V> {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        cells.get(key).and_then(|cell| cell.get().cloned())
    }

    pub fn clear(&self) {
        self.cells
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.cells.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn cell(&self, key: &K) -> Arc<OnceLock<V>> {
        if let Some(cell) = self
            .cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(cell);
        }
        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(cells.entry(key.clone()).or_default())
    }
}
