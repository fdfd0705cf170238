//! Single-flight memoized query caches
//!
//! A generic map from a hashable key to a compute-once slot. Concurrent
//! callers for the same key share the one in-progress computation instead of
//! issuing redundant storage calls; unrelated keys compute in parallel.
//!
//! Per-key lifecycle: empty -> computing -> cached -> invalidated. Invalidated
//! keys recompute lazily on the next access, not eagerly. A failed computation
//! never populates the slot, so the next access retries rather than serving a
//! cached failure. If the caller driving a computation is torn down, a waiting
//! caller takes the computation over, so other consumers still get the result;
//! a key whose last consumer went away stays empty until the next access.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::error::Result;

pub struct QueryCache<K, V> {
    slots: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for QueryCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> QueryCache<K, V> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> QueryCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Return the cached value for `key`, computing it at most once across
    /// concurrent callers
    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let cell = self.slot(key);
        let value = cell.get_or_try_init(compute).await?;
        Ok(value.clone())
    }

    fn slot(&self, key: K) -> Arc<OnceCell<V>> {
        let mut slots = self.slots.lock().unwrap();
        slots
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Drop one key's slot. An in-flight computation on the old slot is not
    /// aborted; it completes for its current waiters while the next access
    /// here starts fresh.
    pub fn invalidate(&self, key: &K) {
        self.slots.lock().unwrap().remove(key);
    }

    pub fn invalidate_all(&self) {
        self.slots.lock().unwrap().clear();
    }

    /// Whether `key` currently holds a completed value (test introspection)
    pub fn is_cached(&self, key: &K) -> bool {
        self.slots
            .lock()
            .unwrap()
            .get(key)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }
}
