//! Explicit memo caches.
//!
//! Entries are timestamped when stored and checked for expiry on every read.
//! Failed loads are never stored. The lock is released while a loader runs,
//! so two concurrent misses on the same key may both load; the later insert
//! wins. A load that was started before a [`TimedCache::clear`] returns its
//! value without storing it.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::geometry::FeatureSet;
use crate::model::Table;

/// Query results keyed by literal SQL text.
pub type QueryCache = TimedCache<String, Table>;

/// Processed geometry keyed by the fingerprint of the input table.
pub type GeometryCache = TimedCache<u64, FeatureSet>;

struct CacheEntry<V> {
    value: Arc<V>,
    created_at: Instant,
}

pub struct TimedCache<K, V> {
    name: &'static str,
    ttl: Option<Duration>,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    /// Bumped by every clear, under the entries lock.
    generation: AtomicU64,
}

impl<K, V> TimedCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    /// `ttl: None` keeps entries until [`TimedCache::clear`].
    pub fn new(name: &'static str, ttl: Option<Duration>) -> Self {
        Self {
            name,
            ttl,
            entries: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn is_fresh(&self, entry: &CacheEntry<V>) -> bool {
        match self.ttl {
            Some(ttl) => entry.created_at.elapsed() < ttl,
            None => true,
        }
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut entries = self.entries.lock();
        let fresh = entries.get(key).map(|e| self.is_fresh(e))?;
        if fresh {
            entries.get(key).map(|e| e.value.clone())
        } else {
            debug!(cache = self.name, ?key, "entry expired");
            entries.remove(key);
            None
        }
    }

    /// Store `value` unless the cache was cleared since `generation` was read.
    fn insert_if_current(&self, key: K, value: V, generation: u64) -> Arc<V> {
        let value = Arc::new(value);
        let mut entries = self.entries.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(cache = self.name, ?key, "cleared while loading; result not stored");
            return value;
        }
        entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                created_at: Instant::now(),
            },
        );
        value
    }

    /// Return the cached value for `key`, or run `load` and cache its result.
    pub async fn get_or_try_load<F, Fut, E>(&self, key: K, load: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(&key) {
            debug!(cache = self.name, ?key, "hit");
            return Ok(hit);
        }
        debug!(cache = self.name, ?key, "miss");
        let generation = self.generation.load(Ordering::Acquire);
        let value = load().await?;
        Ok(self.insert_if_current(key, value, generation))
    }

    /// Creation instant of a live entry.
    pub fn created_at(&self, key: &K) -> Option<Instant> {
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|e| self.is_fresh(e))
            .map(|e| e.created_at)
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        debug!(cache = self.name, dropped = entries.len(), "cleared");
        entries.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
