//! Bounded, time-expiring memoization
//!
//! `TtlCache` is the primitive every other component memoizes through:
//! control-plane invocations, the workspace directory, upstream HTTP clients
//! and session secrets. Each call site owns its own instance and picks its
//! own key type and TTL.
//!
//! ## Policy
//!
//! - A read past expiry never returns the stale value; the caller recomputes
//!   and the new value overwrites the old entry in place.
//! - Expired entries are not swept. They are replaced on the next write for
//!   the same key or evicted by the capacity bound.
//! - When a new key would push the cache past `max_entries`, the
//!   least-recently-used key is evicted first.
//! - Concurrent callers racing past an expiry may both recompute. The lock is
//!   never held while computing, so the last writer wins.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of the current instant, swappable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expiry: Instant,
    last_access: u64,
}

#[derive(Debug)]
struct Inner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// access tick -> key, oldest first
    recency: BTreeMap<u64, K>,
    tick: u64,
}

impl<K: Clone + Hash + Eq, V> Inner<K, V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &K) {
        let tick = self.next_tick();
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.last_access);
            entry.last_access = tick;
            self.recency.insert(tick, key.clone());
        }
    }

    fn evict_lru(&mut self) -> Option<K> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// LRU map whose entries expire after a fixed TTL
pub struct TtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Clone + Hash + Eq,
    V: Clone,
{
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                tick: 0,
            }),
            ttl,
            max_entries: max_entries.max(1),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used to stamp and check expiry
    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of stored keys, including expired ones not yet overwritten
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fresh value for `key`, if any. Counts as an access for LRU purposes.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let value = match inner.entries.get(key) {
            Some(entry) if now < entry.expiry => entry.value.clone(),
            _ => return None,
        };
        inner.touch(key);
        Some(value)
    }

    /// Store `value` under `key`, overwriting any existing entry in place
    pub fn insert(&self, key: K, value: V) {
        let expiry = self.clock.now() + self.ttl;
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.value = value;
            entry.expiry = expiry;
            inner.touch(&key);
            return;
        }

        while inner.entries.len() >= self.max_entries {
            if inner.evict_lru().is_none() {
                break;
            }
        }

        let tick = inner.next_tick();
        inner.recency.insert(tick, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                expiry,
                last_access: tick,
            },
        );
    }

    /// Return the fresh value for `key`, or compute, store and return a new one.
    ///
    /// Errors are returned to the caller and never stored.
    pub async fn get_or_try_compute<F, Fut, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = compute().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn invalidate(&self, key: &K) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.remove(key) {
            inner.recency.remove(&entry.last_access);
        }
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
    }
}

impl<K, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}
