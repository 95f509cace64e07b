//! In-memory cache of resolved values
//!
//! Entries are whole `Arc<ResolvedValue>`s: a write replaces the pointer, so
//! a reader sees either the old value or the new one, never a mix. Expired
//! entries are evicted lazily when read, by `purge_expired`, or by the
//! optional background sweeper.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tiered_core::{Clock, Key, ResolvedValue, SystemClock};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Statistics about cache usage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses, expired reads included
    pub misses: u64,
    /// Number of expired entries encountered or purged
    pub expired: u64,
    /// Number of accepted writes
    pub inserts: u64,
    /// Current number of cached entries
    pub entries: usize,
}

impl CacheStats {
    /// Get hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Key → value cache with per-entry TTL
#[derive(Debug)]
pub struct ResolutionCache {
    entries: RwLock<HashMap<Key, Arc<ResolvedValue>>>,
    stats: RwLock<CacheStats>,
    clock: Arc<dyn Clock>,
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ResolutionCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Fresh value for `key`; an expired entry is evicted and reported as a miss
    pub async fn get(&self, key: &Key) -> Option<Arc<ResolvedValue>> {
        let now = self.clock.now();
        let entries = self.entries.read().await;

        match entries.get(key) {
            Some(value) if !value.is_expired_at(now) => {
                let value = value.clone();
                drop(entries);
                trace!("Cache hit for '{}'", key);
                self.stats.write().await.hits += 1;
                Some(value)
            }
            Some(stale) => {
                let stale = stale.clone();
                drop(entries);
                debug!("Cache entry for '{}' expired", key);

                let mut entries = self.entries.write().await;
                // a concurrent put may have replaced it in between
                if entries.get(key).is_some_and(|current| Arc::ptr_eq(current, &stale)) {
                    entries.remove(key);
                }
                drop(entries);

                let mut stats = self.stats.write().await;
                stats.expired += 1;
                stats.misses += 1;
                None
            }
            None => {
                drop(entries);
                trace!("Cache miss for '{}'", key);
                self.stats.write().await.misses += 1;
                None
            }
        }
    }

    /// Store `value`, replacing any previous entry for its key
    ///
    /// Returns `false` without storing if the value is already expired.
    pub async fn put(&self, value: Arc<ResolvedValue>) -> bool {
        if value.is_expired_at(self.clock.now()) {
            debug!("Refusing to cache already-expired value for '{}'", value.key);
            return false;
        }

        self.entries.write().await.insert(value.key.clone(), value);
        self.stats.write().await.inserts += 1;
        true
    }

    /// Drop the entry for `key`; returns whether there was one
    pub async fn invalidate(&self, key: &Key) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove every expired entry; returns how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let removed = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, value| !value.is_expired_at(now));
            before - entries.len()
        };

        if removed > 0 {
            debug!("Purged {} expired cache entries", removed);
            self.stats.write().await.expired += removed as u64;
        }
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().await.clone();
        stats.entries = self.len().await;
        stats
    }

    /// Purge expired entries every `interval` until the cache is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.purge_expired().await;
                    }
                    None => break,
                }
            }
        })
    }
}
