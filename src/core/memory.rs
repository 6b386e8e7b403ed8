use crate::core::errors::{EngineError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for reference-data caches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time-to-live for entries, in seconds
    pub ttl_secs: u64,
    /// Maximum number of entries per cache
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600, // 1 hour
            max_entries: 1000,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ttl_secs == 0 {
            return Err(EngineError::configuration("cache ttl_secs cannot be zero"));
        }
        if self.max_entries == 0 {
            return Err(EngineError::configuration("cache max_entries cannot be zero"));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Bounded TTL cache for slow-changing reference data.
///
/// Expired entries are dropped lazily on read. When full, the oldest entry
/// is evicted to make room.
///
/// Read-through callers take [`TtlCache::generation`] before reading the
/// backing store and fill with [`TtlCache::insert_if_current`]; a fill that
/// raced an invalidation is dropped.
#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    name: &'static str,
    data: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    generation: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name,
            data: DashMap::new(),
            ttl: config.ttl(),
            max_entries: config.max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        })
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let fresh = self.data.get(key).and_then(|entry| {
            if entry.inserted_at.elapsed() <= self.ttl {
                Some(entry.value.clone())
            } else {
                None
            }
        });

        match fresh {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.data
                    .remove_if(key, |_, entry| entry.inserted_at.elapsed() > self.ttl);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.make_room(&key);
        self.data.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Bumped by every invalidation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Fill `key` only if no invalidation ran since `generation` was read.
    /// Returns whether the value was cached.
    pub fn insert_if_current(&self, key: K, value: V, generation: u64) -> bool {
        self.make_room(&key);
        // The shard lock is held across the check, so an invalidation either
        // bumps the generation before it or removes the entry after it.
        let entry = self.data.entry(key);
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(cache = self.name, "Stale fill discarded");
            return false;
        }
        entry.insert(CacheEntry {
            value,
            inserted_at: Instant::now(),
        });
        true
    }

    pub fn invalidate(&self, key: &K) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if self.data.remove(key).is_some() {
            debug!(cache = self.name, "Cache entry invalidated");
        }
    }

    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.data.clear();
        debug!(cache = self.name, "Cache cleared");
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.data.len(),
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            eviction_count: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn make_room(&self, key: &K) {
        if !self.data.contains_key(key) && self.data.len() >= self.max_entries {
            self.evict_oldest();
        }
    }

    fn evict_oldest(&self) {
        let oldest = self
            .data
            .iter()
            .min_by_key(|entry| entry.value().inserted_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            if self.data.remove(&key).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
