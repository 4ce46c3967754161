//! TTL cache for query results.
//!
//! Backed by `moka::future::Cache`, which uses lock-free data structures
//! internally and is safe to call from async contexts without blocking the
//! runtime. Each entry carries its own TTL (callers choose one per
//! operation), enforced through moka's per-entry expiry policy: expiration
//! is observed lazily on read, with pending maintenance sweeping expired
//! entries in the background.
//!
//! Values are stored as `serde_json::Value` so one cache serves operations
//! of any result type.

use std::time::{Duration, Instant};

use moka::future::Cache;
use moka::Expiry;
use serde_json::Value;

/// Default maximum number of cached entries.
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// One cached result with its TTL.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    ttl: Duration,
}

/// Expiry policy that reads each entry's own TTL.
struct PerEntryTtl;

impl Expiry<String, CacheEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Keyed TTL cache for query results.
pub struct QueryCache {
    cache: Cache<String, CacheEntry>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl QueryCache {
    /// Creates a cache bounded at `capacity` entries.
    pub fn new(capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .expire_after(PerEntryTtl)
            .build();

        Self { cache }
    }

    /// Returns the live value at `key`, if present and unexpired.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.cache.get(key).await.map(|entry| entry.value)
    }

    /// Stores a value under `key` with the given TTL.
    pub async fn insert(&self, key: &str, value: Value, ttl: Duration) {
        self.cache
            .insert(key.to_string(), CacheEntry { value, ttl })
            .await;
    }

    /// Removes the entry at `key`, if any.
    pub async fn invalidate(&self, key: &str) {
        self.cache.remove(key).await;
    }

    /// Runs pending maintenance (expired-entry sweeping).
    pub async fn run_pending_maintenance(&self) {
        self.cache.run_pending_tasks().await;
    }

    /// Current number of entries, including any not yet swept.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
