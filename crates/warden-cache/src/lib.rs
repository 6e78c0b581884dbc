//! Warden Cache - two-tier read-through cache
//!
//! ```text
//! get(key) ──► Fast tier (moka, bounded, TTL capped)
//!                 │ miss
//!                 ▼
//!              Durable tier (TTL only) ──► hit: repopulate fast tier
//!                 │ miss
//!                 ▼
//!               None
//! ```
//!
//! Values are opaque serialized payloads; callers own decoding and
//! validation. The fast tier is only a latency optimization: every value it
//! returns is also in the durable tier.

#![warn(missing_docs)]

pub mod durable;
pub mod fast;

pub use durable::{DurableStore, MemoryStore, StoredValue};
pub use fast::FastTier;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use warden_common::AtomicCounter;

/// Longest lifetime either tier will hold an entry for
pub const MAX_ENTRY_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Cache error type
#[derive(Error, Debug)]
pub enum CacheError {
    /// Durable store rejected or failed an operation
    #[error("durable store error: {0}")]
    Store(String),

    /// Durable store could not be reached
    #[error("durable store unavailable")]
    Unavailable,
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum entries in the fast tier
    pub fast_capacity: u64,
    /// Longest lifetime of any fast-tier entry
    pub fast_ttl_cap: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fast_capacity: 65536,
            fast_ttl_cap: Duration::from_secs(60),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Served from the fast tier
    pub fast_hits: u64,
    /// Served from the durable tier
    pub durable_hits: u64,
    /// Found in neither tier
    pub misses: u64,
}

/// Read-through cache over a fast tier and a durable store
pub struct CacheManager {
    fast: FastTier,
    durable: Arc<dyn DurableStore>,
    fast_ttl_cap: Duration,

    fast_hits: AtomicCounter,
    durable_hits: AtomicCounter,
    misses: AtomicCounter,
}

impl CacheManager {
    /// Create a manager over `durable`
    pub fn new(config: CacheConfig, durable: Arc<dyn DurableStore>) -> Self {
        Self {
            fast: FastTier::new(config.fast_capacity),
            durable,
            fast_ttl_cap: config.fast_ttl_cap,
            fast_hits: AtomicCounter::new(0),
            durable_hits: AtomicCounter::new(0),
            misses: AtomicCounter::new(0),
        }
    }

    /// In-memory manager with default configuration
    pub fn in_memory() -> Self {
        Self::new(CacheConfig::default(), Arc::new(MemoryStore::new()))
    }

    /// Read `key`, falling through to the durable tier.
    ///
    /// Durable store failures are logged and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.fast.get(key) {
            self.fast_hits.inc();
            return Some(value);
        }

        match self.durable.get(key).await {
            Ok(Some(stored)) => {
                self.durable_hits.inc();
                let ttl = stored
                    .expires_in
                    .map_or(self.fast_ttl_cap, |remaining| remaining.min(self.fast_ttl_cap));
                self.fast.insert(key, stored.value.clone(), ttl);
                debug!(key, ttl_ms = ttl.as_millis() as u64, "Fast tier repopulated");
                Some(stored.value)
            }
            Ok(None) => {
                self.misses.inc();
                None
            }
            Err(e) => {
                self.misses.inc();
                warn!(key, error = %e, "Durable cache read failed, treating as miss");
                None
            }
        }
    }

    /// Write through to the durable tier, then the fast tier
    pub async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        self.durable.put(key, value.clone(), ttl).await?;
        self.fast.insert(key, value, ttl.min(self.fast_ttl_cap));
        Ok(())
    }

    /// Remove `key` from both tiers
    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        self.fast.invalidate(key);
        self.durable.delete(key).await
    }

    /// Drop expired entries from the durable tier
    pub async fn purge_expired(&self) -> CacheResult<usize> {
        self.durable.purge_expired().await
    }

    /// Purge the durable tier every `every` until the handle is aborted.
    ///
    /// Keys that are never read again would otherwise stay in the store.
    pub fn spawn_janitor(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match cache.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => debug!(purged, "Expired cache entries purged"),
                    Err(e) => warn!(error = %e, "Cache purge failed"),
                }
            }
        })
    }

    /// Hit/miss counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            fast_hits: self.fast_hits.get(),
            durable_hits: self.durable_hits.get(),
            misses: self.misses.get(),
        }
    }

    /// Fast tier, for inspection
    pub fn fast_tier(&self) -> &FastTier {
        &self.fast
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("fast_ttl_cap", &self.fast_ttl_cap)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct BrokenStore;

    #[async_trait]
    impl DurableStore for BrokenStore {
        async fn get(&self, _key: &str) -> CacheResult<Option<StoredValue>> {
            Err(CacheError::Unavailable)
        }
        async fn put(&self, _key: &str, _value: String, _ttl: Duration) -> CacheResult<()> {
            Err(CacheError::Store("read-only".into()))
        }
        async fn delete(&self, _key: &str) -> CacheResult<()> {
            Err(CacheError::Unavailable)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_through() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheManager::new(CacheConfig::default(), store.clone());

        assert!(cache.get("k").await.is_none());
        store.put("k", "v".into(), Duration::from_secs(300)).await.unwrap();

        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.durable_hits, 1);
        assert_eq!(stats.fast_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_ttl_capped_independently() {
        let cache = CacheManager::in_memory();
        cache.set("k", "v".into(), Duration::from_secs(300)).await.unwrap();

        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert_eq!(cache.stats().fast_hits, 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert_eq!(cache.stats().durable_hits, 1);

        tokio::time::advance(Duration::from_secs(240)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repopulated_entry_never_outlives_durable() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheManager::new(CacheConfig::default(), store.clone());
        store.put("k", "v".into(), Duration::from_secs(10)).await.unwrap();

        assert!(cache.get("k").await.is_some());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_removes_both_tiers() {
        let cache = CacheManager::in_memory();
        cache.set("k", "v".into(), Duration::from_secs(300)).await.unwrap();
        cache.delete("k").await.unwrap();
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_cold_fast_tier_gives_same_answers() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let warm = CacheManager::new(CacheConfig::default(), store.clone());
        let cold = CacheManager::new(
            CacheConfig {
                fast_capacity: 0,
                ..Default::default()
            },
            store,
        );

        warm.set("a", "1".into(), Duration::from_secs(30)).await.unwrap();
        for _ in 0..3 {
            assert_eq!(cold.get("a").await.as_deref(), Some("1"));
            assert_eq!(warm.get("a").await.as_deref(), Some("1"));
            assert!(cold.get("b").await.is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_janitor_reclaims_unread_keys() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheManager::new(CacheConfig::default(), store.clone()));
        for i in 0..10 {
            cache.set(&format!("ip-{}", i), "v".into(), Duration::from_secs(5)).await.unwrap();
        }
        cache.set("kept", "v".into(), Duration::from_secs(3600)).await.unwrap();

        let janitor = cache.spawn_janitor(Duration::from_secs(30));
        tokio::time::advance(Duration::from_secs(31)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(store.len(), 1);
        janitor.abort();
        assert_eq!(cache.get("kept").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_store_failure_is_miss() {
        let cache = CacheManager::new(CacheConfig::default(), Arc::new(BrokenStore));
        assert!(cache.get("k").await.is_none());
        assert!(cache.set("k", "v".into(), Duration::from_secs(1)).await.is_err());
        assert!(cache.delete("k").await.is_err());
        assert_eq!(cache.stats().misses, 1);
    }
}
