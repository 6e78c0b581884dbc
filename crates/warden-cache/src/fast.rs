//! Bounded in-process cache tier

use crate::MAX_ENTRY_TTL;
use moka::sync::Cache;
use moka::Expiry;
use std::time::{Duration, Instant as StdInstant};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct FastEntry {
    value: String,
    ttl: Duration,
    expires_at: Instant,
}

struct PerEntryTtl;

impl Expiry<String, FastEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &FastEntry,
        _created_at: StdInstant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &FastEntry,
        _updated_at: StdInstant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// LRU cache with per-entry TTL
///
/// Entries carry their own deadline on the runtime clock, so expiry also
/// holds under a paused test clock where moka's wall clock barely moves.
pub struct FastTier {
    cache: Cache<String, FastEntry>,
    capacity: u64,
}

impl FastTier {
    /// Create tier with capacity
    pub fn new(capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .expire_after(PerEntryTtl)
            .build();

        Self { cache, capacity }
    }

    /// Live value for `key`
    #[inline]
    pub fn get(&self, key: &str) -> Option<String> {
        let entry = self.cache.get(key)?;
        if Instant::now() >= entry.expires_at {
            self.cache.invalidate(key);
            return None;
        }
        Some(entry.value)
    }

    /// Insert with a TTL; zero TTL is a no-op
    #[inline]
    pub fn insert(&self, key: &str, value: String, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let ttl = ttl.min(MAX_ENTRY_TTL);
        self.cache.insert(
            key.to_string(),
            FastEntry {
                value,
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drop `key`
    pub fn invalidate(&self, key: &str) {
        self.cache.invalidate(key);
    }

    /// Drop everything
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate entry count
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.cache.entry_count() == 0
    }

    /// Configured capacity
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

impl Default for FastTier {
    fn default() -> Self {
        Self::new(65536)
    }
}
