//! Durable key-value tier

use crate::{CacheResult, MAX_ENTRY_TTL};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Value read from the durable tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    /// Serialized payload
    pub value: String,
    /// Remaining lifetime, if the store tracks one
    pub expires_in: Option<Duration>,
}

/// Persistent key-value store with per-key expiry
///
/// Implementations must be safe for concurrent use; keys are independent.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read a live value
    async fn get(&self, key: &str) -> CacheResult<Option<StoredValue>>;

    /// Write a value that expires after `ttl`
    async fn put(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;

    /// Remove a value
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Reclaim expired entries, returning how many were dropped.
    ///
    /// Stores that expire keys on their own can keep the default.
    async fn purge_expired(&self) -> CacheResult<usize> {
        Ok(0)
    }
}

/// In-memory durable tier, expiring on read
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries currently held, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<StoredValue>> {
        let now = Instant::now();
        let live = self.entries.get(key).and_then(|entry| {
            let (value, expires_at) = entry.value();
            (*expires_at > now).then(|| StoredValue {
                value: value.clone(),
                expires_in: Some(*expires_at - now),
            })
        });
        if live.is_none() {
            self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        }
        Ok(live)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let expires_at = Instant::now() + ttl.min(MAX_ENTRY_TTL);
        self.entries.insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> CacheResult<usize> {
        let now = Instant::now();
        let mut purged = 0;
        self.entries.retain(|_, (_, expires_at)| {
            let live = *expires_at > now;
            purged += usize::from(!live);
            live
        });
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_expiry() {
        let store = MemoryStore::new();
        store.put("k", "v".into(), Duration::from_secs(10)).await.unwrap();

        let hit = store.get("k").await.unwrap().unwrap();
        assert_eq!(hit.value, "v");
        assert_eq!(hit.expires_in, Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(4)).await;
        let hit = store.get("k").await.unwrap().unwrap();
        assert_eq!(hit.expires_in, Some(Duration::from_secs(6)));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_and_delete() {
        let store = MemoryStore::new();
        store.put("a", "1".into(), Duration::from_secs(1)).await.unwrap();
        store.put("b", "2".into(), Duration::from_secs(100)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        store.delete("b").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_is_capped() {
        let store = MemoryStore::new();
        store.put("k", "v".into(), Duration::MAX).await.unwrap();

        let hit = store.get("k").await.unwrap().unwrap();
        assert_eq!(hit.value, "v");
        assert_eq!(hit.expires_in, Some(MAX_ENTRY_TTL));
    }
}
