//! Buffered items and their storage

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use warden_common::Timestamp;

/// One telemetry event waiting for delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferItem {
    /// Opaque payload
    pub data: Value,
    /// Milliseconds since the epoch when the item was (re)persisted
    pub timestamp: u64,
    /// Failed deliveries so far
    pub retry_count: u32,
}

impl BufferItem {
    /// Wrap a payload
    pub fn new(data: Value) -> Self {
        Self {
            data,
            timestamp: Timestamp::now().as_millis(),
            retry_count: 0,
        }
    }
}

/// Batch body posted to `{api}/{channel}/batch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Payloads in insertion order
    pub entries: Vec<Value>,
    /// Number of entries
    pub count: usize,
    /// RFC 3339 build time
    pub timestamp: String,
}

impl Batch {
    /// Build a batch stamped with the current time
    pub fn new(entries: Vec<Value>) -> Self {
        Self {
            count: entries.len(),
            entries,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Persistent storage for one channel, keyed by sequence number
///
/// Keys are handed out in increasing order, so key order is insertion order.
pub trait ItemStore: Send {
    /// Store an item under `seq`
    fn put(&mut self, seq: u64, item: BufferItem);

    /// Remove and return an item
    fn delete(&mut self, seq: u64) -> Option<BufferItem>;

    /// Lowest key present
    fn oldest(&self) -> Option<u64>;

    /// Highest key present
    fn newest(&self) -> Option<u64>;

    /// All items in key order
    fn list(&self) -> Vec<(u64, BufferItem)>;

    /// Number of items
    fn len(&self) -> usize;

    /// True if nothing is stored
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory ordered store
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    items: BTreeMap<u64, BufferItem>,
}

impl MemoryItemStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl ItemStore for MemoryItemStore {
    fn put(&mut self, seq: u64, item: BufferItem) {
        self.items.insert(seq, item);
    }

    fn delete(&mut self, seq: u64) -> Option<BufferItem> {
        self.items.remove(&seq)
    }

    fn oldest(&self) -> Option<u64> {
        self.items.keys().next().copied()
    }

    fn newest(&self) -> Option<u64> {
        self.items.keys().next_back().copied()
    }

    fn list(&self) -> Vec<(u64, BufferItem)> {
        self.items
            .iter()
            .map(|(seq, item)| (*seq, item.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_store_order() {
        let mut store = MemoryItemStore::new();
        store.put(3, BufferItem::new(json!("c")));
        store.put(1, BufferItem::new(json!("a")));
        store.put(2, BufferItem::new(json!("b")));

        assert_eq!(store.oldest(), Some(1));
        assert_eq!(store.newest(), Some(3));
        let data: Vec<_> = store.list().into_iter().map(|(_, i)| i.data).collect();
        assert_eq!(data, vec![json!("a"), json!("b"), json!("c")]);

        assert!(store.delete(1).is_some());
        assert!(store.delete(1).is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_item_wire_format() {
        let item = BufferItem::new(json!({"k": 1}));
        let encoded = serde_json::to_value(&item).unwrap();
        assert_eq!(encoded["retryCount"], 0);
        assert!(encoded["timestamp"].as_u64().unwrap() > 0);

        let batch = Batch::new(vec![json!(1), json!(2)]);
        let encoded = serde_json::to_value(&batch).unwrap();
        assert_eq!(encoded["count"], 2);
        assert_eq!(encoded["entries"], json!([1, 2]));
        assert!(encoded["timestamp"].as_str().unwrap().ends_with('Z'));
    }
}
