//! One telemetry channel and its flush timer
//!
//! ```text
//!  add_item ──► [evict oldest if full] ──► store ──► arm timer
//!                                                       │
//!  scheduler task ◄─────────── Notify ──────────────────┘
//!       │ deadline reached
//!       ▼
//!  on_flush_timer ──► snapshot ──► sink.deliver (no lock held)
//!       │ ok: delete delivered, re-arm (interval | health horizon)
//!       │ err: retry_count += 1, drop at max, re-arm interval
//! ```

use crate::item::{Batch, BufferItem, ItemStore, MemoryItemStore};
use crate::sink::BatchSink;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};
use warden_common::{AtomicCounter, Timestamp};

/// Per-channel batching policy
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Channel name, also the API path segment
    pub name: String,
    /// Delay between an arming event and the flush
    pub flush_interval: Duration,
    /// Failed deliveries after which an item is dropped
    pub max_retries: u32,
    /// Most items held at once
    pub max_size: usize,
    /// Timer armed after a flush that left the channel empty
    pub health_check: Duration,
}

impl ChannelConfig {
    /// Defaults for the `log` channel
    pub fn log() -> Self {
        Self {
            name: "log".to_string(),
            flush_interval: Duration::from_secs(5),
            max_retries: 2,
            max_size: 2000,
            health_check: Duration::from_secs(60),
        }
    }

    /// Defaults for the `metrics` channel
    pub fn metrics() -> Self {
        Self {
            name: "metrics".to_string(),
            flush_interval: Duration::from_secs(10),
            max_retries: 5,
            max_size: 1000,
            health_check: Duration::from_secs(60),
        }
    }
}

/// Snapshot reported by [`BufferChannel::status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    /// Channel name
    #[serde(rename = "type")]
    pub channel: String,
    /// Items held
    pub size: usize,
    /// Items queued since the channel last drained
    pub count: u64,
    /// True iff a flush is armed
    pub is_flushing: bool,
}

/// Result of one flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered
    Empty,
    /// Batch accepted by the sink
    Delivered(usize),
    /// Batch rejected; some items kept for retry, some dropped
    Failed {
        /// Items re-persisted with a higher retry count
        retained: usize,
        /// Items that reached the retry limit
        dropped: usize,
    },
}

/// Channel counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct ChannelStats {
    pub delivered: u64,
    pub dropped: u64,
    pub evicted: u64,
    pub failed_flushes: u64,
}

struct ChannelState {
    store: Box<dyn ItemStore>,
    next_seq: u64,
    count: u64,
    alarm: Option<Instant>,
}

/// Bounded FIFO of telemetry items, flushed in batches on a timer
///
/// Every mutation runs under one short-lived lock; delivery runs without it.
pub struct BufferChannel {
    config: ChannelConfig,
    state: Mutex<ChannelState>,
    sink: Arc<dyn BatchSink>,
    /// Serializes flushes so two deliveries never overlap
    flush_gate: tokio::sync::Mutex<()>,
    wake: Notify,

    delivered: AtomicCounter,
    dropped: AtomicCounter,
    evicted: AtomicCounter,
    failed_flushes: AtomicCounter,
}

impl BufferChannel {
    /// Create channel with in-memory storage
    pub fn new(config: ChannelConfig, sink: Arc<dyn BatchSink>) -> Self {
        Self::with_store(config, sink, Box::new(MemoryItemStore::new()))
    }

    /// Create channel over existing storage
    ///
    /// Sequence numbers continue after the newest stored key, and a flush is
    /// armed if anything is already waiting.
    pub fn with_store(
        config: ChannelConfig,
        sink: Arc<dyn BatchSink>,
        store: Box<dyn ItemStore>,
    ) -> Self {
        let next_seq = store.newest().map_or(0, |seq| seq + 1);
        let alarm = (!store.is_empty()).then(|| Instant::now() + config.flush_interval);
        let count = store.len() as u64;

        Self {
            config,
            state: Mutex::new(ChannelState {
                store,
                next_seq,
                count,
                alarm,
            }),
            sink,
            flush_gate: tokio::sync::Mutex::new(()),
            wake: Notify::new(),
            delivered: AtomicCounter::new(0),
            dropped: AtomicCounter::new(0),
            evicted: AtomicCounter::new(0),
            failed_flushes: AtomicCounter::new(0),
        }
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Batching policy
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Queue one payload; never blocks on delivery
    pub fn add_item(&self, data: Value) {
        let interval = self.config.flush_interval;
        let max_size = self.config.max_size.max(1);

        let rearmed = {
            let mut state = self.state.lock();

            while state.store.len() >= max_size {
                let Some(oldest) = state.store.oldest() else {
                    break;
                };
                state.store.delete(oldest);
                self.evicted.inc();
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.count += 1;
            state.store.put(seq, BufferItem::new(data));

            let now = Instant::now();
            let rearm = match state.alarm {
                None => true,
                Some(at) => at > now + interval * 2,
            };
            if rearm {
                state.alarm = Some(now + interval);
            }
            rearm
        };

        if rearmed {
            self.wake.notify_one();
        }
    }

    /// Flush everything currently buffered.
    ///
    /// Delivery failures are contained here; they only show up in the
    /// returned outcome and the channel counters.
    pub async fn on_flush_timer(&self) -> FlushOutcome {
        let _gate = self.flush_gate.lock().await;

        let items = {
            let mut state = self.state.lock();
            let items = state.store.list();
            if items.is_empty() {
                state.count = 0;
                return FlushOutcome::Empty;
            }
            items
        };

        let batch = Batch::new(items.iter().map(|(_, item)| item.data.clone()).collect());
        let result = self.sink.deliver(&self.config.name, &batch).await;

        let outcome = {
            let mut state = self.state.lock();
            let now = Instant::now();

            match result {
                Ok(()) => {
                    for (seq, _) in &items {
                        state.store.delete(*seq);
                    }
                    self.delivered.add(items.len() as u64);

                    if state.store.is_empty() {
                        state.count = 0;
                        state.alarm = Some(now + self.config.health_check);
                    } else {
                        state.alarm = Some(now + self.config.flush_interval);
                    }
                    FlushOutcome::Delivered(items.len())
                }
                Err(e) => {
                    self.failed_flushes.inc();
                    let mut retained = 0;
                    let mut dropped = 0;

                    // Items evicted while the batch was in flight stay gone
                    for (seq, _) in &items {
                        let Some(mut item) = state.store.delete(*seq) else {
                            continue;
                        };
                        item.retry_count += 1;
                        if item.retry_count < self.config.max_retries {
                            item.timestamp = Timestamp::now().as_millis();
                            state.store.put(*seq, item);
                            retained += 1;
                        } else {
                            dropped += 1;
                        }
                    }
                    self.dropped.add(dropped as u64);
                    state.alarm = Some(now + self.config.flush_interval);

                    warn!(
                        channel = %self.config.name,
                        error = %e,
                        batch = items.len(),
                        retained,
                        dropped,
                        "Batch delivery failed"
                    );
                    FlushOutcome::Failed { retained, dropped }
                }
            }
        };

        self.wake.notify_one();
        outcome
    }

    /// Flush immediately, ignoring the timer
    pub async fn flush_now(&self) -> FlushOutcome {
        self.state.lock().alarm = None;
        self.on_flush_timer().await
    }

    /// Disarm the timer
    pub fn cancel(&self) {
        self.state.lock().alarm = None;
        self.wake.notify_one();
    }

    /// Current deadline, if armed
    pub fn armed_at(&self) -> Option<Instant> {
        self.state.lock().alarm
    }

    /// Size, queued count and timer state
    pub fn status(&self) -> ChannelStatus {
        let state = self.state.lock();
        ChannelStatus {
            channel: self.config.name.clone(),
            size: state.store.len(),
            count: state.count,
            is_flushing: state.alarm.is_some(),
        }
    }

    /// Retry counts of buffered items, oldest first
    pub fn retry_counts(&self) -> Vec<u32> {
        self.state
            .lock()
            .store
            .list()
            .into_iter()
            .map(|(_, item)| item.retry_count)
            .collect()
    }

    /// Channel counters
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            delivered: self.delivered.get(),
            dropped: self.dropped.get(),
            evicted: self.evicted.get(),
            failed_flushes: self.failed_flushes.get(),
        }
    }

    /// Disarm and return true if the deadline has passed
    fn take_due_alarm(&self) -> bool {
        let mut state = self.state.lock();
        match state.alarm {
            Some(at) if at <= Instant::now() => {
                state.alarm = None;
                true
            }
            _ => false,
        }
    }

    /// Spawn the task that fires this channel's timer
    pub fn spawn_scheduler(self: &Arc<Self>) -> JoinHandle<()> {
        let channel = Arc::clone(self);
        tokio::spawn(async move {
            debug!(channel = %channel.config.name, "Flush scheduler started");
            loop {
                let alarm = channel.state.lock().alarm;
                match alarm {
                    Some(at) => {
                        tokio::select! {
                            _ = sleep_until(at) => {
                                if channel.take_due_alarm() {
                                    channel.on_flush_timer().await;
                                }
                            }
                            _ = channel.wake.notified() => {}
                        }
                    }
                    None => channel.wake.notified().await,
                }
            }
        })
    }
}

impl std::fmt::Debug for BufferChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferChannel")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeliveryError, DeliveryResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        fail: AtomicBool,
        batches: Mutex<Vec<Batch>>,
    }

    impl RecordingSink {
        fn failing() -> Self {
            let sink = Self::default();
            sink.fail.store(true, Ordering::SeqCst);
            sink
        }

        fn batches(&self) -> Vec<Batch> {
            self.batches.lock().clone()
        }
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn deliver(&self, _channel: &str, batch: &Batch) -> DeliveryResult<()> {
            self.batches.lock().push(batch.clone());
            if self.fail.load(Ordering::SeqCst) {
                Err(DeliveryError::Status {
                    status: 500,
                    body: String::new(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn config(max_size: usize, max_retries: u32) -> ChannelConfig {
        ChannelConfig {
            name: "test".into(),
            flush_interval: Duration::from_secs(5),
            max_retries,
            max_size,
            health_check: Duration::from_secs(60),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_fifo_eviction() {
        let sink = Arc::new(RecordingSink::default());
        let channel = BufferChannel::new(config(3, 2), sink.clone());

        for i in 0..4 {
            channel.add_item(json!(i));
        }
        assert_eq!(channel.status().size, 3);
        assert_eq!(channel.stats().evicted, 1);

        assert_eq!(channel.flush_now().await, FlushOutcome::Delivered(3));
        assert_eq!(sink.batches()[0].entries, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arming_rules() {
        let channel = BufferChannel::new(config(10, 2), Arc::new(RecordingSink::default()));
        assert!(!channel.status().is_flushing);

        let start = Instant::now();
        channel.add_item(json!(1));
        assert_eq!(channel.armed_at(), Some(start + Duration::from_secs(5)));

        // An armed timer within 2x the interval is left alone
        tokio::time::advance(Duration::from_secs(2)).await;
        channel.add_item(json!(2));
        assert_eq!(channel.armed_at(), Some(start + Duration::from_secs(5)));

        // A far-off health timer is pulled in
        channel.state.lock().alarm = Some(Instant::now() + Duration::from_secs(60));
        channel.add_item(json!(3));
        assert_eq!(
            channel.armed_at(),
            Some(Instant::now() + Duration::from_secs(5))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_arms_health_check() {
        let channel = BufferChannel::new(config(10, 2), Arc::new(RecordingSink::default()));
        channel.add_item(json!("a"));
        channel.add_item(json!("b"));
        assert_eq!(channel.status().count, 2);

        assert_eq!(channel.flush_now().await, FlushOutcome::Delivered(2));
        let status = channel.status();
        assert_eq!(status.size, 0);
        assert_eq!(status.count, 0);
        assert!(status.is_flushing);
        assert_eq!(
            channel.armed_at(),
            Some(Instant::now() + Duration::from_secs(60))
        );

        // Health timer fires on an empty channel and disarms
        assert_eq!(channel.flush_now().await, FlushOutcome::Empty);
        assert!(!channel.status().is_flushing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_increments_and_drops_at_cap() {
        let sink = Arc::new(RecordingSink::failing());
        let channel = BufferChannel::new(config(10, 2), sink.clone());
        channel.add_item(json!("a"));
        channel.add_item(json!("b"));

        let outcome = channel.flush_now().await;
        assert_eq!(outcome, FlushOutcome::Failed { retained: 2, dropped: 0 });
        assert_eq!(channel.retry_counts(), vec![1, 1]);
        assert_eq!(
            channel.armed_at(),
            Some(Instant::now() + Duration::from_secs(5))
        );

        channel.add_item(json!("c"));
        let outcome = channel.flush_now().await;
        assert_eq!(outcome, FlushOutcome::Failed { retained: 1, dropped: 2 });
        assert_eq!(channel.retry_counts(), vec![1]);

        sink.fail.store(false, Ordering::SeqCst);
        assert_eq!(channel.flush_now().await, FlushOutcome::Delivered(1));
        let batches = sink.batches();
        assert_eq!(batches[2].entries, vec![json!("c")]);
        assert_eq!(channel.stats().dropped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_flushes_on_timer() {
        let sink = Arc::new(RecordingSink::default());
        let channel = Arc::new(BufferChannel::new(config(10, 2), sink.clone()));
        let handle = channel.spawn_scheduler();

        channel.add_item(json!(1));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(sink.batches().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.batches().len(), 1);
        assert_eq!(channel.status().size, 0);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_retries_failed_batches() {
        let sink = Arc::new(RecordingSink::failing());
        let channel = Arc::new(BufferChannel::new(config(10, 3), sink.clone()));
        let handle = channel.spawn_scheduler();

        channel.add_item(json!(1));
        tokio::time::sleep(Duration::from_secs(16)).await;

        // Flushes at 5s, 10s and 15s; the third failure reaches the cap
        assert_eq!(sink.batches().len(), 3);
        assert_eq!(channel.status().size, 0);
        assert_eq!(channel.stats().dropped, 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_restores_sequence_from_store() {
        let mut store = MemoryItemStore::new();
        store.put(41, BufferItem::new(json!("old")));
        let sink = Arc::new(RecordingSink::default());
        let channel = BufferChannel::with_store(config(10, 2), sink.clone(), Box::new(store));

        assert!(channel.status().is_flushing);
        channel.add_item(json!("new"));
        channel.flush_now().await;
        assert_eq!(sink.batches()[0].entries, vec![json!("old"), json!("new")]);
    }
}
