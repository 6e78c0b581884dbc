//! The `log` and `metrics` channels, run together

use crate::channel::{BufferChannel, ChannelConfig, ChannelStatus, FlushOutcome};
use crate::sink::BatchSink;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Status of every channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferSetStatus {
    /// Log channel
    pub log: ChannelStatus,
    /// Metrics channel
    pub metrics: ChannelStatus,
}

/// Owns both telemetry channels and their flush schedulers
pub struct BufferSet {
    log: Arc<BufferChannel>,
    metrics: Arc<BufferChannel>,
    schedulers: Mutex<Vec<JoinHandle<()>>>,
}

impl BufferSet {
    /// Create both channels over one sink
    pub fn new(log: ChannelConfig, metrics: ChannelConfig, sink: Arc<dyn BatchSink>) -> Self {
        Self {
            log: Arc::new(BufferChannel::new(log, Arc::clone(&sink))),
            metrics: Arc::new(BufferChannel::new(metrics, sink)),
            schedulers: Mutex::new(Vec::new()),
        }
    }

    /// Start the flush schedulers; idempotent
    pub fn start(&self) {
        let mut schedulers = self.schedulers.lock();
        if !schedulers.is_empty() {
            return;
        }
        schedulers.push(self.log.spawn_scheduler());
        schedulers.push(self.metrics.spawn_scheduler());
    }

    /// Log channel
    pub fn log(&self) -> &Arc<BufferChannel> {
        &self.log
    }

    /// Metrics channel
    pub fn metrics(&self) -> &Arc<BufferChannel> {
        &self.metrics
    }

    /// Queue a log event
    pub fn add_log(&self, data: Value) {
        self.log.add_item(data);
    }

    /// Queue a metrics event
    pub fn add_metrics(&self, data: Value) {
        self.metrics.add_item(data);
    }

    /// Status of both channels
    pub fn status(&self) -> BufferSetStatus {
        BufferSetStatus {
            log: self.log.status(),
            metrics: self.metrics.status(),
        }
    }

    /// Stop the schedulers and make one final flush per channel
    pub async fn shutdown(&self) -> (FlushOutcome, FlushOutcome) {
        let handles: Vec<_> = self.schedulers.lock().drain(..).collect();
        for handle in handles {
            handle.abort();
        }
        self.log.cancel();
        self.metrics.cancel();

        let log = self.log.flush_now().await;
        let metrics = self.metrics.flush_now().await;
        info!(?log, ?metrics, "Buffers flushed on shutdown");
        (log, metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::HttpBatchSink;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_channels_post_to_their_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/log/batch"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/metrics/batch"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = Arc::new(
            HttpBatchSink::new(&server.uri(), Some("key".into()), Duration::from_secs(5)).unwrap(),
        );
        let set = BufferSet::new(ChannelConfig::log(), ChannelConfig::metrics(), sink);
        set.start();

        set.add_log(json!({"event": "request"}));
        set.add_metrics(json!({"remediation": "block"}));

        let status = set.status();
        assert_eq!(status.log.size, 1);
        assert_eq!(status.metrics.size, 1);
        assert!(status.log.is_flushing);

        let (log, metrics) = set.shutdown().await;
        assert_eq!(log, FlushOutcome::Delivered(1));
        assert_eq!(metrics, FlushOutcome::Delivered(1));
    }

    #[test]
    fn test_status_wire_format() {
        let status = ChannelStatus {
            channel: "log".into(),
            size: 2,
            count: 3,
            is_flushing: true,
        };
        let encoded = serde_json::to_value(&status).unwrap();
        assert_eq!(encoded, json!({"type": "log", "size": 2, "count": 3, "isFlushing": true}));
    }
}
