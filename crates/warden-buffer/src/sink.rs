//! Batch delivery
//!
//! Pushes buffered telemetry batches to the control API.

use crate::item::Batch;
use crate::{DeliveryError, DeliveryResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Destination for flushed batches
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Deliver one batch for `channel`
    async fn deliver(&self, channel: &str, batch: &Batch) -> DeliveryResult<()>;
}

/// Delivery counters
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct SinkStats {
    pub batches_sent: AtomicU64,
    pub entries_sent: AtomicU64,
    pub failed_batches: AtomicU64,
}

/// Posts batches as JSON to `{base_url}/{channel}/batch` with bearer auth
pub struct HttpBatchSink {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    stats: SinkStats,
}

impl HttpBatchSink {
    /// Create sink; `timeout` bounds each request
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> DeliveryResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            stats: SinkStats::default(),
        })
    }

    /// Delivery counters
    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }

    fn endpoint(&self, channel: &str) -> String {
        format!("{}/{}/batch", self.base_url, channel)
    }
}

#[async_trait]
impl BatchSink for HttpBatchSink {
    async fn deliver(&self, channel: &str, batch: &Batch) -> DeliveryResult<()> {
        let api_key = self.api_key.as_ref().ok_or(DeliveryError::NotConfigured)?;

        let response = self
            .client
            .post(self.endpoint(channel))
            .bearer_auth(api_key)
            .json(batch)
            .send()
            .await
            .map_err(|e| {
                self.stats.failed_batches.fetch_add(1, Ordering::Relaxed);
                if e.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            self.stats.batches_sent.fetch_add(1, Ordering::Relaxed);
            self.stats
                .entries_sent
                .fetch_add(batch.count as u64, Ordering::Relaxed);
            debug!(channel, count = batch.count, "Batch delivered");
            Ok(())
        } else {
            self.stats.failed_batches.fetch_add(1, Ordering::Relaxed);
            let body = response.text().await.unwrap_or_default();
            Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}
