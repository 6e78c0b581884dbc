//! Warden Buffer - batched telemetry delivery
//!
//! Requests hand one event to a channel and move on. Each channel keeps a
//! bounded FIFO and a flush timer; when the timer fires the whole buffer is
//! posted as one batch. Failed batches are retried on the next tick until an
//! item reaches the channel's retry limit, then it is dropped.
//!
//! Channels are independent: `log` and `metrics` flush on their own
//! schedules and never wait on each other.

#![warn(missing_docs)]

pub mod channel;
pub mod item;
pub mod queue;
pub mod set;
pub mod sink;

pub use channel::{BufferChannel, ChannelConfig, ChannelStats, ChannelStatus, FlushOutcome};
pub use item::{Batch, BufferItem, ItemStore, MemoryItemStore};
pub use queue::BackgroundQueue;
pub use set::{BufferSet, BufferSetStatus};
pub use sink::{BatchSink, HttpBatchSink, SinkStats};

use thiserror::Error;

/// Batch delivery errors
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Endpoint answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// Connection or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Request exceeded its deadline
    #[error("delivery timed out")]
    Timeout,

    /// No API key configured
    #[error("batch endpoint not configured")]
    NotConfigured,

    /// Batch could not be encoded
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for delivery
pub type DeliveryResult<T> = Result<T, DeliveryError>;
