//! Warden Common - Shared types for the edge security gateway
//!
//! This crate provides the data model every other Warden crate speaks:
//! - Access rules and threat verdicts as they arrive from the control API
//! - Verdicts and decision provenance produced by the pipeline
//! - Client address helpers
//! - Lock-free counters and latency histograms
//! - Error handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod ip;
pub mod metrics;
pub mod rule;
pub mod threat;
pub mod verdict;

pub use error::*;
pub use ip::*;
pub use rule::*;
pub use threat::*;
pub use verdict::*;

use std::sync::atomic::{AtomicU64, Ordering};

/// Wall-clock timestamp in milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Current time
    #[inline(always)]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self(millis)
    }

    /// Build from a raw millisecond value
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the epoch
    #[inline(always)]
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since this timestamp (zero if it lies in the future)
    #[inline(always)]
    pub fn elapsed_millis(&self) -> u64 {
        Self::now().0.saturating_sub(self.0)
    }
}

/// Relaxed atomic counter for hot-path statistics
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create new counter
    pub const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// Increment and return previous value
    #[inline(always)]
    pub fn inc(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Add value and return previous
    #[inline(always)]
    pub fn add(&self, val: u64) -> u64 {
        self.0.fetch_add(val, Ordering::Relaxed)
    }

    /// Get current value
    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_elapsed() {
        let t1 = Timestamp::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(t1.elapsed_millis() >= 5);

        let future = Timestamp::from_millis(t1.as_millis() + 60_000);
        assert_eq!(future.elapsed_millis(), 0);
    }

    #[test]
    fn test_atomic_counter() {
        let counter = AtomicCounter::new(0);
        assert_eq!(counter.inc(), 0);
        assert_eq!(counter.add(5), 1);
        assert_eq!(counter.get(), 6);
    }
}
