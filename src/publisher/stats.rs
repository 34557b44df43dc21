//! Publisher counters.
//!
//! Updated from capture threads and the worker without locking. Drops are
//! only counted here; they never surface as errors to the capture path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live counters for one publisher.
#[derive(Debug)]
pub struct PublisherStats {
    /// Events accepted into the queue
    enqueued: AtomicU64,
    /// Events rejected because the queue was full
    dropped: AtomicU64,
    /// Events written to the store
    flushed_events: AtomicU64,
    /// Successful batch writes
    flushed_batches: AtomicU64,
    /// Batch writes that failed (their events are lost)
    failed_batches: AtomicU64,
    started_at: DateTime<Utc>,
}

impl PublisherStats {
    pub fn new() -> Self {
        Self {
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            flushed_events: AtomicU64::new(0),
            flushed_batches: AtomicU64::new(0),
            failed_batches: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the new drop total.
    pub fn record_dropped(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_flush(&self, events: u64) {
        self.flushed_events.fetch_add(events, Ordering::Relaxed);
        self.flushed_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_batch(&self) {
        self.failed_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PublisherSnapshot {
        PublisherSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            flushed_events: self.flushed_events.load(Ordering::Relaxed),
            flushed_batches: self.flushed_batches.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Publisher Statistics:\n\
             - Events queued: {}\n\
             - Events dropped (queue full): {}\n\
             - Events flushed: {} in {} batches\n\
             - Failed batches: {}\n\
             - Uptime: {} seconds",
            stats.enqueued,
            stats.dropped,
            stats.flushed_events,
            stats.flushed_batches,
            stats.failed_batches,
            stats.uptime_secs
        )
    }
}

impl Default for PublisherStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub flushed_events: u64,
    pub flushed_batches: u64,
    pub failed_batches: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Counters shared between the publisher, its handles and the worker.
pub type SharedPublisherStats = Arc<PublisherStats>;
