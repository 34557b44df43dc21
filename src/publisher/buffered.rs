//! Buffered event publisher.
//!
//! Capture callbacks push into a bounded queue and return immediately. A
//! single worker thread owns the store connection, batches queued events and
//! writes them out on a time or size trigger.

use super::stats::{PublisherStats, SharedPublisherStats};
use crate::collector::{EventSink, QueuedEvent};
use crate::store::{Bucket, BucketStatus, EventStore, StoreError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Publisher tuning and target bucket.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub bucket_id: String,
    pub bucket_type: String,
    /// Client name registered with the bucket
    pub client_name: String,
    pub hostname: String,
    /// Maximum number of queued events; further events are dropped
    pub queue_capacity: usize,
    /// How long the worker waits for a new event per cycle
    pub poll_interval: Duration,
    /// Flush when this much time has passed since the last flush
    pub flush_interval: Duration,
    /// Flush when the batch reaches this size
    pub batch_size: usize,
    /// How long `stop` waits for the worker's final flush
    pub join_timeout: Duration,
}

impl PublisherConfig {
    pub fn new(bucket_id: impl Into<String>) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            bucket_type: "uia.event".to_string(),
            client_name: "aw-watcher-uia".to_string(),
            hostname: super::local_hostname(),
            queue_capacity: 10_000,
            poll_interval: Duration::from_millis(500),
            flush_interval: Duration::from_secs(1),
            batch_size: 200,
            join_timeout: Duration::from_secs(2),
        }
    }

    pub fn bucket(&self) -> Bucket {
        Bucket {
            id: self.bucket_id.clone(),
            bucket_type: self.bucket_type.clone(),
            client: self.client_name.clone(),
            hostname: self.hostname.clone(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self::new(super::default_bucket_id())
    }
}

/// Errors that can occur when starting the publisher.
#[derive(Debug, thiserror::Error)]
pub enum PublisherError {
    #[error("publisher is already running")]
    AlreadyRunning,
    #[error("publisher store is unavailable after an abandoned shutdown")]
    StoreLost,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to spawn publisher worker: {0}")]
    Spawn(String),
}

/// How a call to [`BufferedPublisher::stop`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker flushed what it had and exited
    Stopped,
    /// The worker did not finish within the join timeout and was abandoned;
    /// events it still held may be lost
    TimedOut,
    /// There was no worker to stop
    NotRunning,
}

/// Producer side of the publisher, cheap to clone into capture threads.
#[derive(Debug, Clone)]
pub struct PublisherHandle {
    sender: Sender<QueuedEvent>,
    stats: SharedPublisherStats,
}

impl PublisherHandle {
    /// Enqueue an event without blocking. Drops it if the queue is full.
    pub fn publish(&self, event: QueuedEvent) {
        offer(&self.sender, &self.stats, event);
    }
}

impl EventSink for PublisherHandle {
    fn publish(&self, event: QueuedEvent) {
        PublisherHandle::publish(self, event);
    }
}

fn offer(sender: &Sender<QueuedEvent>, stats: &PublisherStats, event: QueuedEvent) {
    match sender.try_send(event) {
        Ok(()) => stats.record_enqueued(),
        Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
            let dropped = stats.record_dropped();
            trace!(dropped, "publisher queue full, event dropped");
            if dropped.is_power_of_two() {
                debug!(dropped, "publisher queue saturated");
            }
        }
    }
}

struct Worker<S> {
    handle: JoinHandle<S>,
    done: Receiver<()>,
}

/// Bounded-queue publisher with a single flushing worker.
pub struct BufferedPublisher<S: EventStore + 'static> {
    config: PublisherConfig,
    store: Option<S>,
    sender: Sender<QueuedEvent>,
    receiver: Receiver<QueuedEvent>,
    running: Arc<AtomicBool>,
    worker: Option<Worker<S>>,
    stats: SharedPublisherStats,
}

impl<S: EventStore + 'static> BufferedPublisher<S> {
    /// Create a publisher. Nothing is sent until [`start`](Self::start).
    pub fn new(store: S, config: PublisherConfig) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity);

        Self {
            config,
            store: Some(store),
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            stats: Arc::new(PublisherStats::new()),
        }
    }

    /// Connect to the store, make sure the bucket exists and start the
    /// worker.
    ///
    /// Fails if the store is unreachable. A bucket that already exists is not
    /// an error, and other bucket-creation failures are only logged.
    pub fn start(&mut self) -> Result<(), PublisherError> {
        if self.worker.is_some() {
            return Err(PublisherError::AlreadyRunning);
        }
        let store = self.store.take().ok_or(PublisherError::StoreLost)?;

        if let Err(e) = store.connect() {
            self.store = Some(store);
            return Err(e.into());
        }

        let bucket = self.config.bucket();
        match store.ensure_bucket(&bucket) {
            Ok(BucketStatus::Created) => info!(bucket = %bucket.id, "created bucket"),
            Ok(BucketStatus::AlreadyExists) => debug!(bucket = %bucket.id, "bucket already exists"),
            Err(e) => warn!(bucket = %bucket.id, error = %e, "could not create bucket"),
        }

        self.running.store(true, Ordering::SeqCst);

        let flusher = Flusher {
            store,
            receiver: self.receiver.clone(),
            running: self.running.clone(),
            stats: self.stats.clone(),
            bucket_id: bucket.id,
            poll_interval: self.config.poll_interval,
            flush_interval: self.config.flush_interval,
            batch_size: self.config.batch_size.max(1),
        };
        let (done_tx, done_rx) = bounded(1);

        let handle = thread::Builder::new()
            .name("event-publisher".to_string())
            .spawn(move || {
                let store = flusher.run();
                let _ = done_tx.send(());
                store
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                PublisherError::Spawn(e.to_string())
            })?;

        self.worker = Some(Worker {
            handle,
            done: done_rx,
        });
        info!(
            bucket = %self.config.bucket_id,
            capacity = self.config.queue_capacity,
            "publisher started"
        );
        Ok(())
    }

    /// Enqueue an event without blocking. Drops it if the queue is full.
    pub fn publish(&self, event: QueuedEvent) {
        offer(&self.sender, &self.stats, event);
    }

    /// Producer handle for capture threads.
    pub fn handle(&self) -> PublisherHandle {
        PublisherHandle {
            sender: self.sender.clone(),
            stats: self.stats.clone(),
        }
    }

    /// Signal the worker, wait up to the join timeout for its final flush.
    pub fn stop(&mut self) -> StopOutcome {
        let Some(worker) = self.worker.take() else {
            return StopOutcome::NotRunning;
        };
        self.running.store(false, Ordering::SeqCst);

        match worker.done.recv_timeout(self.config.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                match worker.handle.join() {
                    Ok(store) => self.store = Some(store),
                    Err(_) => warn!("publisher worker panicked"),
                }
                info!("publisher stopped");
                StopOutcome::Stopped
            }
            Err(RecvTimeoutError::Timeout) => {
                // The thread is detached and keeps whatever it still holds.
                warn!(
                    timeout_ms = self.config.join_timeout.as_millis() as u64,
                    "publisher worker did not finish in time, abandoning it"
                );
                StopOutcome::TimedOut
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Number of events waiting in the queue.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    pub fn stats(&self) -> &SharedPublisherStats {
        &self.stats
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }
}

impl<S: EventStore + 'static> Drop for BufferedPublisher<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the worker thread.
struct Flusher<S> {
    store: S,
    receiver: Receiver<QueuedEvent>,
    running: Arc<AtomicBool>,
    stats: SharedPublisherStats,
    bucket_id: String,
    poll_interval: Duration,
    flush_interval: Duration,
    batch_size: usize,
}

impl<S: EventStore> Flusher<S> {
    fn run(self) -> S {
        let mut batch: Vec<QueuedEvent> = Vec::with_capacity(self.batch_size);
        let mut last_flush = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            match self.receiver.recv_timeout(self.poll_interval) {
                Ok(event) => batch.push(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if !batch.is_empty()
                && (last_flush.elapsed() >= self.flush_interval || batch.len() >= self.batch_size)
            {
                self.flush(&mut batch);
                last_flush = Instant::now();
            }
        }

        // Drain what was queued when stop was signalled, then flush the rest.
        let pending = self.receiver.len();
        for _ in 0..pending {
            let Ok(event) = self.receiver.try_recv() else {
                break;
            };
            batch.push(event);
            if batch.len() >= self.batch_size {
                self.flush(&mut batch);
            }
        }
        if !batch.is_empty() {
            self.flush(&mut batch);
        }

        self.store
    }

    /// Write the batch and clear it. A failed batch is dropped.
    fn flush(&self, batch: &mut Vec<QueuedEvent>) {
        let count = batch.len() as u64;
        match self.store.insert_events(&self.bucket_id, batch) {
            Ok(()) => {
                self.stats.record_flush(count);
                debug!(bucket = %self.bucket_id, events = count, "flushed batch");
            }
            Err(e) => {
                self.stats.record_failed_batch();
                warn!(bucket = %self.bucket_id, events = count, error = %e, "batch write failed, dropping batch");
            }
        }
        batch.clear();
    }
}
