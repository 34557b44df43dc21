//! In-process event store.
//!
//! Clones share the same state, so one handle can be moved into a publisher
//! while another inspects what was written. Faults can be injected to
//! exercise the recovery paths.

use super::{Bucket, BucketMetadata, BucketStatus, EventStore, StoreError, StoredEvent};
use crate::collector::QueuedEvent;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct MemoryBucket {
    metadata: BucketMetadata,
    events: Vec<StoredEvent>,
}

#[derive(Debug)]
struct Inner {
    buckets: BTreeMap<String, MemoryBucket>,
    reachable: bool,
    fail_inserts: bool,
    failing_queries: HashSet<String>,
    insert_calls: usize,
}

/// Shared in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                buckets: BTreeMap::new(),
                reachable: true,
                fail_inserts: false,
                failing_queries: HashSet::new(),
                insert_calls: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not poison the store for the others.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulate the server going away or coming back.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Make every insert fail.
    pub fn fail_inserts(&self, fail: bool) {
        self.lock().fail_inserts = fail;
    }

    /// Make queries against one bucket fail.
    pub fn fail_queries_for(&self, bucket_id: &str) {
        self.lock().failing_queries.insert(bucket_id.to_string());
    }

    /// Create a bucket directly, bypassing the publisher.
    pub fn add_bucket(&self, bucket_id: &str, bucket_type: &str) {
        let mut inner = self.lock();
        inner
            .buckets
            .entry(bucket_id.to_string())
            .or_insert_with(|| MemoryBucket {
                metadata: BucketMetadata {
                    id: bucket_id.to_string(),
                    bucket_type: bucket_type.to_string(),
                    client: None,
                    hostname: None,
                    created: Some(Utc::now().to_rfc3339()),
                },
                events: Vec::new(),
            });
    }

    /// Append an event with a raw timestamp, as another watcher would.
    pub fn push_raw(&self, bucket_id: &str, timestamp: Option<&str>, data: Map<String, Value>) {
        self.add_bucket(bucket_id, "test");
        if let Some(bucket) = self.lock().buckets.get_mut(bucket_id) {
            bucket.events.push(StoredEvent {
                timestamp: timestamp.map(str::to_owned),
                data,
            });
        }
    }

    /// All events of a bucket in insertion order.
    pub fn events(&self, bucket_id: &str) -> Vec<StoredEvent> {
        self.lock()
            .buckets
            .get(bucket_id)
            .map(|b| b.events.clone())
            .unwrap_or_default()
    }

    pub fn event_count(&self, bucket_id: &str) -> usize {
        self.lock()
            .buckets
            .get(bucket_id)
            .map_or(0, |b| b.events.len())
    }

    /// Number of successful insert calls.
    pub fn insert_calls(&self) -> usize {
        self.lock().insert_calls
    }

    pub fn metadata(&self, bucket_id: &str) -> Option<BucketMetadata> {
        self.lock().buckets.get(bucket_id).map(|b| b.metadata.clone())
    }

    fn check_reachable(inner: &Inner) -> Result<(), StoreError> {
        if inner.reachable {
            Ok(())
        } else {
            Err(StoreError::Unreachable("memory store offline".to_string()))
        }
    }
}

impl EventStore for MemoryStore {
    fn connect(&self) -> Result<(), StoreError> {
        Self::check_reachable(&self.lock())
    }

    fn ensure_bucket(&self, bucket: &Bucket) -> Result<BucketStatus, StoreError> {
        let mut inner = self.lock();
        Self::check_reachable(&inner)?;

        if inner.buckets.contains_key(&bucket.id) {
            return Ok(BucketStatus::AlreadyExists);
        }
        inner.buckets.insert(
            bucket.id.clone(),
            MemoryBucket {
                metadata: BucketMetadata {
                    id: bucket.id.clone(),
                    bucket_type: bucket.bucket_type.clone(),
                    client: Some(bucket.client.clone()),
                    hostname: Some(bucket.hostname.clone()),
                    created: Some(Utc::now().to_rfc3339()),
                },
                events: Vec::new(),
            },
        );
        Ok(BucketStatus::Created)
    }

    fn insert_events(&self, bucket_id: &str, events: &[QueuedEvent]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        Self::check_reachable(&inner)?;
        if inner.fail_inserts {
            return Err(StoreError::Server {
                status: 500,
                message: "insert rejected".to_string(),
            });
        }

        let bucket = inner
            .buckets
            .get_mut(bucket_id)
            .ok_or_else(|| StoreError::UnknownBucket(bucket_id.to_string()))?;
        bucket.events.extend(events.iter().map(StoredEvent::from));
        inner.insert_calls += 1;
        Ok(())
    }

    fn list_buckets(&self) -> Result<BTreeMap<String, BucketMetadata>, StoreError> {
        let inner = self.lock();
        Self::check_reachable(&inner)?;
        Ok(inner
            .buckets
            .iter()
            .map(|(id, b)| (id.clone(), b.metadata.clone()))
            .collect())
    }

    fn query_events(
        &self,
        bucket_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let inner = self.lock();
        Self::check_reachable(&inner)?;
        if inner.failing_queries.contains(bucket_id) {
            return Err(StoreError::Server {
                status: 500,
                message: format!("query on {bucket_id} failed"),
            });
        }

        let bucket = inner
            .buckets
            .get(bucket_id)
            .ok_or_else(|| StoreError::UnknownBucket(bucket_id.to_string()))?;

        // Like the real server, events whose timestamp cannot be read are
        // passed through for the caller to deal with.
        Ok(bucket
            .events
            .iter()
            .filter(|e| match e.timestamp.as_deref().map(DateTime::parse_from_rfc3339) {
                Some(Ok(ts)) => {
                    let ts = ts.with_timezone(&Utc);
                    ts >= start && ts <= end
                }
                _ => true,
            })
            .cloned()
            .collect())
    }
}
