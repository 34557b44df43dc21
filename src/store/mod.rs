//! Event store collaborator.
//!
//! The recorder writes to and reads from a bucket-based event store
//! (ActivityWatch's server in production). [`EventStore`] is the contract;
//! [`http::HttpStore`] talks to a real server and [`memory::MemoryStore`]
//! keeps everything in process.

#[cfg(feature = "http")]
pub mod http;
pub mod memory;

use crate::collector::QueuedEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[cfg(feature = "http")]
pub use http::{HttpStore, StoreConfig};
pub use memory::MemoryStore;

/// Identity of a bucket the publisher writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub id: String,
    pub bucket_type: String,
    /// Name of the writing client
    pub client: String,
    pub hostname: String,
}

/// Result of [`EventStore::ensure_bucket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    Created,
    AlreadyExists,
}

/// Bucket metadata as listed by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub bucket_type: String,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
}

/// An event as returned by a query. The timestamp is kept raw so that
/// unparseable values can be excluded downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub timestamp: Option<String>,
    pub data: Map<String, Value>,
}

impl StoredEvent {
    /// Extract an event from an arbitrary JSON value, tolerating missing or
    /// malformed fields.
    pub fn from_value(value: &Value) -> Self {
        Self {
            timestamp: value
                .get("timestamp")
                .and_then(Value::as_str)
                .map(str::to_owned),
            data: value
                .get("data")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }
    }
}

impl From<&QueuedEvent> for StoredEvent {
    fn from(event: &QueuedEvent) -> Self {
        Self {
            timestamp: Some(event.timestamp.to_rfc3339()),
            data: event.data.clone(),
        }
    }
}

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("event store unreachable: {0}")]
    Unreachable(String),
    #[error("event store error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("event store serialization error: {0}")]
    Serialization(String),
    #[error("event store client error: {0}")]
    Client(String),
    #[error("unknown bucket: {0}")]
    UnknownBucket(String),
}

/// Bucket-based event store.
pub trait EventStore: Send {
    /// Establish a session with the store.
    fn connect(&self) -> Result<(), StoreError>;

    /// Create the bucket unless it already exists. Existing buckets are left
    /// untouched.
    fn ensure_bucket(&self, bucket: &Bucket) -> Result<BucketStatus, StoreError>;

    /// Insert a batch, preserving its order.
    fn insert_events(&self, bucket_id: &str, events: &[QueuedEvent]) -> Result<(), StoreError>;

    fn list_buckets(&self) -> Result<BTreeMap<String, BucketMetadata>, StoreError>;

    /// Events of one bucket between `start` and `end`, in no guaranteed order.
    fn query_events(
        &self,
        bucket_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StoreError>;
}

impl<S: EventStore + Sync + ?Sized> EventStore for &S {
    fn connect(&self) -> Result<(), StoreError> {
        (**self).connect()
    }

    fn ensure_bucket(&self, bucket: &Bucket) -> Result<BucketStatus, StoreError> {
        (**self).ensure_bucket(bucket)
    }

    fn insert_events(&self, bucket_id: &str, events: &[QueuedEvent]) -> Result<(), StoreError> {
        (**self).insert_events(bucket_id, events)
    }

    fn list_buckets(&self) -> Result<BTreeMap<String, BucketMetadata>, StoreError> {
        (**self).list_buckets()
    }

    fn query_events(
        &self,
        bucket_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        (**self).query_events(bucket_id, start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stored_event_from_value() {
        let value = json!({
            "id": 7,
            "timestamp": "2024-05-02T12:00:00.250000+00:00",
            "duration": 0.0,
            "data": {"app": "chrome.exe", "title": "Docs"}
        });
        let event = StoredEvent::from_value(&value);
        assert_eq!(
            event.timestamp.as_deref(),
            Some("2024-05-02T12:00:00.250000+00:00")
        );
        assert_eq!(event.data["app"], "chrome.exe");
    }

    #[test]
    fn test_stored_event_tolerates_bad_shape() {
        let event = StoredEvent::from_value(&json!({"timestamp": 12, "data": "oops"}));
        assert!(event.timestamp.is_none());
        assert!(event.data.is_empty());
    }

    #[test]
    fn test_bucket_metadata_parsing() {
        let meta: BucketMetadata = serde_json::from_value(json!({
            "id": "aw-watcher-window_pc",
            "type": "currentwindow",
            "client": "aw-watcher-window",
            "hostname": "pc",
            "created": "2024-05-01T08:00:00+00:00"
        }))
        .unwrap();
        assert_eq!(meta.bucket_type, "currentwindow");
        assert_eq!(meta.hostname.as_deref(), Some("pc"));
    }
}
