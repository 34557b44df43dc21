//! Multi-source event collection.
//!
//! Discovers the store's buckets for each logical source, queries all of
//! them for one window and merges the results into a single stream ordered
//! by timestamp.

use crate::collector::SourceLabel;
use crate::core::windowing::TimeWindow;
use crate::store::{EventStore, StoreError, StoredEvent};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, warn};

/// A logical source and the bucket-id fragment that identifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub label: SourceLabel,
    pub fragment: String,
}

impl SourceSpec {
    pub fn new(label: SourceLabel, fragment: impl Into<String>) -> Self {
        Self {
            label,
            fragment: fragment.into(),
        }
    }

    /// Window, input and UIA watchers, matched by their standard bucket
    /// prefixes.
    pub fn defaults() -> Vec<SourceSpec> {
        SourceLabel::ALL
            .iter()
            .map(|label| SourceSpec::new(*label, label.bucket_fragment()))
            .collect()
    }
}

/// One merged event.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedEvent {
    pub timestamp: DateTime<Utc>,
    pub data: Map<String, Value>,
    pub source: SourceLabel,
    /// Bucket the event was read from
    pub bucket_id: String,
}

/// Collection errors.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("no events between {window}")]
    NoEvents { window: TimeWindow },
    #[error("could not list buckets: {0}")]
    Store(#[from] StoreError),
}

/// Parse an event timestamp. Offsets are honoured; a timestamp without one
/// is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Queries a store across several sources.
pub struct WindowedCollector<S> {
    store: S,
    sources: Vec<SourceSpec>,
}

impl<S: EventStore> WindowedCollector<S> {
    pub fn new(store: S, sources: Vec<SourceSpec>) -> Self {
        Self { store, sources }
    }

    pub fn with_default_sources(store: S) -> Self {
        Self::new(store, SourceSpec::defaults())
    }

    pub fn sources(&self) -> &[SourceSpec] {
        &self.sources
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Collect every event of every matching bucket within `window`, sorted
    /// by timestamp.
    ///
    /// A failing bucket is logged and skipped. Events whose timestamp is
    /// missing, unparseable or outside the window are left out.
    pub fn collect(&self, window: &TimeWindow) -> Result<Vec<CollectedEvent>, CollectError> {
        let buckets = self.store.list_buckets()?;
        let mut claimed: HashSet<&str> = HashSet::new();
        let mut events = Vec::new();

        for source in &self.sources {
            let ids: Vec<&str> = buckets
                .keys()
                .map(String::as_str)
                .filter(|id| id.contains(source.fragment.as_str()))
                .collect();

            for bucket_id in ids {
                // A bucket matching several fragments belongs to the first
                if !claimed.insert(bucket_id) {
                    continue;
                }
                match self
                    .store
                    .query_events(bucket_id, window.start(), window.end())
                {
                    Ok(stored) => {
                        let before = events.len();
                        events.extend(
                            stored
                                .into_iter()
                                .filter_map(|e| to_collected(e, source.label, bucket_id))
                                .filter(|e| window.contains(e.timestamp)),
                        );
                        debug!(
                            bucket = bucket_id,
                            source = %source.label,
                            events = events.len() - before,
                            "queried bucket"
                        );
                    }
                    Err(e) => {
                        warn!(bucket = bucket_id, error = %e, "failed to read bucket, skipping");
                    }
                }
            }
        }

        if events.is_empty() {
            return Err(CollectError::NoEvents { window: *window });
        }

        // Stable: ties keep source order
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}

fn to_collected(event: StoredEvent, source: SourceLabel, bucket_id: &str) -> Option<CollectedEvent> {
    let timestamp = event.timestamp.as_deref().and_then(parse_timestamp)?;
    Some(CollectedEvent {
        timestamp,
        data: event.data,
        source,
        bucket_id: bucket_id.to_string(),
    })
}
