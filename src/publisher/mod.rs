//! Publishing captured events to the store.

pub mod buffered;
pub mod stats;

pub use buffered::{
    BufferedPublisher, PublisherConfig, PublisherError, PublisherHandle, StopOutcome,
};
pub use stats::{PublisherSnapshot, PublisherStats, SharedPublisherStats};

/// Lower-cased host name, or `host` when it cannot be determined.
pub fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_lowercase())
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "host".to_string())
}

/// Bucket id used when none is configured: `aw-watcher-uia_<host>`.
pub fn default_bucket_id() -> String {
    format!("aw-watcher-uia_{}", local_hostname())
}
