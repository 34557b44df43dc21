//! Task-mining recorder - desktop interaction capture and event-log export.
//!
//! This library buffers fine-grained UI interaction events (clicks and key
//! presses together with the control they hit) into a bucket-based event
//! store, and later rebuilds a session's activity log from that store for
//! process-mining tools.
//!
//! # Architecture
//!
//! ```text
//! capture hooks ──▶ Gate ──▶ CaptureHandler ──▶ BufferedPublisher ──▶ worker ──▶ store
//!                                                (bounded queue)     (batches)
//!
//! store ──▶ WindowedCollector ──▶ SessionExporter ──▶ event_log_COMBINED_*.csv
//!          (window/input/uia)     (fallback windows)
//! ```
//!
//! Capture callbacks never block: when the queue is full events are dropped
//! and counted. Only the publisher's worker thread talks to the store on the
//! write path. Collection and export run on the caller's thread.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskmining_recorder::collector::{AppAllowlist, CaptureHandler, PauseFileGate, UiContext};
//! use taskmining_recorder::publisher::{BufferedPublisher, PublisherConfig};
//! use taskmining_recorder::store::MemoryStore;
//!
//! let mut publisher = BufferedPublisher::new(MemoryStore::new(), PublisherConfig::default());
//! publisher.start().expect("store unreachable");
//!
//! let capture = CaptureHandler::new(
//!     Arc::new(PauseFileGate::new("aw_uia.PAUSE")),
//!     AppAllowlist::parse("EXCEL.EXE;chrome.exe"),
//!     publisher.handle(),
//! );
//! capture.on_click("Button.left", true, || Some(UiContext::default()));
//!
//! publisher.stop();
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod publisher;
pub mod store;

// Re-export key types at crate root for convenience
pub use collector::{CaptureHandler, EventContext, Gate, QueuedEvent, SourceLabel, UiContext};
pub use config::Config;
pub use core::{ExportError, ExportOutcome, SessionExporter, TimeWindow, WindowedCollector};
pub use publisher::{BufferedPublisher, PublisherConfig, PublisherHandle, StopOutcome};
pub use store::{EventStore, MemoryStore, StoreError};

#[cfg(feature = "http")]
pub use store::{HttpStore, StoreConfig};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
