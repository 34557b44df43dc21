//! Capture-side plumbing for the task-mining recorder.
//!
//! The raw input hooks and accessibility-tree traversal live outside this
//! crate. They hand over [`UiContext`] values, which this module gates,
//! filters and turns into [`QueuedEvent`]s for the publisher.

pub mod capture;
pub mod gate;
pub mod types;

// Re-export commonly used types
pub use capture::{AppAllowlist, CaptureHandler, CaptureMessage, EventSink};
pub use gate::{AlwaysOpen, Gate, ManualGate, PauseFileGate};
pub use types::{
    BoundingBox, EventContext, EventKind, KeyCategory, QueuedEvent, SourceLabel, UiContext,
};
