//! Core functionality for the task-mining recorder.
//!
//! This module contains:
//! - Time windows and the fallback search sequence
//! - Multi-source collection and merging from the store
//! - Row synthesis and the event-log table
//! - Session export tying them together

pub mod collect;
pub mod export;
pub mod rows;
pub mod windowing;

// Re-export commonly used types
pub use collect::{parse_timestamp, CollectError, CollectedEvent, SourceSpec, WindowedCollector};
pub use export::{
    AttemptOutcome, ExportAttempt, ExportConfig, ExportError, ExportOutcome, SearchResult,
    SessionExporter,
};
pub use rows::{synthesize_row, synthesize_rows, write_csv, write_table, MergedEventRow, COLUMNS};
pub use windowing::{CandidateWindow, FallbackPolicy, TimeWindow, WindowError};
