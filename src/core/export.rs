//! Session export with fallback search.
//!
//! Collects a session's events from the store, trying the candidate windows
//! of a [`FallbackPolicy`] in order until one yields data, and writes them as
//! an event-log table.

use crate::core::collect::{CollectError, WindowedCollector};
use crate::core::rows::{synthesize_rows, write_table, MergedEventRow};
use crate::core::windowing::{CandidateWindow, FallbackPolicy, TimeWindow};
use crate::store::EventStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

/// Export settings.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Directory the table is written into
    pub output_dir: PathBuf,
    /// Case identifier shared by every row of one export
    pub case_id: String,
    pub policy: FallbackPolicy,
}

impl ExportConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            case_id: "1".to_string(),
            policy: FallbackPolicy::default(),
        }
    }
}

/// Result of trying one candidate window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Found { events: usize },
    NoEvents,
    Failed { reason: String },
}

/// One entry of the attempt chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportAttempt {
    pub candidate: CandidateWindow,
    pub outcome: AttemptOutcome,
}

impl std::fmt::Display for ExportAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            AttemptOutcome::Found { events } => write!(f, "{}: {events} events", self.candidate),
            AttemptOutcome::NoEvents => write!(f, "{}: no events", self.candidate),
            AttemptOutcome::Failed { reason } => write!(f, "{}: {reason}", self.candidate),
        }
    }
}

/// Rows found by [`SessionExporter::search`].
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Candidate that produced the rows
    pub window: CandidateWindow,
    /// Rows in timestamp order
    pub rows: Vec<MergedEventRow>,
    /// Every candidate tried, the successful one last
    pub attempts: Vec<ExportAttempt>,
}

/// A written export.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub window: CandidateWindow,
    pub rows: usize,
    pub attempts: Vec<ExportAttempt>,
}

fn describe_attempts(attempts: &[ExportAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Export errors.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Every candidate window came back empty or failed
    #[error("no events in any candidate window (is the watcher running? clock skew?): {}", describe_attempts(.attempts))]
    Exhausted { attempts: Vec<ExportAttempt> },
    #[error("failed to write event log to {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExportError {
    /// The attempt chain, when the search itself failed.
    pub fn attempts(&self) -> &[ExportAttempt] {
        match self {
            ExportError::Exhausted { attempts } => attempts,
            ExportError::Io { .. } => &[],
        }
    }
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Exports a session's events with fallback search.
pub struct SessionExporter<S> {
    collector: WindowedCollector<S>,
    config: ExportConfig,
    clock: Clock,
}

impl<S: EventStore> SessionExporter<S> {
    pub fn new(collector: WindowedCollector<S>, config: ExportConfig) -> Self {
        Self {
            collector,
            config,
            clock: Box::new(Utc::now),
        }
    }

    /// Replace the clock used for the now-relative candidates.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Try the candidate windows in order and return the rows of the first
    /// one that has events.
    pub fn search(&self, requested: &TimeWindow) -> Result<SearchResult, ExportError> {
        let now = (self.clock)();
        let candidates = self.config.policy.candidates(*requested, now);
        let mut attempts: Vec<ExportAttempt> = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            if candidate.now_relative && !candidate.window.overlaps(requested) {
                warn!(
                    candidate = %candidate,
                    session = %requested,
                    "fallback window does not overlap the session, rows may belong to other activity"
                );
            }
            info!(candidate = %candidate, "trying export window");

            match self.collector.collect(&candidate.window) {
                Ok(events) => {
                    let rows = synthesize_rows(&events, &self.config.case_id);
                    attempts.push(ExportAttempt {
                        candidate: candidate.clone(),
                        outcome: AttemptOutcome::Found { events: rows.len() },
                    });
                    return Ok(SearchResult {
                        window: candidate,
                        rows,
                        attempts,
                    });
                }
                Err(CollectError::NoEvents { .. }) => {
                    info!(candidate = %candidate, "no events in window");
                    attempts.push(ExportAttempt {
                        candidate,
                        outcome: AttemptOutcome::NoEvents,
                    });
                }
                Err(e) => {
                    warn!(candidate = %candidate, error = %e, "export window failed");
                    attempts.push(ExportAttempt {
                        candidate,
                        outcome: AttemptOutcome::Failed {
                            reason: e.to_string(),
                        },
                    });
                }
            }
        }

        Err(ExportError::Exhausted { attempts })
    }

    /// Search for the session's events and write them as a table named after
    /// the requested window.
    pub fn export(&self, requested: &TimeWindow) -> Result<ExportOutcome, ExportError> {
        let found = self.search(requested)?;

        let path = write_table(&self.config.output_dir, requested, &found.rows).map_err(|source| {
            ExportError::Io {
                path: self.config.output_dir.clone(),
                source,
            }
        })?;
        info!(path = %path.display(), rows = found.rows.len(), "event log exported");

        Ok(ExportOutcome {
            path,
            window: found.window,
            rows: found.rows.len(),
            attempts: found.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};
    use serde_json::{json, Map};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, h, m, s).unwrap()
    }

    fn exporter(store: &MemoryStore, dir: &std::path::Path) -> SessionExporter<MemoryStore> {
        SessionExporter::new(
            WindowedCollector::with_default_sources(store.clone()),
            ExportConfig::new(dir),
        )
        .with_clock(|| at(10, 31, 0))
    }

    fn data(app: &str) -> Map<String, serde_json::Value> {
        json!({"app": app, "title": "t"}).as_object().cloned().unwrap()
    }

    #[test]
    fn test_skewed_events_found_in_widened_window() {
        let store = MemoryStore::new();
        let skewed = (at(10, 0, 0) - Duration::seconds(30)).to_rfc3339();
        store.push_raw("aw-watcher-window_pc", Some(&skewed), data("chrome.exe"));

        let dir = tempfile::tempdir().unwrap();
        let requested = TimeWindow::new(at(10, 0, 0), at(10, 30, 0)).unwrap();
        let outcome = exporter(&store, dir.path()).export(&requested).unwrap();

        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::NoEvents);
        assert_eq!(
            outcome.attempts[1].outcome,
            AttemptOutcome::Found { events: 1 }
        );
        assert_eq!(outcome.window, outcome.attempts[1].candidate);
        assert!(outcome.path.exists());
    }

    #[test]
    fn test_unreachable_store_exhausts_all_candidates() {
        let store = MemoryStore::new();
        store.set_reachable(false);

        let dir = tempfile::tempdir().unwrap();
        let requested = TimeWindow::new(at(10, 0, 0), at(10, 30, 0)).unwrap();
        let err = exporter(&store, dir.path()).export(&requested).unwrap_err();

        assert_eq!(err.attempts().len(), 4);
        assert!(err
            .attempts()
            .iter()
            .all(|a| matches!(a.outcome, AttemptOutcome::Failed { .. })));
        assert!(err.to_string().contains("last 60 min"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
