//! Time windows and the fallback sequence used to search for a session's
//! events.
//!
//! The store's clock and the recorder's clock can disagree by a few seconds,
//! and a watcher may have been late to start. The exporter therefore tries
//! the requested window first and then progressively wider candidates.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Errors raised when building a window.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("window start {start} is after its end {end}")]
    Inverted {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// A closed interval `[start, end]`, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

// Deserialized windows go through the same bounds check as `new`.
impl<'de> Deserialize<'de> for TimeWindow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Bounds {
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        }

        let bounds = Bounds::deserialize(deserializer)?;
        TimeWindow::new(bounds.start, bounds.end).map_err(serde::de::Error::custom)
    }
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        if start > end {
            return Err(WindowError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// The window of length `len` ending at `now`.
    pub fn trailing(now: DateTime<Utc>, len: Duration) -> Self {
        let len = len.max(Duration::zero());
        Self {
            start: now - len,
            end: now,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Check if a timestamp falls within this window (both ends inclusive).
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Extend the window by `before` at the start and `after` at the end.
    pub fn widened(&self, before: Duration, after: Duration) -> Self {
        Self {
            start: self.start - before.max(Duration::zero()),
            end: self.end + after.max(Duration::zero()),
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} → {}",
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// One entry of the fallback sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateWindow {
    pub label: String,
    pub window: TimeWindow,
    /// Anchored to the export time rather than to the session bounds
    pub now_relative: bool,
}

impl std::fmt::Display for CandidateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.label, self.window)
    }
}

/// Shape of the fallback search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPolicy {
    /// Padding before the session start for the widened candidate
    pub skew_before: Duration,
    /// Padding after the session end for the widened candidate
    pub skew_after: Duration,
    /// Lengths of the trailing windows tried last, in order
    pub recent_windows: Vec<Duration>,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            skew_before: Duration::seconds(60),
            skew_after: Duration::seconds(5),
            recent_windows: vec![Duration::minutes(15), Duration::minutes(60)],
        }
    }
}

impl FallbackPolicy {
    /// Candidate windows for `requested`, in the order they are tried.
    pub fn candidates(&self, requested: TimeWindow, now: DateTime<Utc>) -> Vec<CandidateWindow> {
        let mut candidates = vec![
            CandidateWindow {
                label: "requested window".to_string(),
                window: requested,
                now_relative: false,
            },
            CandidateWindow {
                label: format!(
                    "requested window -{}s/+{}s",
                    self.skew_before.num_seconds(),
                    self.skew_after.num_seconds()
                ),
                window: requested.widened(self.skew_before, self.skew_after),
                now_relative: false,
            },
        ];

        candidates.extend(self.recent_windows.iter().map(|len| CandidateWindow {
            label: format!("last {} min", len.num_minutes()),
            window: TimeWindow::trailing(now, *len),
            now_relative: true,
        }));

        candidates
    }
}
