//! Capture gates.
//!
//! A gate is consulted on every capture callback before any UI context is
//! computed. While the gate is closed nothing is produced.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// External on/off control for capture.
pub trait Gate: Send + Sync {
    /// Whether capture is currently allowed.
    fn is_open(&self) -> bool;
}

impl<G: Gate + ?Sized> Gate for Arc<G> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// A gate that never closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOpen;

impl Gate for AlwaysOpen {
    fn is_open(&self) -> bool {
        true
    }
}

/// Closed while a sentinel file exists.
#[derive(Debug, Clone)]
pub struct PauseFileGate {
    path: PathBuf,
}

impl PauseFileGate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the sentinel file, closing the gate.
    pub fn pause(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, b"")
    }

    /// Remove the sentinel file, opening the gate.
    pub fn resume(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

impl Gate for PauseFileGate {
    fn is_open(&self) -> bool {
        !self.path.exists()
    }
}

/// In-process gate toggled programmatically.
#[derive(Debug, Default)]
pub struct ManualGate {
    paused: AtomicBool,
}

impl ManualGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }
}

impl Gate for ManualGate {
    fn is_open(&self) -> bool {
        !self.paused.load(Ordering::SeqCst)
    }
}
