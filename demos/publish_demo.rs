//! Demonstration of the recording and export pipeline.
//!
//! This example shows how to:
//! 1. Start a buffered publisher against an event store
//! 2. Feed capture callbacks through the pause gate and allowlist
//! 3. Stop the publisher and read its counters
//! 4. Export the session as an event-log table
//!
//! Run with: cargo run --example publish_demo
//!
//! Uses the in-memory store, so no server is needed.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use taskmining_recorder::{
    collector::{AppAllowlist, CaptureHandler, ManualGate, UiContext},
    core::{ExportConfig, SessionExporter, TimeWindow, WindowedCollector},
    publisher::{default_bucket_id, BufferedPublisher, PublisherConfig},
    store::MemoryStore,
};

fn main() {
    println!("Task-mining Recorder - Publish Demo");
    println!("===================================");
    println!();

    let store = MemoryStore::new();
    let mut config = PublisherConfig::new(default_bucket_id());
    config.flush_interval = Duration::from_millis(200);

    let mut publisher = BufferedPublisher::new(store.clone(), config);
    if let Err(e) = publisher.start() {
        eprintln!("Failed to start publisher: {e}");
        return;
    }
    let session_start = Utc::now();

    let gate = Arc::new(ManualGate::new());
    let capture = CaptureHandler::new(
        gate.clone(),
        AppAllowlist::parse("EXCEL.EXE;chrome.exe"),
        publisher.handle(),
    );

    let excel = || {
        Some(UiContext {
            app: Some("EXCEL.EXE".to_string()),
            window_title: "Budget.xlsx - Excel".to_string(),
            control_type: Some("DataItem".to_string()),
            control_name: Some("B4".to_string()),
            ..UiContext::default()
        })
    };
    let notepad = || {
        Some(UiContext {
            app: Some("notepad.exe".to_string()),
            window_title: "Untitled - Notepad".to_string(),
            ..UiContext::default()
        })
    };

    println!("Simulating a short session...");
    capture.on_click("Button.left", true, excel);
    capture.on_key_press(Some(0x42), excel);
    capture.on_key_press(Some(0x0D), excel);

    // Not on the allowlist
    capture.on_click("Button.left", true, notepad);

    gate.pause();
    capture.on_key_press(Some(0x41), excel);
    gate.resume();

    capture.on_click("Button.right", true, excel);
    thread::sleep(Duration::from_millis(300));

    publisher.stop();
    println!();
    println!("{}", publisher.stats().summary());
    println!();

    let dir = std::env::temp_dir().join("taskmining-demo");
    let session = match TimeWindow::new(session_start, Utc::now()) {
        Ok(window) => window,
        Err(e) => {
            eprintln!("Invalid session window: {e}");
            return;
        }
    };
    let exporter = SessionExporter::new(
        WindowedCollector::with_default_sources(store),
        ExportConfig::new(&dir),
    );

    match exporter.export(&session) {
        Ok(outcome) => {
            for attempt in &outcome.attempts {
                println!("  {attempt}");
            }
            println!("Exported {} events to {:?}", outcome.rows, outcome.path);
        }
        Err(e) => eprintln!("Export failed: {e}"),
    }
}
