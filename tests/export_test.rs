//! Integration tests for windowed collection and session export.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Map, Value};
use taskmining_recorder::collector::SourceLabel;
use taskmining_recorder::core::{
    AttemptOutcome, CollectError, ExportConfig, ExportError, SessionExporter, TimeWindow,
    WindowedCollector,
};
use taskmining_recorder::store::MemoryStore;

const WINDOW_BUCKET: &str = "aw-watcher-window_pc";
const INPUT_BUCKET: &str = "aw-watcher-input_pc";
const UIA_BUCKET: &str = "aw-watcher-uia_pc";

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 2, h, m, s).unwrap()
}

fn session() -> TimeWindow {
    TimeWindow::new(at(10, 0, 0), at(10, 30, 0)).unwrap()
}

fn obj(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn push(store: &MemoryStore, bucket: &str, ts: DateTime<Utc>, data: Value) {
    store.push_raw(bucket, Some(&ts.to_rfc3339()), obj(data));
}

fn exporter(store: &MemoryStore, dir: &std::path::Path, now: DateTime<Utc>) -> SessionExporter<MemoryStore> {
    SessionExporter::new(
        WindowedCollector::with_default_sources(store.clone()),
        ExportConfig::new(dir),
    )
    .with_clock(move || now)
}

#[test]
fn test_merge_orders_three_sources_and_drops_bad_timestamps() {
    let store = MemoryStore::new();
    // Deliberately out of order within each bucket
    push(&store, WINDOW_BUCKET, at(10, 5, 0), json!({"app": "chrome.exe", "title": "Docs"}));
    push(&store, WINDOW_BUCKET, at(10, 1, 0), json!({"app": "EXCEL.EXE", "title": "Book1"}));
    push(&store, INPUT_BUCKET, at(10, 4, 0), json!({"presses": 3}));
    push(&store, INPUT_BUCKET, at(10, 2, 0), json!({"presses": 1}));
    push(&store, UIA_BUCKET, at(10, 3, 0), json!({"etype": "mouse_click", "app": "EXCEL.EXE"}));
    store.push_raw(UIA_BUCKET, Some("not a time"), obj(json!({"etype": "key_press"})));
    store.push_raw(UIA_BUCKET, None, obj(json!({"etype": "key_press"})));
    // Unrelated bucket is never queried
    push(&store, "aw-watcher-afk_pc", at(10, 2, 30), json!({"status": "afk"}));

    let collector = WindowedCollector::with_default_sources(store.clone());
    let events = collector.collect(&session()).unwrap();

    let times: Vec<DateTime<Utc>> = events.iter().map(|e| e.timestamp).collect();
    assert_eq!(
        times,
        vec![at(10, 1, 0), at(10, 2, 0), at(10, 3, 0), at(10, 4, 0), at(10, 5, 0)]
    );
    assert!(times.windows(2).all(|w| w[0] < w[1]));

    let sources: Vec<SourceLabel> = events.iter().map(|e| e.source).collect();
    assert_eq!(
        sources,
        vec![
            SourceLabel::Window,
            SourceLabel::Input,
            SourceLabel::Uia,
            SourceLabel::Input,
            SourceLabel::Window
        ]
    );
}

#[test]
fn test_failing_bucket_is_skipped() {
    let store = MemoryStore::new();
    push(&store, WINDOW_BUCKET, at(10, 1, 0), json!({"app": "chrome.exe"}));
    push(&store, UIA_BUCKET, at(10, 2, 0), json!({"etype": "key_press"}));
    store.fail_queries_for(WINDOW_BUCKET);

    let collector = WindowedCollector::with_default_sources(store.clone());
    let events = collector.collect(&session()).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].bucket_id, UIA_BUCKET);
}

#[test]
fn test_empty_window_reports_no_events() {
    let store = MemoryStore::new();
    push(&store, WINDOW_BUCKET, at(11, 0, 0), json!({"app": "chrome.exe"}));

    let collector = WindowedCollector::with_default_sources(store.clone());
    assert!(matches!(
        collector.collect(&session()),
        Err(CollectError::NoEvents { .. })
    ));
}

#[test]
fn test_fallback_stops_at_first_non_empty_window() {
    let store = MemoryStore::new();
    // Only visible once the window is widened by the skew padding
    push(&store, UIA_BUCKET, at(10, 30, 3), json!({"etype": "key_press", "app": "EXCEL.EXE"}));
    push(&store, WINDOW_BUCKET, at(9, 59, 30), json!({"app": "EXCEL.EXE", "title": "Book1"}));

    let dir = tempfile::tempdir().unwrap();
    let result = exporter(&store, dir.path(), at(10, 31, 0))
        .search(&session())
        .unwrap();

    let tried: Vec<TimeWindow> = result.attempts.iter().map(|a| a.candidate.window).collect();
    assert_eq!(
        tried,
        vec![
            session(),
            session().widened(Duration::seconds(60), Duration::seconds(5))
        ]
    );
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::NoEvents);
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0].activity, "EXCEL.EXE | Book1");
    assert_eq!(result.rows[1].activity, "key_press | EXCEL.EXE");
}

#[test]
fn test_export_writes_ordered_table() {
    let store = MemoryStore::new();
    push(&store, UIA_BUCKET, at(10, 10, 0), json!({"etype": "mouse_click", "app": "EXCEL.EXE", "window_title": "Book1 - Excel"}));
    push(&store, WINDOW_BUCKET, at(10, 9, 0), json!({"app": "EXCEL.EXE", "title": "Book1 - Excel"}));
    push(&store, INPUT_BUCKET, at(10, 11, 0), json!({"presses": 7}));

    let dir = tempfile::tempdir().unwrap();
    let outcome = exporter(&store, dir.path(), at(10, 31, 0))
        .export(&session())
        .unwrap();

    assert_eq!(outcome.rows, 3);
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.path.parent(), Some(dir.path()));

    let text = std::fs::read_to_string(&outcome.path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("case:concept:name,concept:name,time:timestamp,"));
    assert!(lines[1].starts_with("1,EXCEL.EXE | Book1 - Excel,2024-05-02T10:09:00+00:00,"));
    assert!(lines[2].starts_with("1,mouse_click | EXCEL.EXE | Book1 - Excel,2024-05-02T10:10:00+00:00,"));
    assert!(lines[3].starts_with("1,EVENT,2024-05-02T10:11:00+00:00,aw-watcher-input_pc,input,"));
}

#[test]
fn test_all_windows_empty_is_terminal() {
    let store = MemoryStore::new();
    // Exists, but far outside every candidate
    push(&store, UIA_BUCKET, at(2, 0, 0), json!({"etype": "key_press"}));

    let dir = tempfile::tempdir().unwrap();
    let err = exporter(&store, dir.path(), at(10, 31, 0))
        .export(&session())
        .unwrap_err();

    match &err {
        ExportError::Exhausted { attempts } => {
            assert_eq!(attempts.len(), 4);
            assert!(attempts.iter().all(|a| a.outcome == AttemptOutcome::NoEvents));
            let labels: Vec<&str> = attempts.iter().map(|a| a.candidate.label.as_str()).collect();
            assert_eq!(
                labels,
                [
                    "requested window",
                    "requested window -60s/+5s",
                    "last 15 min",
                    "last 60 min"
                ]
            );
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_recent_fallback_finds_late_events() {
    let store = MemoryStore::new();
    // Recorded after the session end plus skew, but within the last 15 min
    push(&store, UIA_BUCKET, at(10, 40, 0), json!({"etype": "key_press"}));

    let dir = tempfile::tempdir().unwrap();
    let result = exporter(&store, dir.path(), at(10, 45, 0))
        .search(&session())
        .unwrap();

    assert_eq!(result.attempts.len(), 3);
    assert!(result.window.now_relative);
    assert_eq!(result.rows.len(), 1);
}
