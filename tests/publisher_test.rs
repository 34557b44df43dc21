//! Integration tests for the buffered publisher against the in-memory store.

use chrono::Utc;
use serde_json::{json, Map};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use taskmining_recorder::collector::{AppAllowlist, CaptureHandler, ManualGate, UiContext};
use taskmining_recorder::publisher::{BufferedPublisher, PublisherConfig, StopOutcome};
use taskmining_recorder::store::{Bucket, EventStore, MemoryStore};
use taskmining_recorder::QueuedEvent;

const BUCKET: &str = "aw-watcher-uia_testhost";

fn config() -> PublisherConfig {
    let mut config = PublisherConfig::new(BUCKET);
    config.hostname = "testhost".to_string();
    config.poll_interval = Duration::from_millis(20);
    config
}

fn event(seq: u64) -> QueuedEvent {
    let mut data = Map::new();
    data.insert("seq".to_string(), json!(seq));
    QueuedEvent {
        timestamp: Utc::now(),
        duration: 0.0,
        data,
    }
}

/// Poll until `check` holds or the deadline passes.
fn wait_for(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}

#[test]
fn test_size_trigger_flushes_before_interval() {
    let store = MemoryStore::new();
    let mut cfg = config();
    cfg.flush_interval = Duration::from_secs(60);
    cfg.batch_size = 200;
    let mut publisher = BufferedPublisher::new(store.clone(), cfg);
    publisher.start().unwrap();

    for seq in 0..200 {
        publisher.publish(event(seq));
    }

    assert!(wait_for(Duration::from_secs(2), || store.event_count(BUCKET) == 200));
    assert_eq!(store.insert_calls(), 1);
    publisher.stop();
}

#[test]
fn test_time_trigger_flushes_single_event() {
    let store = MemoryStore::new();
    let mut cfg = config();
    cfg.flush_interval = Duration::from_millis(200);
    let mut publisher = BufferedPublisher::new(store.clone(), cfg);
    publisher.start().unwrap();

    publisher.publish(event(0));

    assert!(wait_for(Duration::from_secs(2), || store.event_count(BUCKET) == 1));
    assert!(publisher.is_running());
    publisher.stop();
}

#[test]
fn test_stop_drains_everything_in_order() {
    let store = MemoryStore::new();
    let mut cfg = config();
    cfg.flush_interval = Duration::from_secs(60);
    cfg.batch_size = 64;
    let mut publisher = BufferedPublisher::new(store.clone(), cfg);
    publisher.start().unwrap();

    let n = 1_000;
    for seq in 0..n {
        publisher.publish(event(seq));
    }
    assert_eq!(publisher.stop(), StopOutcome::Stopped);

    let seqs: Vec<u64> = store
        .events(BUCKET)
        .iter()
        .map(|e| e.data["seq"].as_u64().unwrap())
        .collect();
    assert_eq!(seqs, (0..n).collect::<Vec<_>>());
    assert_eq!(publisher.stats().snapshot().flushed_events, n);
}

#[test]
fn test_overload_never_blocks_or_exceeds_capacity() {
    let store = MemoryStore::new();
    let mut cfg = config();
    cfg.queue_capacity = 100;
    cfg.batch_size = 10;
    let mut publisher = BufferedPublisher::new(store.clone(), cfg);

    // Nothing drains before start, so the queue saturates deterministically.
    let started = Instant::now();
    for seq in 0..50_000 {
        publisher.publish(event(seq));
    }
    assert!(started.elapsed() < Duration::from_secs(5));

    let stats = publisher.stats().snapshot();
    assert_eq!(stats.enqueued, 100);
    assert_eq!(stats.dropped, 49_900);

    publisher.start().unwrap();
    publisher.stop();
    assert_eq!(store.event_count(BUCKET), 100);
}

#[test]
fn test_concurrent_producers_with_running_worker() {
    let store = MemoryStore::new();
    let mut cfg = config();
    cfg.queue_capacity = 50;
    cfg.batch_size = 10;
    let mut publisher = BufferedPublisher::new(store.clone(), cfg);
    publisher.start().unwrap();

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let handle = publisher.handle();
            thread::spawn(move || {
                for seq in 0..2_000 {
                    handle.publish(event(p * 10_000 + seq));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    publisher.stop();

    let stats = publisher.stats().snapshot();
    assert_eq!(stats.enqueued + stats.dropped, 8_000);
    assert_eq!(store.event_count(BUCKET) as u64, stats.enqueued);
}

#[test]
fn test_existing_bucket_is_left_untouched() {
    let store = MemoryStore::new();
    store
        .ensure_bucket(&Bucket {
            id: BUCKET.to_string(),
            bucket_type: "original.type".to_string(),
            client: "someone-else".to_string(),
            hostname: "elsewhere".to_string(),
        })
        .unwrap();
    let before = store.metadata(BUCKET).unwrap();

    let mut publisher = BufferedPublisher::new(store.clone(), config());
    publisher.start().unwrap();
    publisher.publish(event(1));
    publisher.stop();

    assert_eq!(store.metadata(BUCKET).unwrap(), before);
    assert_eq!(store.event_count(BUCKET), 1);
}

#[test]
fn test_slow_store_hits_join_timeout() {
    struct SlowStore(MemoryStore);

    impl EventStore for SlowStore {
        fn connect(&self) -> Result<(), taskmining_recorder::StoreError> {
            self.0.connect()
        }
        fn ensure_bucket(
            &self,
            bucket: &Bucket,
        ) -> Result<taskmining_recorder::store::BucketStatus, taskmining_recorder::StoreError> {
            self.0.ensure_bucket(bucket)
        }
        fn insert_events(
            &self,
            bucket_id: &str,
            events: &[QueuedEvent],
        ) -> Result<(), taskmining_recorder::StoreError> {
            thread::sleep(Duration::from_millis(800));
            self.0.insert_events(bucket_id, events)
        }
        fn list_buckets(
            &self,
        ) -> Result<
            std::collections::BTreeMap<String, taskmining_recorder::store::BucketMetadata>,
            taskmining_recorder::StoreError,
        > {
            self.0.list_buckets()
        }
        fn query_events(
            &self,
            bucket_id: &str,
            start: chrono::DateTime<Utc>,
            end: chrono::DateTime<Utc>,
        ) -> Result<Vec<taskmining_recorder::store::StoredEvent>, taskmining_recorder::StoreError>
        {
            self.0.query_events(bucket_id, start, end)
        }
    }

    let mut cfg = config();
    cfg.batch_size = 1;
    cfg.join_timeout = Duration::from_millis(100);
    let mut publisher = BufferedPublisher::new(SlowStore(MemoryStore::new()), cfg);
    publisher.start().unwrap();
    for seq in 0..5 {
        publisher.publish(event(seq));
    }

    let started = Instant::now();
    assert_eq!(publisher.stop(), StopOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!publisher.is_running());
}

#[test]
fn test_capture_to_store_pipeline() {
    let store = MemoryStore::new();
    let mut publisher = BufferedPublisher::new(store.clone(), config());
    publisher.start().unwrap();

    let gate = Arc::new(ManualGate::new());
    let capture = CaptureHandler::new(
        gate.clone(),
        AppAllowlist::parse("EXCEL.EXE"),
        publisher.handle(),
    );
    let excel = || {
        Some(UiContext {
            app: Some("EXCEL.EXE".to_string()),
            window_title: "Book1 - Excel".to_string(),
            ..UiContext::default()
        })
    };

    assert!(capture.on_click("Button.left", true, excel));
    gate.pause();
    assert!(!capture.on_key_press(Some(65), excel));
    gate.resume();
    assert!(capture.on_key_press(Some(13), excel));
    publisher.stop();

    let events = store.events(BUCKET);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].data["etype"], "mouse_click");
    assert_eq!(events[1].data["etype"], "key_press");
    assert_eq!(events[1].data["key_category"], "control");
}
