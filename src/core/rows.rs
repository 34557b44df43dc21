//! Event-log rows and the CSV table consumed by process-mining tools.
//!
//! The column names follow the XES conventions (`case:concept:name`,
//! `concept:name`, `time:timestamp`) and must stay exactly as they are.

use crate::collector::SourceLabel;
use crate::core::collect::CollectedEvent;
use crate::core::windowing::TimeWindow;
use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Separator between the parts of an activity label.
pub const LABEL_SEPARATOR: &str = " | ";

/// Label used when an event carries no type, app or title.
pub const PLACEHOLDER_LABEL: &str = "EVENT";

/// Table header, in column order.
pub const COLUMNS: [&str; 8] = [
    "case:concept:name",
    "concept:name",
    "time:timestamp",
    "aw:bucket",
    "aw:source",
    "aw:app",
    "aw:title",
    "aw:etype",
];

/// One exported event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedEventRow {
    pub case_id: String,
    pub activity: String,
    pub timestamp: DateTime<Utc>,
    pub source: SourceLabel,
    pub bucket_id: String,
    pub app: String,
    pub title: String,
    /// Event type, or the source label when the event has none
    pub etype: String,
}

impl MergedEventRow {
    fn fields(&self) -> [Cow<'_, str>; 8] {
        [
            Cow::Borrowed(self.case_id.as_str()),
            Cow::Borrowed(self.activity.as_str()),
            Cow::Owned(self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
            Cow::Borrowed(self.bucket_id.as_str()),
            Cow::Borrowed(self.source.as_str()),
            Cow::Borrowed(self.app.as_str()),
            Cow::Borrowed(self.title.as_str()),
            Cow::Borrowed(self.etype.as_str()),
        ]
    }
}

/// First non-empty string among `keys`.
fn first_text<'a>(data: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| data.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|v| !v.is_empty())
}

/// Build the activity label and traceability fields for one event.
pub fn synthesize_row(event: &CollectedEvent, case_id: &str) -> MergedEventRow {
    let etype = first_text(&event.data, &["etype", "event_type", "key_category"]);
    let app = first_text(&event.data, &["app", "exe"]);
    let title = first_text(&event.data, &["title", "window_title", "name"]);

    let parts: Vec<&str> = [etype, app, title].into_iter().flatten().collect();
    let activity = if parts.is_empty() {
        PLACEHOLDER_LABEL.to_string()
    } else {
        parts.join(LABEL_SEPARATOR)
    };

    MergedEventRow {
        case_id: case_id.to_string(),
        activity,
        timestamp: event.timestamp,
        source: event.source,
        bucket_id: event.bucket_id.clone(),
        app: app.unwrap_or_default().to_string(),
        title: title.unwrap_or_default().to_string(),
        etype: etype.unwrap_or(event.source.as_str()).to_string(),
    }
}

/// Rows for a merged stream, in the stream's order.
pub fn synthesize_rows(events: &[CollectedEvent], case_id: &str) -> Vec<MergedEventRow> {
    events.iter().map(|e| synthesize_row(e, case_id)).collect()
}

/// Quote a CSV field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn write_record<W: Write, S: AsRef<str>>(out: &mut W, fields: &[S]) -> std::io::Result<()> {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        out.write_all(csv_field(field.as_ref()).as_bytes())?;
    }
    out.write_all(b"\r\n")
}

/// Write the header and rows as CSV.
pub fn write_csv<W: Write>(out: &mut W, rows: &[MergedEventRow]) -> std::io::Result<()> {
    write_record(out, &COLUMNS)?;
    for row in rows {
        write_record(out, &row.fields())?;
    }
    Ok(())
}

/// File name carrying the session's local date and start/end times, e.g.
/// `event_log_COMBINED_02052024_09-00_09-30.csv`.
pub fn table_file_name(session: &TimeWindow) -> String {
    let start = session.start().with_timezone(&Local);
    let end = session.end().with_timezone(&Local);
    format!(
        "event_log_COMBINED_{}_{}_{}.csv",
        start.format("%d%m%Y"),
        start.format("%H-%M"),
        end.format("%H-%M")
    )
}

/// Write `rows` into `dir`, creating it if needed. Returns the file path.
pub fn write_table(dir: &Path, session: &TimeWindow, rows: &[MergedEventRow]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(table_file_name(session));

    let mut out = BufWriter::new(File::create(&path)?);
    write_csv(&mut out, rows)?;
    out.flush()?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn collected(data: Value, source: SourceLabel) -> CollectedEvent {
        CollectedEvent {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap(),
            data: data.as_object().cloned().unwrap_or_default(),
            source,
            bucket_id: format!("{}_pc", source.bucket_fragment()),
        }
    }

    #[test]
    fn test_label_from_all_parts() {
        let event = collected(
            json!({"etype": "mouse_click", "app": "EXCEL.EXE", "window_title": "Book1 - Excel"}),
            SourceLabel::Uia,
        );
        let row = synthesize_row(&event, "1");
        assert_eq!(row.activity, "mouse_click | EXCEL.EXE | Book1 - Excel");
        assert_eq!(row.etype, "mouse_click");
        assert_eq!(row.case_id, "1");
    }

    #[test]
    fn test_label_field_fallbacks() {
        let window = collected(
            json!({"app": "chrome.exe", "title": "Inbox", "window_title": "ignored"}),
            SourceLabel::Window,
        );
        let row = synthesize_row(&window, "1");
        assert_eq!(row.activity, "chrome.exe | Inbox");
        assert_eq!(row.etype, "window");

        let key = collected(json!({"key_category": "alpha", "exe": "notepad.exe"}), SourceLabel::Uia);
        assert_eq!(synthesize_row(&key, "1").activity, "alpha | notepad.exe");
    }

    #[test]
    fn test_placeholder_label() {
        let input = collected(json!({"presses": 4, "app": ""}), SourceLabel::Input);
        let row = synthesize_row(&input, "1");
        assert_eq!(row.activity, PLACEHOLDER_LABEL);
        assert_eq!(row.etype, "input");
        assert_eq!(row.app, "");
    }

    #[test]
    fn test_csv_output() {
        let event = collected(
            json!({"etype": "key_press", "app": "EXCEL.EXE", "window_title": "Report, \"Q1\""}),
            SourceLabel::Uia,
        );
        let rows = synthesize_rows(&[event], "1");

        let mut out = Vec::new();
        write_csv(&mut out, &rows).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.split("\r\n").collect();

        assert_eq!(
            lines[0],
            "case:concept:name,concept:name,time:timestamp,aw:bucket,aw:source,aw:app,aw:title,aw:etype"
        );
        assert_eq!(
            lines[1],
            "1,\"key_press | EXCEL.EXE | Report, \"\"Q1\"\"\",2024-05-02T12:00:00+00:00,aw-watcher-uia_pc,uia,EXCEL.EXE,\"Report, \"\"Q1\"\"\",key_press"
        );
        assert_eq!(lines[2], "");
    }

    #[test]
    fn test_table_file_name_shape() {
        let session = TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 2, 12, 30, 0).unwrap(),
        )
        .unwrap();
        let name = table_file_name(&session);
        assert!(name.starts_with("event_log_COMBINED_"));
        assert!(name.ends_with(".csv"));
        // date + two HH-MM parts
        let stem = name.trim_end_matches(".csv");
        assert_eq!(stem.split('_').count(), 6);
    }
}
