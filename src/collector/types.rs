//! Interaction event types for the task-mining recorder.
//!
//! These types describe one captured interaction together with the UI
//! context it happened in. Key identity is never captured, only a coarse
//! category.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Logical source of an event in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLabel {
    /// Active-window watcher
    Window,
    /// Input-activity watcher
    Input,
    /// UI-automation watcher (this recorder)
    Uia,
}

impl SourceLabel {
    /// All sources in merge order.
    pub const ALL: [SourceLabel; 3] = [SourceLabel::Window, SourceLabel::Input, SourceLabel::Uia];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceLabel::Window => "window",
            SourceLabel::Input => "input",
            SourceLabel::Uia => "uia",
        }
    }

    /// Fragment that identifies this source's buckets in the store.
    pub fn bucket_fragment(&self) -> &'static str {
        match self {
            SourceLabel::Window => "aw-watcher-window",
            SourceLabel::Input => "aw-watcher-input",
            SourceLabel::Uia => "aw-watcher-uia",
        }
    }
}

impl std::fmt::Display for SourceLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Screen rectangle of a UI control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Interaction kind, serialized as the `etype` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MouseClick,
    KeyPress,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MouseClick => "mouse_click",
            EventKind::KeyPress => "key_press",
        }
    }
}

/// Coarse key classification. The key itself is never recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyCategory {
    /// Tab, Enter or Escape
    Control,
    /// Anything else
    Alpha,
}

impl KeyCategory {
    /// Classify a virtual-key code.
    pub fn from_virtual_key(vk: Option<u32>) -> Self {
        match vk {
            Some(9) | Some(13) | Some(27) => KeyCategory::Control,
            _ => KeyCategory::Alpha,
        }
    }
}

/// Control metadata produced by the accessibility layer for one interaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiContext {
    /// Process executable name of the owning application
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    /// Title of the top-level window
    #[serde(default)]
    pub window_title: String,
    #[serde(default)]
    pub control_type: Option<String>,
    #[serde(default)]
    pub control_name: Option<String>,
    #[serde(default)]
    pub automation_id: Option<String>,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    /// Short ancestry of the control, outermost first
    #[serde(default)]
    pub path: Vec<String>,
}

/// One captured interaction. Built once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    pub etype: EventKind,
    /// When the interaction was captured
    pub timestamp: DateTime<Utc>,
    pub source_label: SourceLabel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_category: Option<KeyCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub window_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    pub path: Vec<String>,
}

impl EventContext {
    /// Create a click event from the control under the pointer.
    pub fn click(ctx: UiContext, button: impl Into<String>) -> Self {
        Self::from_parts(EventKind::MouseClick, ctx, Some(button.into()), None)
    }

    /// Create a key-press event from the focused control.
    pub fn key_press(ctx: UiContext, category: KeyCategory) -> Self {
        Self::from_parts(EventKind::KeyPress, ctx, None, Some(category))
    }

    fn from_parts(
        etype: EventKind,
        ctx: UiContext,
        button: Option<String>,
        key_category: Option<KeyCategory>,
    ) -> Self {
        Self {
            etype,
            timestamp: Utc::now(),
            source_label: SourceLabel::Uia,
            button,
            key_category,
            app: ctx.app,
            pid: ctx.pid,
            window_title: ctx.window_title,
            control_type: ctx.control_type,
            control_name: ctx.control_name,
            automation_id: ctx.automation_id,
            bbox: ctx.bbox,
            path: ctx.path,
        }
    }
}

/// Wire form of an event as inserted into a store bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub timestamp: DateTime<Utc>,
    /// Interactions are instantaneous
    pub duration: f64,
    pub data: Map<String, Value>,
}

impl From<EventContext> for QueuedEvent {
    fn from(ctx: EventContext) -> Self {
        let timestamp = ctx.timestamp;
        let mut data = match serde_json::to_value(&ctx) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        data.remove("timestamp");
        data.remove("source_label");

        Self {
            timestamp,
            duration: 0.0,
            data,
        }
    }
}
