//! Capture callbacks.
//!
//! The platform hook layer calls into [`CaptureHandler`] from its input
//! dispatch threads. Everything here is cheap: the gate is checked before the
//! UI context is resolved, and publishing never blocks.

use crate::collector::gate::Gate;
use crate::collector::types::{EventContext, KeyCategory, QueuedEvent, UiContext};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Receiver of captured events (the producer side of the publisher).
pub trait EventSink: Send + Sync {
    /// Hand an event over. Must not block.
    fn publish(&self, event: QueuedEvent);
}

/// Case-insensitive list of application executables allowed for capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppAllowlist {
    apps: Vec<String>,
}

impl AppAllowlist {
    /// Parse a `;`-separated list, e.g. `EXCEL.EXE;chrome.exe`.
    pub fn parse(s: &str) -> Self {
        Self::from_apps(s.split(';'))
    }

    pub fn from_apps<I, A>(apps: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
    {
        Self {
            apps: apps
                .into_iter()
                .map(|a| a.as_ref().trim().to_lowercase())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    /// An empty list allows every app; events without an app never pass.
    pub fn allows(&self, app: Option<&str>) -> bool {
        match app {
            None | Some("") => false,
            Some(_) if self.apps.is_empty() => true,
            Some(name) => {
                let name = name.to_lowercase();
                self.apps.iter().any(|a| *a == name)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn apps(&self) -> &[String] {
        &self.apps
    }
}

/// One capture payload delivered by an external hook process as a JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum CaptureMessage {
    Click {
        button: String,
        #[serde(default = "pressed_by_default")]
        pressed: bool,
        #[serde(default)]
        context: Option<UiContext>,
    },
    Key {
        #[serde(default)]
        vk: Option<u32>,
        #[serde(default)]
        context: Option<UiContext>,
    },
}

fn pressed_by_default() -> bool {
    true
}

/// Turns raw pointer and keyboard callbacks into published events.
pub struct CaptureHandler<K> {
    gate: Arc<dyn Gate>,
    allowlist: AppAllowlist,
    sink: K,
}

impl<K: EventSink> CaptureHandler<K> {
    pub fn new(gate: Arc<dyn Gate>, allowlist: AppAllowlist, sink: K) -> Self {
        Self {
            gate,
            allowlist,
            sink,
        }
    }

    /// Pointer button callback. `resolve` computes the context of the
    /// control under the pointer and is only called when the gate is open.
    ///
    /// Returns whether an event was published.
    pub fn on_click<F>(&self, button: &str, pressed: bool, resolve: F) -> bool
    where
        F: FnOnce() -> Option<UiContext>,
    {
        if !pressed {
            return false;
        }
        self.capture(resolve, |ctx| EventContext::click(ctx, button))
    }

    /// Key press callback. `resolve` computes the context of the focused
    /// control and is only called when the gate is open.
    pub fn on_key_press<F>(&self, vk: Option<u32>, resolve: F) -> bool
    where
        F: FnOnce() -> Option<UiContext>,
    {
        let category = KeyCategory::from_virtual_key(vk);
        self.capture(resolve, |ctx| EventContext::key_press(ctx, category))
    }

    /// Route a payload received from an external hook process.
    pub fn dispatch(&self, message: CaptureMessage) -> bool {
        match message {
            CaptureMessage::Click {
                button,
                pressed,
                context,
            } => self.on_click(&button, pressed, || context),
            CaptureMessage::Key { vk, context } => self.on_key_press(vk, || context),
        }
    }

    fn capture<F, B>(&self, resolve: F, build: B) -> bool
    where
        F: FnOnce() -> Option<UiContext>,
        B: FnOnce(UiContext) -> EventContext,
    {
        if !self.gate.is_open() {
            return false;
        }
        let Some(ctx) = resolve() else {
            return false;
        };
        if !self.allowlist.allows(ctx.app.as_deref()) {
            return false;
        }
        self.sink.publish(build(ctx).into());
        true
    }
}
