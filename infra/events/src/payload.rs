//! Event payloads.
//!
//! Known event types carry a typed payload; anything else rides on
//! [`Payload::Fields`], an open key/value map. Expected pairing:
//!
//! | Event type                       | Variant                  |
//! |----------------------------------|--------------------------|
//! | `key_input`                      | [`Payload::KeyInput`]     |
//! | `clipboard`                      | [`Payload::Clipboard`]    |
//! | `app_switch`                     | [`Payload::AppSwitch`]    |
//! | `session_start`, `session_end`   | [`Payload::Session`]      |
//! | `permission`                     | [`Payload::Permission`]   |
//! | `system_status`                  | [`Payload::SystemStatus`] |
//! | any                              | [`Payload::Fields`]       |
//!
//! The bus does not validate the pairing; the typed constructors on
//! [`Event`](crate::Event) produce it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    KeyInput(KeyInput),
    Clipboard(Clipboard),
    AppSwitch(AppSwitch),
    Session(Session),
    Permission(Permission),
    SystemStatus(SystemStatus),
    Fields(Map<String, Value>),
}

impl Payload {
    /// An empty open map.
    #[must_use]
    pub fn empty() -> Self {
        Self::Fields(Map::new())
    }

    /// Looks up a field in an open map payload.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Fields(map) => map.get(key),
            _ => None,
        }
    }

    /// Inserts into an open map payload. Typed payloads are left untouched and
    /// the value is handed back.
    pub fn insert_field(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        match self {
            Self::Fields(map) => {
                map.insert(key.into(), value);
                None
            },
            _ => Some(value),
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

/// A key press as reported by the input monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyInput {
    pub key: String,
    pub modifiers: Vec<String>,
    /// Set when the press completed a registered hotkey.
    pub hotkey: Option<String>,
}

impl KeyInput {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), ..Self::default() }
    }

    #[must_use]
    pub fn with_modifier(mut self, modifier: impl Into<String>) -> Self {
        self.modifiers.push(modifier.into());
        self
    }

    #[must_use]
    pub fn with_hotkey(mut self, hotkey: impl Into<String>) -> Self {
        self.hotkey = Some(hotkey.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Clipboard {
    /// e.g. `text`, `image`, `files`.
    pub content_kind: String,
    pub length: usize,
    pub preview: Option<String>,
}

impl Clipboard {
    #[must_use]
    pub fn text(length: usize) -> Self {
        Self { content_kind: "text".to_owned(), length, preview: None }
    }

    #[must_use]
    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = Some(preview.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSwitch {
    pub from: Option<String>,
    pub to: String,
    pub window_title: Option<String>,
}

impl AppSwitch {
    #[must_use]
    pub fn to(app: impl Into<String>) -> Self {
        Self { to: app.into(), ..Self::default() }
    }

    #[must_use]
    pub fn from_app(mut self, app: impl Into<String>) -> Self {
        self.from = Some(app.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    pub session_id: String,
    pub reason: Option<String>,
}

impl Session {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), reason: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Permission {
    /// e.g. `accessibility`, `input_monitoring`.
    pub permission: String,
    pub granted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemStatus {
    pub status: String,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_payload_is_tagged() {
        let payload = Payload::KeyInput(KeyInput::new("K").with_modifier("cmd"));
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "kind": "key_input",
                "data": { "key": "K", "modifiers": ["cmd"], "hotkey": null }
            })
        );
    }

    #[test]
    fn open_map_accepts_fields_and_typed_rejects_them() {
        let mut open = Payload::empty();
        assert!(open.insert_field("temperature", json!(21.5)).is_none());
        assert_eq!(open.field("temperature"), Some(&json!(21.5)));

        let mut typed = Payload::Clipboard(Clipboard::text(4));
        assert_eq!(typed.insert_field("x", json!(1)), Some(json!(1)));
        assert!(typed.field("x").is_none());
    }
}
