//! The event record and its classification.
//!
//! An [`Event`] is created by a producer, optionally enriched with metadata and
//! an [`EventContext`], and then handed to the bus by value. From that point on
//! it is shared behind an `Arc` and can no longer change.

use crate::error::EventTypeError;
use crate::id::EventId;
use crate::payload::{
    AppSwitch, Clipboard, KeyInput, Payload, Permission, Session, SystemStatus,
};
use chrono::{DateTime, Utc};
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reserved topic name that matches every event type.
pub const WILDCARD: &str = "*";

/// The semantic category of an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EventType {
    KeyInput,
    Clipboard,
    AppSwitch,
    SessionStart,
    SessionEnd,
    Permission,
    SystemStatus,
    /// Any other non-empty type name.
    Custom(String),
}

impl EventType {
    /// Builds an event type from a name, resolving known names to their variant.
    ///
    /// # Errors
    /// Returns [`EventTypeError::Empty`] for a blank name and
    /// [`EventTypeError::Reserved`] for the wildcard.
    pub fn parse(name: &str) -> Result<Self, EventTypeError> {
        let name = name.trim();
        match name {
            "" => Err(EventTypeError::Empty),
            WILDCARD => Err(EventTypeError::Reserved),
            "key_input" => Ok(Self::KeyInput),
            "clipboard" => Ok(Self::Clipboard),
            "app_switch" => Ok(Self::AppSwitch),
            "session_start" => Ok(Self::SessionStart),
            "session_end" => Ok(Self::SessionEnd),
            "permission" => Ok(Self::Permission),
            "system_status" => Ok(Self::SystemStatus),
            other => Ok(Self::Custom(other.to_owned())),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::KeyInput => "key_input",
            Self::Clipboard => "clipboard",
            Self::AppSwitch => "app_switch",
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::Permission => "permission",
            Self::SystemStatus => "system_status",
            Self::Custom(name) => name,
        }
    }

    /// `Custom` can be constructed directly, bypassing [`parse`](Self::parse).
    /// A custom name must be exactly what `parse` would produce, otherwise a
    /// subscription on it could never match a published event.
    pub(crate) fn validate(&self) -> Result<(), EventTypeError> {
        let Self::Custom(name) = self else {
            return Ok(());
        };
        match Self::parse(name)? {
            Self::Custom(parsed) if parsed == *name => Ok(()),
            _ => Err(EventTypeError::NotCanonical { name: name.clone() }),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EventType {
    type Error = EventTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        match value {
            EventType::Custom(name) => name,
            known => known.as_str().to_owned(),
        }
    }
}

/// Subscription key: a single event type or every type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Topic {
    /// The `"*"` wildcard.
    All,
    Type(EventType),
}

impl Topic {
    /// Returns `true` when an event of `event_type` should reach this topic.
    #[must_use]
    pub fn matches(&self, event_type: &EventType) -> bool {
        match self {
            Self::All => true,
            Self::Type(t) => t == event_type,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::All => WILDCARD,
            Self::Type(t) => t.as_str(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EventType> for Topic {
    fn from(value: EventType) -> Self {
        Self::Type(value)
    }
}

impl FromStr for Topic {
    type Err = EventTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim() == WILDCARD {
            return Ok(Self::All);
        }
        EventType::parse(s).map(Self::Type)
    }
}

impl TryFrom<String> for Topic {
    type Error = EventTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Topic> for String {
    fn from(value: Topic) -> Self {
        match value {
            Topic::All => WILDCARD.to_owned(),
            Topic::Type(t) => t.into(),
        }
    }
}

/// Descriptive snapshot of the environment when the event was published.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventContext {
    pub app_name: Option<String>,
    pub bundle_id: Option<String>,
    pub window_title: Option<String>,
    pub process_id: Option<u32>,
}

impl EventContext {
    #[must_use]
    pub fn app(name: impl Into<String>) -> Self {
        Self { app_name: Some(name.into()), ..Self::default() }
    }

    #[must_use]
    pub fn with_window_title(mut self, title: impl Into<String>) -> Self {
        self.window_title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_bundle_id(mut self, bundle_id: impl Into<String>) -> Self {
        self.bundle_id = Some(bundle_id.into());
        self
    }

    #[must_use]
    pub const fn with_process_id(mut self, pid: u32) -> Self {
        self.process_id = Some(pid);
        self
    }
}

/// An immutable, timestamped record of something that happened.
///
/// Identity, type and timestamp are fixed at construction. Payload, metadata
/// and context can be filled in by the producer until the event is published;
/// the bus takes ownership on publish and shares it read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    #[serde(rename = "type")]
    event_type: EventType,
    timestamp: DateTime<Utc>,
    payload: Payload,
    #[serde(default)]
    metadata: FxHashMap<String, String>,
    #[serde(default)]
    context: Option<EventContext>,
}

impl Event {
    #[must_use]
    pub fn new(event_type: EventType, payload: Payload) -> Self {
        Self {
            id: EventId::generate(),
            event_type,
            timestamp: Utc::now(),
            payload,
            metadata: FxHashMap::default(),
            context: None,
        }
    }

    /// An event carrying an open field map, typically for `Custom` types.
    #[must_use]
    pub fn with_fields(
        event_type: EventType,
        fields: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) -> Self {
        Self::new(event_type, Payload::Fields(fields.into_iter().collect()))
    }

    #[must_use]
    pub fn key_input(payload: KeyInput) -> Self {
        Self::new(EventType::KeyInput, Payload::KeyInput(payload))
    }

    #[must_use]
    pub fn clipboard(payload: Clipboard) -> Self {
        Self::new(EventType::Clipboard, Payload::Clipboard(payload))
    }

    #[must_use]
    pub fn app_switch(payload: AppSwitch) -> Self {
        Self::new(EventType::AppSwitch, Payload::AppSwitch(payload))
    }

    #[must_use]
    pub fn session_start(payload: Session) -> Self {
        Self::new(EventType::SessionStart, Payload::Session(payload))
    }

    #[must_use]
    pub fn session_end(payload: Session) -> Self {
        Self::new(EventType::SessionEnd, Payload::Session(payload))
    }

    #[must_use]
    pub fn permission(payload: Permission) -> Self {
        Self::new(EventType::Permission, Payload::Permission(payload))
    }

    #[must_use]
    pub fn system_status(payload: SystemStatus) -> Self {
        Self::new(EventType::SystemStatus, Payload::SystemStatus(payload))
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: EventContext) -> Self {
        self.context = Some(context);
        self
    }

    #[must_use]
    pub const fn id(&self) -> &EventId {
        &self.id
    }

    #[must_use]
    pub const fn event_type(&self) -> &EventType {
        &self.event_type
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Producer-side access before publish.
    pub const fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    #[must_use]
    pub const fn metadata(&self) -> &FxHashMap<String, String> {
        &self.metadata
    }

    pub const fn metadata_mut(&mut self) -> &mut FxHashMap<String, String> {
        &mut self.metadata
    }

    #[must_use]
    pub const fn context(&self) -> Option<&EventContext> {
        self.context.as_ref()
    }

    pub(crate) fn attach_context_if_missing(&mut self, context: Option<EventContext>) {
        if self.context.is_none() {
            self.context = context;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_names_round_trip_through_strings() {
        for name in [
            "key_input",
            "clipboard",
            "app_switch",
            "session_start",
            "session_end",
            "permission",
            "system_status",
        ] {
            let parsed: EventType = name.parse().unwrap();
            assert!(!matches!(parsed, EventType::Custom(_)), "{name} should be a known type");
            assert_eq!(parsed.as_str(), name);
        }
    }

    #[test]
    fn unknown_names_become_custom() {
        assert_eq!(
            EventType::parse("hotkey.fired").unwrap(),
            EventType::Custom("hotkey.fired".into())
        );
    }

    #[test]
    fn empty_and_wildcard_are_rejected_as_event_types() {
        assert_eq!(EventType::parse("  "), Err(EventTypeError::Empty));
        assert_eq!(EventType::parse("*"), Err(EventTypeError::Reserved));
        assert_eq!(EventType::Custom(String::new()).validate(), Err(EventTypeError::Empty));
    }

    #[test]
    fn hand_built_custom_types_must_be_canonical() {
        assert!(EventType::Custom("hotkey.fired".into()).validate().is_ok());
        assert!(EventType::KeyInput.validate().is_ok());
        for name in ["key_input", " sensor ", "*"] {
            assert!(EventType::Custom(name.into()).validate().is_err(), "{name} accepted");
        }
        assert!(matches!(
            EventType::Custom("clipboard".into()).validate(),
            Err(EventTypeError::NotCanonical { .. })
        ));
    }

    #[test]
    fn wildcard_topic_matches_everything() {
        let all: Topic = "*".parse().unwrap();
        assert_eq!(all, Topic::All);
        assert!(all.matches(&EventType::Clipboard));

        let keys = Topic::from(EventType::KeyInput);
        assert!(keys.matches(&EventType::KeyInput));
        assert!(!keys.matches(&EventType::Clipboard));
    }

    #[test]
    fn events_get_unique_ids_and_keep_metadata() {
        let a = Event::key_input(KeyInput::new("A"));
        let b = Event::key_input(KeyInput::new("A")).with_metadata("source", "hook");
        assert_ne!(a.id(), b.id());
        assert_eq!(b.metadata().get("source").map(String::as_str), Some("hook"));
        assert_eq!(b.event_type(), &EventType::KeyInput);
    }

    #[test]
    fn context_provider_never_overrides_producer_context() {
        let mut event =
            Event::clipboard(Clipboard::text(3)).with_context(EventContext::app("Editor"));
        event.attach_context_if_missing(Some(EventContext::app("Other")));
        assert_eq!(event.context().and_then(|c| c.app_name.as_deref()), Some("Editor"));
    }

    #[test]
    fn event_serializes_type_as_string() {
        let event = Event::with_fields(
            EventType::Custom("sensor".into()),
            [("reading".to_owned(), json!(42))],
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "sensor");
        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }
}
