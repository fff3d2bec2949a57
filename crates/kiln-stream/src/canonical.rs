//! Canonical event vocabulary
//!
//! Every backend, whatever its native tags, is presented to callers through
//! the same eight event kinds. Tags the mapping table does not know are kept
//! verbatim as [`EventKind::Passthrough`].

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Kind of a canonical event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Human-readable status update
    Progress,
    /// Incremental content chunk
    Stream,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
    /// Artifact payload
    Result,
    /// Informational log line
    Log,
    /// Debug detail
    Debug,
    /// Non-fatal warning
    Warning,
    /// Backend tag with no canonical mapping, relayed unchanged
    Passthrough(String),
}

/// Backend tag to canonical kind
///
/// Adding a backend tag is one line here plus a case in the table test.
pub const TAG_TABLE: &[(&str, EventKind)] = &[
    ("status", EventKind::Progress),
    ("progress", EventKind::Progress),
    ("delta", EventKind::Stream),
    ("token", EventKind::Stream),
    ("chunk", EventKind::Stream),
    ("stream", EventKind::Stream),
    ("done", EventKind::Completed),
    ("complete", EventKind::Completed),
    ("completed", EventKind::Completed),
    ("error", EventKind::Failed),
    ("failed", EventKind::Failed),
    ("result", EventKind::Result),
    ("artifact", EventKind::Result),
    ("log", EventKind::Log),
    ("debug", EventKind::Debug),
    ("trace", EventKind::Debug),
    ("warn", EventKind::Warning),
    ("warning", EventKind::Warning),
];

impl EventKind {
    /// Map a backend tag through [`TAG_TABLE`], passing unknown tags through
    #[must_use]
    pub fn from_backend_tag(tag: &str) -> Self {
        TAG_TABLE
            .iter()
            .find(|(t, _)| *t == tag)
            .map_or_else(|| Self::Passthrough(tag.to_string()), |(_, k)| k.clone())
    }

    /// Parse a canonical name (the inverse of [`EventKind::as_str`])
    #[must_use]
    pub fn from_canonical(name: &str) -> Self {
        match name {
            "progress" => Self::Progress,
            "stream" => Self::Stream,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "result" => Self::Result,
            "log" => Self::Log,
            "debug" => Self::Debug,
            "warning" => Self::Warning,
            other => Self::Passthrough(other.to_string()),
        }
    }

    /// Canonical wire name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Progress => "progress",
            Self::Stream => "stream",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Result => "result",
            Self::Log => "log",
            Self::Debug => "debug",
            Self::Warning => "warning",
            Self::Passthrough(tag) => tag,
        }
    }

    /// `completed` and `failed` end a stream
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event in the canonical vocabulary
///
/// Serialized as `{"type": "<kind>", "data": <payload>}`.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEvent {
    /// Event kind
    pub kind: EventKind,
    /// Backend payload, unchanged
    pub data: Value,
}

impl CanonicalEvent {
    /// Create an event
    #[inline]
    #[must_use]
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self { kind, data }
    }

    /// `progress{message}`
    #[must_use]
    pub fn progress(message: impl Into<String>) -> Self {
        Self::new(EventKind::Progress, json!({ "message": message.into() }))
    }

    /// `stream{contentChunk}`
    #[must_use]
    pub fn stream(chunk: impl Into<String>) -> Self {
        Self::new(EventKind::Stream, json!({ "contentChunk": chunk.into() }))
    }

    /// `warning{message}`
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(EventKind::Warning, json!({ "message": message.into() }))
    }

    /// `failed{code, message}`
    #[must_use]
    pub fn failed(code: &str, message: impl Into<String>) -> Self {
        Self::new(
            EventKind::Failed,
            json!({ "code": code, "message": message.into() }),
        )
    }

    /// `completed{...}`
    #[inline]
    #[must_use]
    pub fn completed(data: Value) -> Self {
        Self::new(EventKind::Completed, data)
    }

    /// True for `completed` and `failed`
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// Read a string field from the payload
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

#[derive(Serialize, Deserialize)]
struct WireEvent<'a> {
    #[serde(rename = "type", borrow)]
    kind: std::borrow::Cow<'a, str>,
    #[serde(default)]
    data: Value,
}

impl Serialize for CanonicalEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireEvent {
            kind: self.kind.as_str().into(),
            data: self.data.clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CanonicalEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireEvent::deserialize(deserializer)?;
        Ok(Self {
            kind: EventKind::from_canonical(&wire.kind),
            data: wire.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mapping_table() {
        let cases = [
            ("status", EventKind::Progress),
            ("progress", EventKind::Progress),
            ("delta", EventKind::Stream),
            ("token", EventKind::Stream),
            ("chunk", EventKind::Stream),
            ("stream", EventKind::Stream),
            ("done", EventKind::Completed),
            ("complete", EventKind::Completed),
            ("completed", EventKind::Completed),
            ("error", EventKind::Failed),
            ("failed", EventKind::Failed),
            ("result", EventKind::Result),
            ("artifact", EventKind::Result),
            ("log", EventKind::Log),
            ("debug", EventKind::Debug),
            ("trace", EventKind::Debug),
            ("warn", EventKind::Warning),
            ("warning", EventKind::Warning),
        ];
        assert_eq!(cases.len(), TAG_TABLE.len());
        for (tag, expected) in cases {
            assert_eq!(EventKind::from_backend_tag(tag), expected, "tag {tag}");
        }
    }

    #[test]
    fn unknown_tag_passes_through() {
        let kind = EventKind::from_backend_tag("thinking");
        assert_eq!(kind, EventKind::Passthrough("thinking".into()));
        assert_eq!(kind.as_str(), "thinking");
        assert!(!kind.is_terminal());
    }

    #[test]
    fn tags_are_case_sensitive() {
        assert_eq!(
            EventKind::from_backend_tag("DONE"),
            EventKind::Passthrough("DONE".into())
        );
    }

    #[test]
    fn wire_shape() {
        let event = CanonicalEvent::failed("TIMEOUT", "engine took too long");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            json!({"type": "failed", "data": {"code": "TIMEOUT", "message": "engine took too long"}})
        );
        let back: CanonicalEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn passthrough_keeps_original_tag_on_the_wire() {
        let event = CanonicalEvent::new(EventKind::Passthrough("thinking".into()), json!({}));
        assert_eq!(serde_json::to_value(&event).unwrap()["type"], "thinking");
    }
}
