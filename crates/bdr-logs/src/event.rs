//! Events accepted by the engine.
//!
//! The engine does not interpret an event beyond its identifier. Every field
//! the producer sent, known or not and whatever its JSON type, is written back
//! out on a single line. A field sent as `null` stays `null`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Producer-assigned event identifier.
///
/// Kept exactly as sent: producers use strings, integers of either sign and
/// occasionally floats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Value);

impl EventId {
    /// The identifier as received.
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

impl From<Value> for EventId {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(Value::from(s))
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(Value::from(s))
    }
}

impl From<u64> for EventId {
    fn from(n: u64) -> Self {
        Self(Value::from(n))
    }
}

impl From<i64> for EventId {
    fn from(n: i64) -> Self {
        Self(Value::from(n))
    }
}

/// Reads a field that was present on the wire, `null` included.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// A structured event record.
///
/// Known fields are `None` only when absent from the input, so an explicit
/// `null` is written back as `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Producer timestamp, usually an ISO string or epoch milliseconds. Not
    /// used for partitioning.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    /// Unique event identifier.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    /// Event type tag, e.g. `navigation.commit`.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<Value>,
    /// Opaque payload.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Any other fields the producer sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    /// An event of the given type with no other fields set.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: Some(Value::String(event_type.into())),
            ..Self::default()
        }
    }

    /// Sets the identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<EventId>) -> Self {
        self.event_id = Some(id.into());
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<Value>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The event type when it was sent as a string.
    pub fn type_name(&self) -> Option<&str> {
        self.event_type.as_ref().and_then(Value::as_str)
    }

    /// Compact single-line JSON encoding, without the trailing newline.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
