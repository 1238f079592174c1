//! Message envelope exchanged on the event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::id::new_id;

/// Open key/value payload carried by a [`Message`]
pub type Payload = Map<String, Value>;

/// The unit exchanged on the bus
///
/// Once published a message is shared behind an `Arc` and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Topic / event name
    #[serde(rename = "type")]
    pub r#type: String,

    /// Unique per message instance
    pub id: String,

    /// Creation time, ISO-8601 on the wire
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,

    /// Unicast target; also delivered to `topic:targetId` subscribers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,

    #[serde(default)]
    pub payload: Payload,
}

impl Message {
    /// Create a message of the given type with a fresh id and timestamp
    pub fn new(r#type: impl Into<String>, payload: Payload) -> Self {
        Self {
            r#type: r#type.into(),
            id: new_id("msg"),
            timestamp: Utc::now(),
            sender_id: None,
            target_id: None,
            payload,
        }
    }

    /// Build a message from a JSON object literal; non-object values become an empty payload
    pub fn from_json(r#type: impl Into<String>, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Payload::new(),
        };
        Self::new(r#type, payload)
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    /// Get a string field from the payload
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Get a boolean field from the payload
    pub fn bool_field(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(Value::as_bool)
    }
}
