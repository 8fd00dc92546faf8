//! Message type handed out by a source
//!
//! A [`Message`] is what the source delivers and what the spout hands back
//! to the host as the correlation token of an emitted record. Cloning is
//! cheap: the payload is `Bytes`, so every clone shares the same buffer.
//!
//! ```text
//! Source ──► Message ──► mapper ──► (record, token = Message) ──► host
//!                                                      │
//!                              ack(token) / fail(token) ◄┘
//! ```

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;

/// Stable identity of a physical message
///
/// Sources must hand out the same id when they redeliver a message, so the
/// retry ledger can key on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh ULID-based id
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A message received from the source
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use retry_spout::message::Message;
///
/// let msg = Message::new("orders", Bytes::from(r#"{"id": 1}"#));
/// assert_eq!(msg.topic, "orders");
/// assert_eq!(msg.payload_len(), 9);
/// ```
#[derive(Debug, Clone)]
pub struct Message {
    /// Identity, stable across redelivery
    pub id: MessageId,

    /// Topic the message was published on
    pub topic: String,

    /// Publish time, Unix nanoseconds
    pub publish_time: i64,

    /// Producer-supplied properties
    pub properties: HashMap<String, String>,

    /// Opaque payload
    pub payload: Bytes,
}

impl Message {
    /// Create a message with a generated id and the current publish time
    pub fn new(topic: impl Into<String>, payload: Bytes) -> Self {
        Self::with_id(MessageId::generate(), topic, payload)
    }

    /// Create a message with an explicit id
    pub fn with_id(id: impl Into<MessageId>, topic: impl Into<String>, payload: Bytes) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            publish_time: chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
            properties: HashMap::new(),
            payload,
        }
    }

    /// Add a property to the message
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Payload as a string slice (if valid UTF-8)
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Payload length in bytes
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}
