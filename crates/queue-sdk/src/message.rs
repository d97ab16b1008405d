//! Messages and the identifiers that address them.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

const MAX_QUEUE_NAME_LEN: usize = 260;
const MAX_CLIENT_ID_LEN: usize = 256;

// ============================================================================
// Identifiers
// ============================================================================

/// Name of a queue on the broker.
///
/// 1 to 260 ASCII letters, digits, `-`, `_` or `.`. The separators `-` and
/// `.` may not lead, trail or appear twice in a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    pub fn new(name: String) -> Result<Self, ValidationError> {
        let invalid = |message: String| ValidationError::InvalidFormat {
            field: "queue_name".to_string(),
            message,
        };

        if !(1..=MAX_QUEUE_NAME_LEN).contains(&name.len()) {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: format!("length must be 1 to {}", MAX_QUEUE_NAME_LEN),
            });
        }

        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(invalid(format!("character {:?} is not allowed", c)));
        }

        let is_separator = |b: &u8| matches!(b, b'-' | b'.');
        let bytes = name.as_bytes();
        if bytes.first().is_some_and(is_separator)
            || bytes.last().is_some_and(is_separator)
            || bytes.windows(2).any(|pair| pair[0] == pair[1] && is_separator(&pair[0]))
        {
            return Err(invalid(
                "'-' and '.' may not lead, trail or repeat".to_string(),
            ));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.to_owned().try_into()
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a consumer.
///
/// The broker tracks received, unacknowledged messages per client, so the id
/// must stay the same for the lifetime of a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: String) -> Result<Self, ValidationError> {
        let field = || "client_id".to_string();

        if id.is_empty() {
            return Err(ValidationError::Required { field: field() });
        }
        if id.len() > MAX_CLIENT_ID_LEN {
            return Err(ValidationError::OutOfRange {
                field: field(),
                message: format!("at most {} characters", MAX_CLIENT_ID_LEN),
            });
        }
        if id.bytes().any(|b| !b.is_ascii() || b.is_ascii_control()) {
            return Err(ValidationError::InvalidFormat {
                field: field(),
                message: "must be printable ASCII".to_string(),
            });
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ClientId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_owned())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Broker-assigned message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Fresh random (UUID v4) identifier
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    /// Any non-empty string; ids come from the broker and are opaque
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err(ValidationError::Required {
                field: "message_id".to_string(),
            }),
            id => Ok(Self(id.to_owned())),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point in time reported by the broker, in UTC
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// `None` for seconds outside the representable range
    pub fn from_unix_seconds(seconds: i64) -> Option<Self> {
        Utc.timestamp_opt(seconds, 0).single().map(Self)
    }

    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    pub fn plus_seconds(&self, seconds: u32) -> Self {
        Self(self.0 + chrono::Duration::seconds(i64::from(seconds)))
    }

    /// Saturates at the latest representable instant
    pub fn plus_duration(&self, duration: std::time::Duration) -> Self {
        chrono::Duration::from_std(duration)
            .ok()
            .and_then(|delta| self.0.checked_add_signed(delta))
            .map_or(Self(DateTime::<Utc>::MAX_UTC), Self)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Delivery Policy
// ============================================================================

/// Routing rule that moves a message to a dead-letter queue once it has been
/// received `max_receive_count` times without being acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterPolicy {
    pub max_receive_count: u32,
    pub queue: QueueName,
}

impl DeadLetterPolicy {
    /// Create a validated dead-letter policy
    pub fn new(max_receive_count: u32, queue: &str) -> Result<Self, ValidationError> {
        if max_receive_count == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_receive_count".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            max_receive_count,
            queue: QueueName::new(queue.to_string())?,
        })
    }
}

/// Delivery attributes the broker attaches to a received message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttributes {
    /// When the broker accepted the message
    pub sent_at: Timestamp,
    /// Position of the message within its queue
    pub sequence: u64,
    /// Number of times the message has been received, including this delivery
    pub receive_count: u32,
    /// Whether the message was routed here from another queue
    pub rerouted: bool,
    /// Queue the message was dead-lettered from, if rerouted
    pub rerouted_from_queue: Option<QueueName>,
    pub expiration_at: Option<Timestamp>,
    pub delayed_to: Option<Timestamp>,
}

// ============================================================================
// Message Types
// ============================================================================

/// A queue message.
///
/// Built client-side with a body and optional delivery controls, then handed
/// to [`crate::QueueClient::send_message`]. Messages returned by receive and
/// peek carry the broker-assigned `message_id` and `attributes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "crate::converter::base64_body")]
    pub body: Bytes,
    pub metadata: Option<String>,
    pub tags: HashMap<String, String>,
    pub message_id: Option<MessageId>,
    pub delay_seconds: Option<u32>,
    pub expiration_seconds: Option<u32>,
    pub max_receive_count: Option<u32>,
    pub dead_letter_queue: Option<String>,
    pub attributes: Option<MessageAttributes>,
}

impl Message {
    /// Create new message with body
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    /// Replace the message body
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Attach a free-form metadata annotation
    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Add message tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Keep the message invisible to receivers for the given number of seconds
    pub fn with_delay_seconds(mut self, seconds: u32) -> Self {
        self.delay_seconds = Some(seconds);
        self
    }

    /// Discard the message if it has not been received within the given number of seconds
    pub fn with_expiration_seconds(mut self, seconds: u32) -> Self {
        self.expiration_seconds = Some(seconds);
        self
    }

    /// Number of receives allowed before the message is dead-lettered.
    ///
    /// Must be paired with [`Message::with_dead_letter_queue`].
    pub fn with_max_receive_count(mut self, count: u32) -> Self {
        self.max_receive_count = Some(count);
        self
    }

    /// Queue that receives the message after `max_receive_count` is exhausted.
    ///
    /// Must be paired with [`Message::with_max_receive_count`].
    pub fn with_dead_letter_queue(mut self, queue: impl Into<String>) -> Self {
        self.dead_letter_queue = Some(queue.into());
        self
    }

    /// Apply a complete dead-letter policy
    pub fn with_dead_letter_policy(self, policy: DeadLetterPolicy) -> Self {
        self.with_max_receive_count(policy.max_receive_count)
            .with_dead_letter_queue(policy.queue.as_str())
    }

    /// Resolve the dead-letter pair into a policy.
    ///
    /// Returns `Ok(None)` when neither field is set and an error when only one is.
    pub fn dead_letter_policy(&self) -> Result<Option<DeadLetterPolicy>, ValidationError> {
        match (self.max_receive_count, self.dead_letter_queue.as_deref()) {
            (None, None) => Ok(None),
            (Some(count), Some(queue)) => DeadLetterPolicy::new(count, queue).map(Some),
            _ => Err(ValidationError::DeadLetterPairing),
        }
    }

    /// Receive count reported by the broker, zero for messages never received
    pub fn receive_count(&self) -> u32 {
        self.attributes
            .as_ref()
            .map(|attributes| attributes.receive_count)
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
