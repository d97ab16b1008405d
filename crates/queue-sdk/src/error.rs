//! Errors raised by queue operations.
//!
//! Configuration and validation problems are returned as `Err` before a
//! request leaves the client. Transport and broker failures are carried
//! inside the operation's result instead.

use std::time::Duration;
use thiserror::Error;

/// Where a [`QueueError`] originated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Validation,
    Transport,
    Broker,
}

#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("Queue '{queue_name}' does not exist")]
    QueueNotFound { queue_name: String },

    #[error("Queue '{queue_name}' is full ({max_size} messages)")]
    QueueFull { queue_name: String, max_size: usize },

    #[error("Message not found or no longer held by this client: {message_id}")]
    MessageNotFound { message_id: String },

    #[error("Broker did not answer within {duration:?}")]
    Timeout { duration: Duration },

    #[error("Broker unreachable: {message}")]
    ConnectionFailed { message: String },

    #[error("Broker rejected request ({code}): {message}")]
    BrokerRejected { code: String, message: String },

    #[error(transparent)]
    SerializationError(#[from] SerializationError),

    #[error(transparent)]
    ConfigurationError(#[from] ConfigurationError),

    #[error(transparent)]
    ValidationError(#[from] ValidationError),
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::QueueNotFound { .. }
            | Self::QueueFull { .. }
            | Self::MessageNotFound { .. }
            | Self::BrokerRejected { .. } => ErrorKind::Broker,
            Self::Timeout { .. } | Self::ConnectionFailed { .. } | Self::SerializationError(_) => {
                ErrorKind::Transport
            }
            Self::ConfigurationError(_) => ErrorKind::Configuration,
            Self::ValidationError(_) => ErrorKind::Validation,
        }
    }

    /// Whether repeating the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::QueueFull { .. } | Self::Timeout { .. } | Self::ConnectionFailed { .. }
        )
    }
}

/// Failure to encode a request or decode a broker reply
#[derive(Debug, Clone, Error)]
pub enum SerializationError {
    #[error("Invalid JSON: {message}")]
    Json { message: String },

    #[error("Body is not UTF-8 text")]
    InvalidUtf8,

    #[error("Body is not base64: {message}")]
    InvalidBase64 { message: String },

    #[error("Broker reply lacks '{field}'")]
    MissingField { field: String },
}

impl From<serde_json::Error> for SerializationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    #[error("Configuration is invalid: {message}")]
    Invalid { message: String },

    #[error("Configuration lacks '{key}'")]
    Missing { key: String },

    #[error("Configuration could not be read: {message}")]
    Parsing { message: String },
}

/// A request argument the client refuses to send
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("'{field}' is required")]
    Required { field: String },

    #[error("'{field}' is malformed: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("'{field}' is out of range: {message}")]
    OutOfRange { field: String, message: String },

    #[error("max_receive_count and dead_letter_queue must be set together")]
    DeadLetterPairing,

    #[error("Body of {size} bytes exceeds the {max_size} byte limit")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Batch of {size} messages exceeds the limit of {max_size}")]
    BatchTooLarge { size: usize, max_size: usize },
}

impl ValidationError {
    /// The request field at fault
    pub fn field(&self) -> &str {
        match self {
            Self::Required { field }
            | Self::InvalidFormat { field, .. }
            | Self::OutOfRange { field, .. } => field,
            Self::DeadLetterPairing => "dead_letter_queue",
            Self::MessageTooLarge { .. } => "body",
            Self::BatchTooLarge { .. } => "messages",
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
