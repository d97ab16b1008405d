//! Typed outcomes of queue operations.
//!
//! Transport and broker failures do not abort an operation; they are carried
//! inside these results so that batch operations can report partial failure.
//! Each result wraps a `Result`, which makes "success with data" and "failure
//! with an error" mutually exclusive.

use crate::error::QueueError;
use crate::message::{Message, MessageId, Timestamp};

/// Broker acknowledgement of an enqueued message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: MessageId,
    pub sent_at: Timestamp,
    pub expiration_at: Option<Timestamp>,
    pub delayed_to: Option<Timestamp>,
}

/// Outcome of sending a single message
#[derive(Debug, Clone)]
pub struct SendMessageResult {
    outcome: Result<SentMessage, QueueError>,
}

impl SendMessageResult {
    pub fn sent(message: SentMessage) -> Self {
        Self {
            outcome: Ok(message),
        }
    }

    pub fn failed(error: QueueError) -> Self {
        Self {
            outcome: Err(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn error(&self) -> Option<&QueueError> {
        self.outcome.as_ref().err()
    }

    pub fn message_id(&self) -> Option<&MessageId> {
        self.sent_message().map(|sent| &sent.message_id)
    }

    pub fn sent_at(&self) -> Option<&Timestamp> {
        self.sent_message().map(|sent| &sent.sent_at)
    }

    pub fn sent_message(&self) -> Option<&SentMessage> {
        self.outcome.as_ref().ok()
    }

    pub fn into_result(self) -> Result<SentMessage, QueueError> {
        self.outcome
    }
}

impl From<Result<SentMessage, QueueError>> for SendMessageResult {
    fn from(outcome: Result<SentMessage, QueueError>) -> Self {
        Self { outcome }
    }
}

/// Outcome of a batch send, one entry per input message in input order
#[derive(Debug, Clone)]
pub struct SendBatchMessageResult {
    pub batch_id: String,
    results: Vec<SendMessageResult>,
}

impl SendBatchMessageResult {
    pub fn new(batch_id: String, results: Vec<SendMessageResult>) -> Self {
        Self { batch_id, results }
    }

    pub fn results(&self) -> &[SendMessageResult] {
        &self.results
    }

    /// True if any message in the batch failed
    pub fn have_errors(&self) -> bool {
        self.results.iter().any(SendMessageResult::is_error)
    }

    pub fn into_results(self) -> Vec<SendMessageResult> {
        self.results
    }
}

/// Messages returned by a receive or peek request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedBatch {
    pub messages: Vec<Message>,
    /// Messages discarded for expiration while the request was serviced
    pub messages_expired: u32,
}

/// Outcome of a receive or peek request
#[derive(Debug, Clone)]
pub struct ReceiveMessagesResponse {
    pub request_id: String,
    pub is_peek: bool,
    outcome: Result<ReceivedBatch, QueueError>,
}

impl ReceiveMessagesResponse {
    pub fn received(request_id: String, is_peek: bool, batch: ReceivedBatch) -> Self {
        Self {
            request_id,
            is_peek,
            outcome: Ok(batch),
        }
    }

    pub fn failed(request_id: String, is_peek: bool, error: QueueError) -> Self {
        Self {
            request_id,
            is_peek,
            outcome: Err(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn error(&self) -> Option<&QueueError> {
        self.outcome.as_ref().err()
    }

    /// Received messages in broker order; empty on error
    pub fn messages(&self) -> &[Message] {
        match &self.outcome {
            Ok(batch) => &batch.messages,
            Err(_) => &[],
        }
    }

    pub fn messages_received(&self) -> usize {
        self.messages().len()
    }

    pub fn messages_expired(&self) -> u32 {
        self.outcome
            .as_ref()
            .map(|batch| batch.messages_expired)
            .unwrap_or(0)
    }

    pub fn into_result(self) -> Result<ReceivedBatch, QueueError> {
        self.outcome
    }
}

/// Outcome of acknowledging every outstanding message of a client
#[derive(Debug, Clone)]
pub struct AckAllMessagesResponse {
    pub request_id: String,
    outcome: Result<u64, QueueError>,
}

impl AckAllMessagesResponse {
    pub fn acknowledged(request_id: String, affected_messages: u64) -> Self {
        Self {
            request_id,
            outcome: Ok(affected_messages),
        }
    }

    pub fn failed(request_id: String, error: QueueError) -> Self {
        Self {
            request_id,
            outcome: Err(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn error(&self) -> Option<&QueueError> {
        self.outcome.as_ref().err()
    }

    /// Number of acknowledged messages; zero on error
    pub fn affected_messages(&self) -> u64 {
        self.outcome.as_ref().copied().unwrap_or(0)
    }

    pub fn into_result(self) -> Result<u64, QueueError> {
        self.outcome
    }
}

/// Outcome of acknowledging or rejecting one message
#[derive(Debug, Clone)]
pub struct AckMessageResponse {
    pub message_id: MessageId,
    outcome: Result<(), QueueError>,
}

impl AckMessageResponse {
    pub fn new(message_id: MessageId, outcome: Result<(), QueueError>) -> Self {
        Self {
            message_id,
            outcome,
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn error(&self) -> Option<&QueueError> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> Result<(), QueueError> {
        self.outcome
    }
}

#[cfg(test)]
#[path = "results_tests.rs"]
mod tests;
