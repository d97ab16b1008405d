//! Transport seam between the queue client and a broker.
//!
//! The client turns each operation into one of the request types below and
//! hands it to a [`Transport`]. Implementations decide how the request travels
//! (HTTP, in-process) and map failures onto [`QueueError`]: connectivity
//! problems become transport errors, rejections become broker errors.

use crate::config::TransportType;
use crate::error::QueueError;
use crate::message::{ClientId, DeadLetterPolicy, Message, MessageId, QueueName, Timestamp};
use crate::results::{ReceivedBatch, SentMessage};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

/// A validated message ready to be enqueued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub client_id: ClientId,
    pub queue: QueueName,
    pub body: Bytes,
    pub metadata: Option<String>,
    pub tags: HashMap<String, String>,
    pub delay_seconds: u32,
    pub expiration_seconds: u32,
    pub dead_letter: Option<DeadLetterPolicy>,
}

impl SendRequest {
    /// Snapshot of the message as seen by the broker
    pub fn to_message(&self) -> Message {
        Message {
            body: self.body.clone(),
            metadata: self.metadata.clone(),
            tags: self.tags.clone(),
            ..Message::default()
        }
    }
}

/// Long-poll request for messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub request_id: String,
    pub client_id: ClientId,
    pub queue: QueueName,
    pub max_messages: u32,
    pub wait_timeout_seconds: u32,
    /// Peek leaves delivery state untouched
    pub is_peek: bool,
    pub visibility_timeout_seconds: u32,
}

/// Acknowledge every outstanding message of a client on a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckAllRequest {
    pub request_id: String,
    pub client_id: ClientId,
    pub queue: QueueName,
}

/// What to do with a single outstanding message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Remove the message permanently
    Ack,
    /// Make the message visible again right away
    Reject,
}

/// Settle one outstanding message held by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleRequest {
    pub client_id: ClientId,
    pub queue: QueueName,
    pub message_id: MessageId,
    pub settlement: Settlement,
}

/// Broker reply to a send, before it is folded into a result
pub type SendReply = SentMessage;

/// Timestamps derived from the broker's acceptance time
pub fn schedule_for(
    request: &SendRequest,
    sent_at: &Timestamp,
) -> (Option<Timestamp>, Option<Timestamp>) {
    let expiration_at =
        (request.expiration_seconds > 0).then(|| sent_at.plus_seconds(request.expiration_seconds));
    let delayed_to =
        (request.delay_seconds > 0).then(|| sent_at.plus_seconds(request.delay_seconds));
    (expiration_at, delayed_to)
}

/// Interface implemented by broker transports (HTTP, in-memory)
#[async_trait]
pub trait Transport: Send + Sync {
    /// Enqueue one message
    async fn send_message(&self, request: &SendRequest) -> Result<SendReply, QueueError>;

    /// Enqueue several messages in one exchange.
    ///
    /// The outer error means the exchange itself failed; the inner results
    /// are per message, in request order.
    async fn send_messages(
        &self,
        batch_id: &str,
        requests: &[SendRequest],
    ) -> Result<Vec<Result<SendReply, QueueError>>, QueueError>;

    /// Receive or peek messages, waiting up to the request's wait timeout
    async fn receive_messages(&self, request: &ReceiveRequest)
        -> Result<ReceivedBatch, QueueError>;

    /// Acknowledge all outstanding messages, returning how many were affected
    async fn ack_all_messages(&self, request: &AckAllRequest) -> Result<u64, QueueError>;

    /// Acknowledge or reject one outstanding message
    async fn settle_message(&self, request: &SettleRequest) -> Result<(), QueueError>;

    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Whether [`Transport::send_messages`] carries a batch in one exchange.
    ///
    /// Transports without a batch endpoint return `false` and the client
    /// sends each message on its own, concurrently.
    fn supports_batching(&self) -> bool {
        true
    }
}
