//! Queue client bound to one queue and one client identity.
//!
//! The client validates input locally, hands requests to a [`Transport`] and
//! folds whatever the transport reports into result values. Configuration and
//! validation problems are returned as `Err` before anything reaches the
//! broker; transport and broker failures come back inside the results so that
//! batch callers can inspect each item.

use crate::config::{QueueConfig, TransportConfig, TransportType};
use crate::error::{QueueError, ValidationError};
use crate::message::{ClientId, DeadLetterPolicy, Message, MessageId, QueueName};
use crate::providers::{HttpTransport, InMemoryTransport};
use crate::results::{
    AckAllMessagesResponse, AckMessageResponse, ReceiveMessagesResponse, SendBatchMessageResult,
    SendMessageResult,
};
use crate::transport::{
    AckAllRequest, ReceiveRequest, SendReply, SendRequest, Settlement, SettleRequest, Transport,
};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Handle for sending, receiving and acknowledging messages on one queue.
///
/// Cheap to clone; clones share the transport. Identity is fixed at
/// construction.
#[derive(Clone)]
pub struct QueueClient {
    transport: Arc<dyn Transport>,
    config: QueueConfig,
    queue_name: QueueName,
    client_id: ClientId,
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("queue_name", &self.queue_name)
            .field("client_id", &self.client_id)
            .field("server_address", &self.config.server_address)
            .field("transport", &self.transport.transport_type())
            .finish()
    }
}

impl QueueClient {
    /// Create a client over an existing transport.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConfigurationError`] when `queue_name`,
    /// `client_id` or `server_address` is missing or invalid.
    pub fn new(config: QueueConfig, transport: Arc<dyn Transport>) -> Result<Self, QueueError> {
        let (queue_name, client_id) = config.validate()?;

        info!(
            queue = %queue_name,
            client_id = %client_id,
            server_address = %config.server_address,
            transport = ?transport.transport_type(),
            "Queue client created"
        );

        Ok(Self {
            transport,
            config,
            queue_name,
            client_id,
        })
    }

    pub fn queue_name(&self) -> &QueueName {
        &self.queue_name
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn server_address(&self) -> &str {
        &self.config.server_address
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn transport_type(&self) -> TransportType {
        self.transport.transport_type()
    }

    /// Send a single message.
    ///
    /// Delay, expiration and dead-letter settings on the message are passed
    /// to the broker as delivery directives.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ValidationError`] when the message is malformed.
    /// Transport and broker failures are reported through the result.
    pub async fn send_message(&self, message: &Message) -> Result<SendMessageResult, QueueError> {
        let request = self.prepare(message)?;

        debug!(
            queue = %self.queue_name,
            body_size = request.body.len(),
            delay_seconds = request.delay_seconds,
            expiration_seconds = request.expiration_seconds,
            "Sending message"
        );

        let outcome = self.transport.send_message(&request).await;
        match &outcome {
            Ok(sent) => debug!(
                queue = %self.queue_name,
                message_id = %sent.message_id,
                "Message sent"
            ),
            Err(error) => warn!(queue = %self.queue_name, error = %error, "Message send failed"),
        }

        Ok(SendMessageResult::from(outcome))
    }

    /// Send several messages, reporting an outcome per message in input order.
    ///
    /// A malformed message becomes an error entry at its own index and does
    /// not prevent the others from being sent.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::BatchTooLarge`] when the batch exceeds
    /// `max_batch_size`.
    pub async fn send_messages_batch(
        &self,
        messages: &[Message],
    ) -> Result<SendBatchMessageResult, QueueError> {
        if messages.len() > self.config.max_batch_size {
            return Err(ValidationError::BatchTooLarge {
                size: messages.len(),
                max_size: self.config.max_batch_size,
            }
            .into());
        }

        let batch_id = uuid::Uuid::new_v4().to_string();
        let prepared: Vec<Result<SendRequest, QueueError>> = messages
            .iter()
            .map(|message| self.prepare(message).map_err(QueueError::from))
            .collect();
        let requests: Vec<SendRequest> = prepared
            .iter()
            .filter_map(|request| request.as_ref().ok().cloned())
            .collect();

        debug!(
            queue = %self.queue_name,
            batch_id = %batch_id,
            total = messages.len(),
            valid = requests.len(),
            "Sending message batch"
        );

        let mut dispatched = self.dispatch_batch(&batch_id, &requests).await.into_iter();

        let results: Vec<SendMessageResult> = prepared
            .into_iter()
            .map(|request| match request {
                Ok(_) => SendMessageResult::from(dispatched.next().unwrap_or_else(|| {
                    Err(QueueError::BrokerRejected {
                        code: "batch".to_string(),
                        message: "No result returned for message".to_string(),
                    })
                })),
                Err(error) => SendMessageResult::failed(error),
            })
            .collect();

        let result = SendBatchMessageResult::new(batch_id, results);
        if result.have_errors() {
            let failed = result.results().iter().filter(|r| r.is_error()).count();
            warn!(
                queue = %self.queue_name,
                batch_id = %result.batch_id,
                failed,
                total = messages.len(),
                "Message batch completed with errors"
            );
        }

        Ok(result)
    }

    async fn dispatch_batch(
        &self,
        batch_id: &str,
        requests: &[SendRequest],
    ) -> Vec<Result<SendReply, QueueError>> {
        if requests.is_empty() {
            return Vec::new();
        }

        if !self.transport.supports_batching() {
            return join_all(
                requests
                    .iter()
                    .map(|request| self.transport.send_message(request)),
            )
            .await;
        }

        match self.transport.send_messages(batch_id, requests).await {
            Ok(results) => results,
            Err(error) => vec![Err(error); requests.len()],
        }
    }

    /// Receive up to `max_messages`, waiting up to `wait_timeout_seconds` for
    /// the first one.
    ///
    /// Received messages stay hidden for the configured visibility timeout and
    /// are redelivered unless acknowledged.
    pub async fn receive_messages(
        &self,
        max_messages: u32,
        wait_timeout_seconds: u32,
    ) -> Result<ReceiveMessagesResponse, QueueError> {
        self.receive(max_messages, wait_timeout_seconds, false).await
    }

    /// Look at up to `max_messages` without consuming them
    pub async fn peek_messages(
        &self,
        max_messages: u32,
        wait_timeout_seconds: u32,
    ) -> Result<ReceiveMessagesResponse, QueueError> {
        self.receive(max_messages, wait_timeout_seconds, true).await
    }

    async fn receive(
        &self,
        max_messages: u32,
        wait_timeout_seconds: u32,
        is_peek: bool,
    ) -> Result<ReceiveMessagesResponse, QueueError> {
        if max_messages == 0 || max_messages > self.config.max_receive_messages {
            return Err(ValidationError::OutOfRange {
                field: "max_messages".to_string(),
                message: format!("must be between 1 and {}", self.config.max_receive_messages),
            }
            .into());
        }

        if wait_timeout_seconds > self.config.max_wait_timeout_seconds {
            return Err(ValidationError::OutOfRange {
                field: "wait_timeout_seconds".to_string(),
                message: format!("must not exceed {}", self.config.max_wait_timeout_seconds),
            }
            .into());
        }

        let request = ReceiveRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            client_id: self.client_id.clone(),
            queue: self.queue_name.clone(),
            max_messages,
            wait_timeout_seconds,
            is_peek,
            visibility_timeout_seconds: self.config.visibility_timeout_seconds,
        };

        debug!(
            queue = %self.queue_name,
            request_id = %request.request_id,
            max_messages,
            wait_timeout_seconds,
            is_peek,
            "Receiving messages"
        );

        let response = match self.transport.receive_messages(&request).await {
            Ok(batch) => {
                debug!(
                    queue = %self.queue_name,
                    request_id = %request.request_id,
                    received = batch.messages.len(),
                    expired = batch.messages_expired,
                    "Messages received"
                );
                ReceiveMessagesResponse::received(request.request_id, is_peek, batch)
            }
            Err(error) => {
                warn!(
                    queue = %self.queue_name,
                    request_id = %request.request_id,
                    error = %error,
                    "Receive failed"
                );
                ReceiveMessagesResponse::failed(request.request_id, is_peek, error)
            }
        };

        Ok(response)
    }

    /// Acknowledge every message this client currently holds on the queue
    pub async fn ack_all_messages(&self) -> AckAllMessagesResponse {
        let request = AckAllRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            client_id: self.client_id.clone(),
            queue: self.queue_name.clone(),
        };

        match self.transport.ack_all_messages(&request).await {
            Ok(affected) => {
                info!(
                    queue = %self.queue_name,
                    request_id = %request.request_id,
                    affected_messages = affected,
                    "Acknowledged all outstanding messages"
                );
                AckAllMessagesResponse::acknowledged(request.request_id, affected)
            }
            Err(error) => {
                warn!(
                    queue = %self.queue_name,
                    request_id = %request.request_id,
                    error = %error,
                    "Ack-all failed"
                );
                AckAllMessagesResponse::failed(request.request_id, error)
            }
        }
    }

    /// Acknowledge one outstanding message, removing it permanently
    pub async fn ack_message(&self, message_id: &MessageId) -> AckMessageResponse {
        self.settle(message_id, Settlement::Ack).await
    }

    /// Return one outstanding message to the queue right away.
    ///
    /// The message is dead-lettered instead if its receive count is exhausted.
    pub async fn reject_message(&self, message_id: &MessageId) -> AckMessageResponse {
        self.settle(message_id, Settlement::Reject).await
    }

    async fn settle(&self, message_id: &MessageId, settlement: Settlement) -> AckMessageResponse {
        let request = SettleRequest {
            client_id: self.client_id.clone(),
            queue: self.queue_name.clone(),
            message_id: message_id.clone(),
            settlement,
        };

        let outcome = self.transport.settle_message(&request).await;
        if let Err(error) = &outcome {
            warn!(
                queue = %self.queue_name,
                message_id = %message_id,
                settlement = ?settlement,
                error = %error,
                "Message settlement failed"
            );
        }

        AckMessageResponse::new(message_id.clone(), outcome)
    }

    /// Validate a message and resolve its delivery directives
    fn prepare(&self, message: &Message) -> Result<SendRequest, ValidationError> {
        if message.body.len() > self.config.max_body_size {
            return Err(ValidationError::MessageTooLarge {
                size: message.body.len(),
                max_size: self.config.max_body_size,
            });
        }

        let delay_seconds = message.delay_seconds.unwrap_or(0);
        if delay_seconds > self.config.max_delay_seconds {
            return Err(ValidationError::OutOfRange {
                field: "delay_seconds".to_string(),
                message: format!("must not exceed {}", self.config.max_delay_seconds),
            });
        }

        let expiration_seconds = message.expiration_seconds.unwrap_or(0);
        if expiration_seconds > self.config.max_expiration_seconds {
            return Err(ValidationError::OutOfRange {
                field: "expiration_seconds".to_string(),
                message: format!("must not exceed {}", self.config.max_expiration_seconds),
            });
        }

        let dead_letter = match message.dead_letter_policy()? {
            Some(policy) => Some(policy),
            None => self.config.default_dead_letter.clone(),
        };
        if let Some(policy) = &dead_letter {
            self.check_dead_letter(policy)?;
        }

        Ok(SendRequest {
            client_id: self.client_id.clone(),
            queue: self.queue_name.clone(),
            body: message.body.clone(),
            metadata: message.metadata.clone(),
            tags: message.tags.clone(),
            delay_seconds,
            expiration_seconds,
            dead_letter,
        })
    }

    fn check_dead_letter(&self, policy: &DeadLetterPolicy) -> Result<(), ValidationError> {
        if policy.max_receive_count == 0
            || policy.max_receive_count > self.config.max_receive_count_limit
        {
            return Err(ValidationError::OutOfRange {
                field: "max_receive_count".to_string(),
                message: format!(
                    "must be between 1 and {}",
                    self.config.max_receive_count_limit
                ),
            });
        }

        if policy.queue == self.queue_name {
            return Err(ValidationError::InvalidFormat {
                field: "dead_letter_queue".to_string(),
                message: "must differ from the client queue".to_string(),
            });
        }

        Ok(())
    }
}

/// Factory for creating queue clients
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Create a client with the transport selected by configuration
    pub fn create_client(config: QueueConfig) -> Result<QueueClient, QueueError> {
        config.validate()?;

        let transport: Arc<dyn Transport> = match &config.transport {
            TransportConfig::Http(http) => {
                Arc::new(HttpTransport::new(&config.server_address, http.clone())?)
            }
            TransportConfig::InMemory(memory) => Arc::new(InMemoryTransport::new(memory.clone())),
        };

        QueueClient::new(config, transport)
    }

    /// Create a client over a fresh in-memory broker
    pub fn create_test_client(
        queue_name: &str,
        client_id: &str,
    ) -> Result<QueueClient, QueueError> {
        let config = QueueConfig::new(queue_name, client_id, "in-memory")
            .with_transport(TransportConfig::InMemory(Default::default()));
        Self::create_client(config)
    }
}
