//! Common test utilities for queue-sdk integration tests
//!
//! This module provides:
//! - A shared in-memory broker that hands out clients on any queue
//! - Helpers for building and reading text messages

use queue_sdk::{converter, InMemoryTransport, Message, QueueClient, QueueConfig};
use std::sync::Arc;

/// One in-process broker shared by every client created from it
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct TestBroker {
    transport: Arc<InMemoryTransport>,
}

#[allow(dead_code)]
impl TestBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client on `queue` with default configuration
    pub fn client(&self, queue: &str, client_id: &str) -> QueueClient {
        self.client_with(QueueConfig::new(queue, client_id, "in-memory"))
    }

    /// Client on `queue` whose received messages stay hidden for `seconds`
    pub fn client_with_visibility(
        &self,
        queue: &str,
        client_id: &str,
        seconds: u32,
    ) -> QueueClient {
        let config = QueueConfig::new(queue, client_id, "in-memory")
            .with_visibility_timeout_seconds(seconds);
        self.client_with(config)
    }

    pub fn client_with(&self, config: QueueConfig) -> QueueClient {
        QueueClient::new(config, self.transport.clone()).expect("Failed to create client")
    }

    pub fn transport(&self) -> &InMemoryTransport {
        &self.transport
    }
}

/// Message with a UTF-8 body
#[allow(dead_code)]
pub fn text(body: &str) -> Message {
    Message::new(converter::to_bytes(body))
}

/// Body of a received message as text
#[allow(dead_code)]
pub fn body_of(message: &Message) -> String {
    converter::from_bytes(&message.body).expect("Body is not UTF-8")
}

/// Bodies of all messages as text, in order
#[allow(dead_code)]
pub fn bodies(messages: &[Message]) -> Vec<String> {
    messages.iter().map(body_of).collect()
}
