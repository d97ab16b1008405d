//! # Queue SDK
//!
//! Client library for a message-queue broker offering point-to-point queues
//! with delayed delivery, expiration, visibility timeouts and dead-letter
//! routing.
//!
//! This library provides:
//! - Single and batch send with per-message outcomes
//! - Long-poll receive with visibility timeouts, and non-consuming peek
//! - Acknowledge-all, acknowledge and reject of outstanding messages
//! - HTTP and in-memory transports behind one [`transport::Transport`] trait
//! - Retry policies with exponential backoff for transient transport failures
//!
//! ## Module Organization
//!
//! - [`error`] - Error types and their classification
//! - [`message`] - Message structures and validated identifiers
//! - [`results`] - Per-operation result types
//! - [`config`] - Client and transport configuration
//! - [`client`] - The queue client and its factory
//! - [`transport`] - Transport trait and request types
//! - [`providers`] - HTTP and in-memory transports
//! - [`converter`] - Body and timestamp conversions
//! - [`retry`] - Exponential backoff
//!
//! ## Example
//!
//! ```rust
//! use queue_sdk::{converter, Message, QueueClientFactory};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), queue_sdk::QueueError> {
//! let client = QueueClientFactory::create_test_client("orders", "worker-1")?;
//!
//! let message = Message::new(converter::to_bytes("hello")).with_metadata("greeting");
//! let sent = client.send_message(&message).await?;
//! assert!(!sent.is_error());
//!
//! let response = client.receive_messages(10, 1).await?;
//! for message in response.messages() {
//!     println!("{}", converter::from_bytes(&message.body)?);
//! }
//! client.ack_all_messages().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod converter;
pub mod error;
pub mod message;
pub mod providers;
pub mod results;
pub mod retry;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use client::{QueueClient, QueueClientFactory};
pub use config::{HttpConfig, InMemoryConfig, QueueConfig, TransportConfig, TransportType};
pub use error::{ConfigurationError, ErrorKind, QueueError, SerializationError, ValidationError};
pub use message::{
    ClientId, DeadLetterPolicy, Message, MessageAttributes, MessageId, QueueName, Timestamp,
};
pub use providers::{HttpTransport, InMemoryTransport};
pub use results::{
    AckAllMessagesResponse, AckMessageResponse, ReceiveMessagesResponse, ReceivedBatch,
    SendBatchMessageResult, SendMessageResult, SentMessage,
};
pub use transport::Transport;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
