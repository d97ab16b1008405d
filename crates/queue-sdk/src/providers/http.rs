//! HTTP transport talking to a broker's REST endpoints.
//!
//! Every operation is a `POST` with a JSON body whose field names are
//! PascalCase. Message bodies travel as standard base64. Replies are wrapped
//! in an envelope:
//!
//! ```json
//! { "is_error": false, "message": "", "data": { ... } }
//! ```
//!
//! ## Error Mapping
//!
//! - Connect failures and HTTP 5xx map to `ConnectionFailed`, timeouts to
//!   `Timeout`; both are retried with the configured [`RetryPolicy`]
//! - HTTP 404 maps to `QueueNotFound` (or `MessageNotFound` for ack/reject)
//! - Other non-2xx statuses and envelope errors map to `BrokerRejected`
//! - Replies that cannot be decoded map to `SerializationError`

use crate::config::{HttpConfig, TransportType};
use crate::converter::{decode_body, encode_body, from_unix_time};
use crate::error::{ConfigurationError, ErrorKind, QueueError, SerializationError};
use crate::message::{Message, MessageAttributes, MessageId, QueueName};
use crate::results::ReceivedBatch;
use crate::retry::{RetryPolicy, RetryState};
use crate::transport::{
    AckAllRequest, ReceiveRequest, SendReply, SendRequest, Settlement, SettleRequest, Transport,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;

// ============================================================================
// Wire Types
// ============================================================================

/// Reply envelope shared by all endpoints
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WirePolicy {
    expiration_seconds: u32,
    delay_seconds: u32,
    max_receive_count: u32,
    max_receive_queue: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireSendMessage {
    client_id: String,
    queue: String,
    body: String,
    metadata: String,
    tags: HashMap<String, String>,
    policy: WirePolicy,
}

impl From<&SendRequest> for WireSendMessage {
    fn from(request: &SendRequest) -> Self {
        let (max_receive_count, max_receive_queue) = request
            .dead_letter
            .as_ref()
            .map(|policy| (policy.max_receive_count, policy.queue.to_string()))
            .unwrap_or_default();

        Self {
            client_id: request.client_id.to_string(),
            queue: request.queue.to_string(),
            body: encode_body(&request.body),
            metadata: request.metadata.clone().unwrap_or_default(),
            tags: request.tags.clone(),
            policy: WirePolicy {
                expiration_seconds: request.expiration_seconds,
                delay_seconds: request.delay_seconds,
                max_receive_count,
                max_receive_queue,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireSendBatch {
    batch_id: String,
    messages: Vec<WireSendMessage>,
}

/// Outcome of one send; times are seconds since the Unix epoch, 0 when unset
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireSendResult {
    #[serde(default)]
    message_id: String,
    #[serde(default)]
    sent_at: i64,
    #[serde(default)]
    expiration_at: i64,
    #[serde(default)]
    delayed_to: i64,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    error: String,
}

impl WireSendResult {
    fn into_reply(self) -> Result<SendReply, QueueError> {
        if self.is_error {
            return Err(QueueError::BrokerRejected {
                code: "send".to_string(),
                message: self.error,
            });
        }

        Ok(SendReply {
            message_id: parse_message_id(&self.message_id)?,
            sent_at: from_unix_time(self.sent_at).ok_or_else(|| missing("SentAt"))?,
            expiration_at: optional_time(self.expiration_at),
            delayed_to: optional_time(self.delayed_to),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireSendBatchResult {
    #[serde(default)]
    results: Vec<WireSendResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireReceive {
    request_id: String,
    client_id: String,
    queue: String,
    max_number_of_messages: u32,
    wait_time_seconds: u32,
    is_peek: bool,
    visibility_seconds: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct WireAttributes {
    timestamp: i64,
    sequence: u64,
    receive_count: u32,
    re_routed: bool,
    re_routed_from_queue: String,
    expiration_at: i64,
    delayed_to: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct WireReceivedPolicy {
    max_receive_count: u32,
    max_receive_queue: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireMessage {
    message_id: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    metadata: String,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    attributes: WireAttributes,
    #[serde(default)]
    policy: WireReceivedPolicy,
}

impl WireMessage {
    fn into_message(self) -> Result<Message, QueueError> {
        let attributes = MessageAttributes {
            sent_at: from_unix_time(self.attributes.timestamp)
                .ok_or_else(|| missing("Timestamp"))?,
            sequence: self.attributes.sequence,
            receive_count: self.attributes.receive_count,
            rerouted: self.attributes.re_routed,
            rerouted_from_queue: QueueName::new(self.attributes.re_routed_from_queue).ok(),
            expiration_at: optional_time(self.attributes.expiration_at),
            delayed_to: optional_time(self.attributes.delayed_to),
        };

        Ok(Message {
            body: decode_body(&self.body)?,
            metadata: (!self.metadata.is_empty()).then_some(self.metadata),
            tags: self.tags,
            message_id: Some(parse_message_id(&self.message_id)?),
            max_receive_count: (self.policy.max_receive_count > 0)
                .then_some(self.policy.max_receive_count),
            dead_letter_queue: (!self.policy.max_receive_queue.is_empty())
                .then_some(self.policy.max_receive_queue),
            attributes: Some(attributes),
            ..Message::default()
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireReceiveResult {
    #[serde(default)]
    messages: Vec<WireMessage>,
    #[serde(default)]
    messages_expired: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireAckAll {
    request_id: String,
    client_id: String,
    queue: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireAckAllResult {
    affected_messages: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireSettle {
    client_id: String,
    queue: String,
    message_id: String,
}

fn missing(field: &str) -> QueueError {
    SerializationError::MissingField {
        field: field.to_string(),
    }
    .into()
}

fn parse_message_id(id: &str) -> Result<MessageId, QueueError> {
    MessageId::from_str(id).map_err(|_| missing("MessageID"))
}

fn optional_time(seconds: i64) -> Option<crate::message::Timestamp> {
    if seconds == 0 {
        None
    } else {
        from_unix_time(seconds)
    }
}

// ============================================================================
// HttpTransport
// ============================================================================

/// Transport reaching a broker over HTTP/JSON
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl HttpTransport {
    /// Create a transport for `server_address` (`host:port` or a full URL)
    pub fn new(server_address: &str, config: HttpConfig) -> Result<Self, QueueError> {
        let base_url = parse_base_url(server_address)?;
        let client = reqwest::Client::builder().build().map_err(|e| {
            ConfigurationError::Invalid {
                message: format!("Failed to build HTTP client: {}", e),
            }
        })?;

        Ok(Self {
            client,
            base_url,
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
            retry_policy: config.retry_policy(),
        })
    }

    /// Override the retry policy derived from configuration
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Root URL all endpoints are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// POST `body` to `path`, retrying transient transport failures
    async fn post<B, T>(
        &self,
        path: &str,
        body: &B,
        long_poll: Duration,
        not_found: QueueError,
    ) -> Result<Option<T>, QueueError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.base_url.join(path).map_err(|e| ConfigurationError::Invalid {
            message: format!("Invalid endpoint '{}': {}", path, e),
        })?;
        let timeout = self.request_timeout + long_poll;
        let mut retry_state = RetryState::new();

        loop {
            let error = match self.post_once(&url, body, timeout, &not_found).await {
                Err(error) if error.kind() == ErrorKind::Transport && error.is_transient() => {
                    error
                }
                result => return result,
            };

            let Some(delay) = retry_state.next_delay(&self.retry_policy) else {
                return Err(error);
            };

            warn!(
                endpoint = %url,
                error = %error,
                attempt = retry_state.attempts(),
                delay_ms = delay.as_millis(),
                "Retrying broker request after transport error"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn post_once<B, T>(
        &self,
        url: &Url,
        body: &B,
        timeout: Duration,
        not_found: &QueueError,
    ) -> Result<Option<T>, QueueError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        debug!(endpoint = %url, "Sending broker request");

        let response = self
            .client
            .post(url.clone())
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QueueError::Timeout { duration: timeout }
                } else if e.is_connect() {
                    QueueError::ConnectionFailed {
                        message: format!("Connection failed: {}", e),
                    }
                } else {
                    QueueError::ConnectionFailed {
                        message: format!("HTTP request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                QueueError::Timeout { duration: timeout }
            } else {
                QueueError::ConnectionFailed {
                    message: format!("Failed to read response body: {}", e),
                }
            }
        })?;

        if status == StatusCode::NOT_FOUND {
            return Err(not_found.clone());
        }

        if status.is_server_error() {
            return Err(QueueError::ConnectionFailed {
                message: format!("Broker unavailable ({}): {}", status.as_u16(), text),
            });
        }

        if !status.is_success() {
            let message = serde_json::from_str::<Envelope<serde_json::Value>>(&text)
                .map(|envelope| envelope.message)
                .unwrap_or(text);
            return Err(QueueError::BrokerRejected {
                code: status.as_u16().to_string(),
                message,
            });
        }

        let envelope: Envelope<T> =
            serde_json::from_str(&text).map_err(SerializationError::from)?;

        if envelope.is_error {
            return Err(QueueError::BrokerRejected {
                code: "broker".to_string(),
                message: envelope.message,
            });
        }

        Ok(envelope.data)
    }
}

fn parse_base_url(server_address: &str) -> Result<Url, QueueError> {
    let address = if server_address.contains("://") {
        server_address.to_string()
    } else {
        format!("http://{}", server_address)
    };

    let mut url = Url::parse(&address).map_err(|e| ConfigurationError::Invalid {
        message: format!("Invalid server address '{}': {}", server_address, e),
    })?;

    // Keep any path prefix when joining endpoint paths
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

fn queue_not_found(queue: &QueueName) -> QueueError {
    QueueError::QueueNotFound {
        queue_name: queue.to_string(),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_message(&self, request: &SendRequest) -> Result<SendReply, QueueError> {
        let body = WireSendMessage::from(request);
        let reply: Option<WireSendResult> = self
            .post("queue/send", &body, Duration::ZERO, queue_not_found(&request.queue))
            .await?;

        reply.ok_or_else(|| missing("data"))?.into_reply()
    }

    async fn send_messages(
        &self,
        batch_id: &str,
        requests: &[SendRequest],
    ) -> Result<Vec<Result<SendReply, QueueError>>, QueueError> {
        let Some(first) = requests.first() else {
            return Ok(Vec::new());
        };

        let body = WireSendBatch {
            batch_id: batch_id.to_string(),
            messages: requests.iter().map(WireSendMessage::from).collect(),
        };
        let reply: Option<WireSendBatchResult> = self
            .post(
                "queue/send_batch",
                &body,
                Duration::ZERO,
                queue_not_found(&first.queue),
            )
            .await?;
        let results = reply.ok_or_else(|| missing("data"))?.results;

        if results.len() != requests.len() {
            return Err(QueueError::BrokerRejected {
                code: "batch".to_string(),
                message: format!(
                    "Broker returned {} results for {} messages",
                    results.len(),
                    requests.len()
                ),
            });
        }

        Ok(results.into_iter().map(WireSendResult::into_reply).collect())
    }

    async fn receive_messages(
        &self,
        request: &ReceiveRequest,
    ) -> Result<ReceivedBatch, QueueError> {
        let body = WireReceive {
            request_id: request.request_id.clone(),
            client_id: request.client_id.to_string(),
            queue: request.queue.to_string(),
            max_number_of_messages: request.max_messages,
            wait_time_seconds: request.wait_timeout_seconds,
            is_peek: request.is_peek,
            visibility_seconds: request.visibility_timeout_seconds,
        };
        let long_poll = Duration::from_secs(u64::from(request.wait_timeout_seconds));
        let reply: Option<WireReceiveResult> = self
            .post("queue/receive", &body, long_poll, queue_not_found(&request.queue))
            .await?;

        // An empty long-poll may come back without data
        let Some(reply) = reply else {
            return Ok(ReceivedBatch {
                messages: Vec::new(),
                messages_expired: 0,
            });
        };

        let messages = reply
            .messages
            .into_iter()
            .map(WireMessage::into_message)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ReceivedBatch {
            messages,
            messages_expired: reply.messages_expired,
        })
    }

    async fn ack_all_messages(&self, request: &AckAllRequest) -> Result<u64, QueueError> {
        let body = WireAckAll {
            request_id: request.request_id.clone(),
            client_id: request.client_id.to_string(),
            queue: request.queue.to_string(),
        };
        let reply: Option<WireAckAllResult> = self
            .post("queue/ack_all", &body, Duration::ZERO, queue_not_found(&request.queue))
            .await?;

        Ok(reply.ok_or_else(|| missing("data"))?.affected_messages)
    }

    async fn settle_message(&self, request: &SettleRequest) -> Result<(), QueueError> {
        let path = match request.settlement {
            Settlement::Ack => "queue/ack",
            Settlement::Reject => "queue/reject",
        };
        let body = WireSettle {
            client_id: request.client_id.to_string(),
            queue: request.queue.to_string(),
            message_id: request.message_id.to_string(),
        };
        let not_found = QueueError::MessageNotFound {
            message_id: request.message_id.to_string(),
        };

        let _: Option<serde_json::Value> = self
            .post(path, &body, Duration::ZERO, not_found)
            .await?;
        Ok(())
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Http
    }
}
