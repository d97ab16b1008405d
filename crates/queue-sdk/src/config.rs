//! Client and transport configuration.

use crate::error::ConfigurationError;
use crate::message::{ClientId, DeadLetterPolicy, QueueName};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment variables read by [`QueueConfig::load`]
pub const ENV_PREFIX: &str = "QUEUE_SDK";

/// Enumeration of supported transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportType {
    Http,
    InMemory,
}

/// Configuration for queue client initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub queue_name: String,
    pub client_id: String,
    /// Broker address as `host:port`, or a full URL
    pub server_address: String,
    pub transport: TransportConfig,
    /// How long a received message stays hidden awaiting acknowledgement
    pub visibility_timeout_seconds: u32,
    /// Dead-letter routing applied to messages that carry no policy of their own
    pub default_dead_letter: Option<DeadLetterPolicy>,
    pub max_batch_size: usize,
    pub max_body_size: usize,
    pub max_receive_messages: u32,
    pub max_wait_timeout_seconds: u32,
    pub max_delay_seconds: u32,
    pub max_expiration_seconds: u32,
    pub max_receive_count_limit: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: String::new(),
            client_id: String::new(),
            server_address: String::new(),
            transport: TransportConfig::default(),
            visibility_timeout_seconds: 30,
            default_dead_letter: None,
            max_batch_size: 100,
            max_body_size: 100 * 1024 * 1024, // 100MB
            max_receive_messages: 1024,
            max_wait_timeout_seconds: 3600,
            max_delay_seconds: 43_200,
            max_expiration_seconds: 43_200,
            max_receive_count_limit: 1024,
        }
    }
}

impl QueueConfig {
    /// Create configuration with the three required identity parameters
    pub fn new(
        queue_name: impl Into<String>,
        client_id: impl Into<String>,
        server_address: impl Into<String>,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            client_id: client_id.into(),
            server_address: server_address.into(),
            ..Self::default()
        }
    }

    /// Select the transport
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Set the client-level dead-letter default
    pub fn with_default_dead_letter(mut self, policy: DeadLetterPolicy) -> Self {
        self.default_dead_letter = Some(policy);
        self
    }

    /// Set the visibility timeout for received messages
    pub fn with_visibility_timeout_seconds(mut self, seconds: u32) -> Self {
        self.visibility_timeout_seconds = seconds;
        self
    }

    /// Load configuration from an optional file and the environment.
    ///
    /// Sources, later ones overriding earlier ones:
    ///  1. the file at `path`, format inferred from its extension
    ///  2. environment variables prefixed `QUEUE_SDK__`, with `__` separating
    ///     nested keys, e.g. `QUEUE_SDK__TRANSPORT__TYPE=in_memory`
    ///
    /// The result is not validated; [`crate::QueueClient::new`] does that.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        settings
            .try_deserialize()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })
    }

    /// Check required parameters and limits
    pub fn validate(&self) -> Result<(QueueName, ClientId), ConfigurationError> {
        let queue_name = required("queue_name", &self.queue_name)?;
        let client_id = required("client_id", &self.client_id)?;
        required("server_address", &self.server_address)?;

        let queue_name = QueueName::new(queue_name.to_string()).map_err(invalid)?;
        let client_id = ClientId::new(client_id.to_string()).map_err(invalid)?;

        if self.server_address.chars().any(char::is_whitespace) {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "server_address '{}' must not contain whitespace",
                    self.server_address
                ),
            });
        }

        if self.visibility_timeout_seconds == 0 {
            return Err(ConfigurationError::Invalid {
                message: "visibility_timeout_seconds must be at least 1".to_string(),
            });
        }

        if self.max_batch_size == 0 || self.max_receive_messages == 0 {
            return Err(ConfigurationError::Invalid {
                message: "max_batch_size and max_receive_messages must be at least 1".to_string(),
            });
        }

        if let Some(policy) = &self.default_dead_letter {
            let policy = DeadLetterPolicy::new(policy.max_receive_count, policy.queue.as_str())
                .map_err(invalid)?;
            if policy.queue == queue_name {
                return Err(ConfigurationError::Invalid {
                    message: "default dead-letter queue must differ from the client queue"
                        .to_string(),
                });
            }
        }

        Ok((queue_name, client_id))
    }
}

fn required<'a>(key: &str, value: &'a str) -> Result<&'a str, ConfigurationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigurationError::Missing {
            key: key.to_string(),
        });
    }
    Ok(trimmed)
}

fn invalid(err: crate::error::ValidationError) -> ConfigurationError {
    ConfigurationError::Invalid {
        message: err.to_string(),
    }
}

/// Transport-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    Http(HttpConfig),
    InMemory(InMemoryConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Http(HttpConfig::default())
    }
}

impl TransportConfig {
    pub fn transport_type(&self) -> TransportType {
        match self {
            Self::Http(_) => TransportType::Http,
            Self::InMemory(_) => TransportType::InMemory,
        }
    }
}

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Budget for a request on top of any long-poll wait
    pub request_timeout_seconds: u64,
    pub max_retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            max_retry_attempts: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5_000,
        }
    }
}

impl HttpConfig {
    /// Retry policy for transient transport failures
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
            2.0,
        )
    }
}

/// In-memory broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    pub max_queue_size: usize,
    /// Create queues on first use instead of rejecting unknown names
    pub auto_create_queues: bool,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            auto_create_queues: true,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
