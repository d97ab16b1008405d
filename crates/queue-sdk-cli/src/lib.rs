//! # Queue SDK CLI
//!
//! Command-line interface over the queue client.
//!
//! This module provides CLI commands for:
//! - Sending single messages and batches with delivery directives
//! - Receiving and peeking messages
//! - Acknowledging and rejecting outstanding messages
//! - Validating and printing the resolved configuration
//!
//! Configuration comes from an optional file, then `QUEUE_SDK__*` environment
//! variables, then the command-line flags.

use clap::{Args, CommandFactory, Parser, Subcommand};
use queue_sdk::{
    converter, AckAllMessagesResponse, AckMessageResponse, ConfigurationError, InMemoryConfig,
    Message, MessageId, QueueClient, QueueClientFactory, QueueConfig, QueueError,
    ReceiveMessagesResponse, SendBatchMessageResult, SendMessageResult, TransportConfig,
};
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue SDK CLI - send, receive and acknowledge queue messages
#[derive(Parser, Debug)]
#[command(name = "queue-sdk")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send, receive and acknowledge queue messages")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "QUEUE_SDK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Queue to operate on
    #[arg(short, long, global = true)]
    pub queue: Option<String>,

    /// Client identity used for receive and acknowledge
    #[arg(long, global = true)]
    pub client_id: Option<String>,

    /// Broker address as host:port or URL
    #[arg(short, long, global = true)]
    pub address: Option<String>,

    /// Use an in-process broker instead of a remote one
    #[arg(long, global = true)]
    pub in_memory: bool,

    /// Logging level
    #[arg(short, long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one message
    Send {
        /// Message body
        body: String,

        #[command(flatten)]
        delivery: DeliveryArgs,
    },

    /// Send several messages in one batch
    SendBatch {
        /// Message bodies, one message each
        #[arg(required = true)]
        bodies: Vec<String>,

        #[command(flatten)]
        delivery: DeliveryArgs,
    },

    /// Receive messages, starting their visibility timeout
    Receive {
        /// Maximum number of messages to return
        #[arg(short, long, default_value = "10")]
        max: u32,

        /// Seconds to wait for the first message
        #[arg(short, long, default_value = "1")]
        wait: u32,

        /// Acknowledge everything received afterwards
        #[arg(long)]
        ack_all: bool,
    },

    /// Look at messages without consuming them
    Peek {
        /// Maximum number of messages to return
        #[arg(short, long, default_value = "10")]
        max: u32,

        /// Seconds to wait for the first message
        #[arg(short, long, default_value = "1")]
        wait: u32,
    },

    /// Acknowledge every message this client holds
    AckAll,

    /// Acknowledge one outstanding message
    Ack {
        /// Message ID to acknowledge
        message_id: String,
    },

    /// Return one outstanding message to the queue
    Reject {
        /// Message ID to reject
        message_id: String,
    },

    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,

        /// Output format for configuration
        #[arg(short = 'f', long, value_enum, default_value = "yaml")]
        format: ConfigFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Delivery directives applied to sent messages
#[derive(Args, Debug, Clone, Default)]
pub struct DeliveryArgs {
    /// Metadata annotation
    #[arg(long)]
    pub metadata: Option<String>,

    /// Tag as key=value, may be repeated
    #[arg(long = "tag", value_parser = parse_tag)]
    pub tags: Vec<(String, String)>,

    /// Seconds before the message becomes visible
    #[arg(long)]
    pub delay: Option<u32>,

    /// Seconds after which an unreceived message is discarded
    #[arg(long)]
    pub expiration: Option<u32>,

    /// Receives allowed before dead-lettering
    #[arg(long)]
    pub max_receive_count: Option<u32>,

    /// Dead-letter queue name
    #[arg(long)]
    pub dead_letter_queue: Option<String>,
}

impl DeliveryArgs {
    /// Build a message carrying these directives
    pub fn to_message(&self, body: &str) -> Message {
        let mut message = Message::new(converter::to_bytes(body));
        message.metadata = self.metadata.clone();
        message.tags = self.tags.iter().cloned().collect();
        message.delay_seconds = self.delay;
        message.expiration_seconds = self.expiration;
        message.max_receive_count = self.max_receive_count;
        message.dead_letter_queue = self.dead_letter_queue.clone();
        message
    }
}

/// Parse a `key=value` tag
pub fn parse_tag(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, tag_value)) if !key.is_empty() => {
            Ok((key.to_string(), tag_value.to_string()))
        }
        _ => Err(format!("invalid tag '{}', expected key=value", value)),
    }
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI error types
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Queue error: {0}")]
    Queue(QueueError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Output error: {message}")]
    Output { message: String },
}

impl From<QueueError> for CliError {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::ConfigurationError(e) => Self::Configuration(e),
            QueueError::ValidationError(e) => Self::InvalidArgument {
                arg: e.field().to_string(),
                message: e.to_string(),
            },
            other => Self::Queue(other),
        }
    }
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(_) => 2,
            Self::CommandFailed { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Output { .. } => 5,
        }
    }
}

// ============================================================================
// Output Views
// ============================================================================

#[derive(Debug, Serialize)]
struct SendView {
    message_id: Option<String>,
    sent_at: Option<String>,
    expiration_at: Option<String>,
    delayed_to: Option<String>,
    is_error: bool,
    error: Option<String>,
}

impl From<&SendMessageResult> for SendView {
    fn from(result: &SendMessageResult) -> Self {
        let sent = result.sent_message();
        Self {
            message_id: sent.map(|s| s.message_id.to_string()),
            sent_at: sent.map(|s| s.sent_at.to_string()),
            expiration_at: sent.and_then(|s| s.expiration_at.as_ref().map(|t| t.to_string())),
            delayed_to: sent.and_then(|s| s.delayed_to.as_ref().map(|t| t.to_string())),
            is_error: result.is_error(),
            error: result.error().map(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessageView {
    message_id: Option<String>,
    body: String,
    metadata: Option<String>,
    tags: std::collections::HashMap<String, String>,
    sequence: Option<u64>,
    receive_count: u32,
    sent_at: Option<String>,
    rerouted_from_queue: Option<String>,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        let attributes = message.attributes.as_ref();
        Self {
            message_id: message.message_id.as_ref().map(|id| id.to_string()),
            body: body_text(message),
            metadata: message.metadata.clone(),
            tags: message.tags.clone(),
            sequence: attributes.map(|a| a.sequence),
            receive_count: message.receive_count(),
            sent_at: attributes.map(|a| a.sent_at.to_string()),
            rerouted_from_queue: attributes
                .and_then(|a| a.rerouted_from_queue.as_ref())
                .map(|q| q.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ReceiveView {
    request_id: String,
    is_peek: bool,
    messages_received: usize,
    messages_expired: u32,
    messages: Vec<MessageView>,
    is_error: bool,
    error: Option<String>,
}

/// Text body, or base64 when the body is not UTF-8
fn body_text(message: &Message) -> String {
    converter::from_bytes(&message.body).unwrap_or_else(|_| converter::encode_body(&message.body))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, CliError> {
    serde_json::to_string_pretty(value).map_err(|e| CliError::Output {
        message: e.to_string(),
    })
}

/// Render a send result
pub fn render_send(result: &SendMessageResult, format: OutputFormat) -> Result<String, CliError> {
    if format == OutputFormat::Json {
        return to_json(&SendView::from(result));
    }

    Ok(match (result.sent_message(), result.error()) {
        (Some(sent), _) => {
            let mut line = format!("Sent {} at {}", sent.message_id, sent.sent_at);
            if let Some(at) = &sent.delayed_to {
                line.push_str(&format!(", delayed to {}", at));
            }
            if let Some(at) = &sent.expiration_at {
                line.push_str(&format!(", expires at {}", at));
            }
            line
        }
        (None, Some(error)) => format!("Send failed: {}", error),
        (None, None) => "Send failed".to_string(),
    })
}

/// Render a batch result, one line per message in input order
pub fn render_batch(
    result: &SendBatchMessageResult,
    format: OutputFormat,
) -> Result<String, CliError> {
    if format == OutputFormat::Json {
        let views: Vec<SendView> = result.results().iter().map(SendView::from).collect();
        return to_json(&serde_json::json!({
            "batch_id": result.batch_id,
            "have_errors": result.have_errors(),
            "results": views,
        }));
    }

    let mut lines = vec![format!(
        "Batch {}: {} messages, errors: {}",
        result.batch_id,
        result.results().len(),
        result.have_errors()
    )];
    for (index, item) in result.results().iter().enumerate() {
        lines.push(format!("  [{}] {}", index, render_send(item, OutputFormat::Text)?));
    }
    Ok(lines.join("\n"))
}

/// Render a receive or peek response
pub fn render_receive(
    response: &ReceiveMessagesResponse,
    format: OutputFormat,
) -> Result<String, CliError> {
    if format == OutputFormat::Json {
        return to_json(&ReceiveView {
            request_id: response.request_id.clone(),
            is_peek: response.is_peek,
            messages_received: response.messages_received(),
            messages_expired: response.messages_expired(),
            messages: response.messages().iter().map(MessageView::from).collect(),
            is_error: response.is_error(),
            error: response.error().map(|e| e.to_string()),
        });
    }

    if let Some(error) = response.error() {
        return Ok(format!("Receive failed: {}", error));
    }

    let verb = if response.is_peek { "Peeked" } else { "Received" };
    let mut lines = vec![format!(
        "{} {} messages ({} expired)",
        verb,
        response.messages_received(),
        response.messages_expired()
    )];
    for message in response.messages() {
        let view = MessageView::from(message);
        lines.push(format!(
            "  {} seq={} receives={} sent={} body={}",
            view.message_id.as_deref().unwrap_or("-"),
            view.sequence.unwrap_or(0),
            view.receive_count,
            view.sent_at.as_deref().unwrap_or("-"),
            view.body
        ));
        if let Some(metadata) = &view.metadata {
            lines.push(format!("    metadata: {}", metadata));
        }
        if let Some(queue) = &view.rerouted_from_queue {
            lines.push(format!("    rerouted from: {}", queue));
        }
    }
    Ok(lines.join("\n"))
}

/// Render an ack-all response
pub fn render_ack_all(
    response: &AckAllMessagesResponse,
    format: OutputFormat,
) -> Result<String, CliError> {
    if format == OutputFormat::Json {
        return to_json(&serde_json::json!({
            "request_id": response.request_id,
            "affected_messages": response.affected_messages(),
            "is_error": response.is_error(),
            "error": response.error().map(|e| e.to_string()),
        }));
    }

    Ok(match response.error() {
        Some(error) => format!("Ack-all failed: {}", error),
        None => format!("Acknowledged {} messages", response.affected_messages()),
    })
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Parse arguments and run the selected command
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    run(cli).await
}

/// Run a parsed command line
pub async fn run(cli: Cli) -> Result<(), CliError> {
    match &cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "queue-sdk",
                &mut std::io::stdout(),
            );
            return Ok(());
        }
        Commands::Config { show, format } => {
            let config = resolve_configuration(&cli)?;
            return execute_config_command(&config, *show, *format);
        }
        _ => {}
    }

    let config = resolve_configuration(&cli)?;
    let client = QueueClientFactory::create_client(config)?;
    let output = cli.output;

    match cli.command {
        Commands::Send { body, delivery } => {
            execute_send_command(&client, &body, &delivery, output).await
        }
        Commands::SendBatch { bodies, delivery } => {
            execute_send_batch_command(&client, &bodies, &delivery, output).await
        }
        Commands::Receive { max, wait, ack_all } => {
            execute_receive_command(&client, max, wait, ack_all, output).await
        }
        Commands::Peek { max, wait } => execute_peek_command(&client, max, wait, output).await,
        Commands::AckAll => execute_ack_all_command(&client, output).await,
        Commands::Ack { message_id } => {
            let response = client.ack_message(&parse_message_id(&message_id)?).await;
            finish_settlement("Acknowledged", response)
        }
        Commands::Reject { message_id } => {
            let response = client.reject_message(&parse_message_id(&message_id)?).await;
            finish_settlement("Rejected", response)
        }
        Commands::Config { .. } | Commands::Completions { .. } => Ok(()),
    }
}

fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "queue_sdk={level},queue_sdk_cli={level}",
            level = cli.log_level
        ))
    });

    let json_layer = cli
        .json_logs
        .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!cli.json_logs)
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| CliError::CommandFailed {
            message: format!("Failed to initialize logging: {}", e),
        })
}

/// Merge file, environment and flags into one configuration
pub fn resolve_configuration(cli: &Cli) -> Result<QueueConfig, CliError> {
    let mut config = QueueConfig::load(cli.config.as_deref())?;

    if let Some(queue) = &cli.queue {
        config.queue_name = queue.clone();
    }
    if let Some(client_id) = &cli.client_id {
        config.client_id = client_id.clone();
    }
    if let Some(address) = &cli.address {
        config.server_address = address.clone();
    }
    if cli.in_memory {
        config.transport = TransportConfig::InMemory(InMemoryConfig::default());
        if config.server_address.trim().is_empty() {
            config.server_address = "in-memory".to_string();
        }
    }

    debug!(
        queue = %config.queue_name,
        client_id = %config.client_id,
        server_address = %config.server_address,
        "Resolved configuration"
    );

    Ok(config)
}

fn parse_message_id(value: &str) -> Result<MessageId, CliError> {
    MessageId::from_str(value).map_err(|e| CliError::InvalidArgument {
        arg: "message_id".to_string(),
        message: e.to_string(),
    })
}

fn execute_config_command(
    config: &QueueConfig,
    show: bool,
    format: ConfigFormat,
) -> Result<(), CliError> {
    config.validate()?;

    if !show {
        println!("Configuration is valid");
        return Ok(());
    }

    let rendered = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(config).map_err(|e| CliError::Output {
            message: e.to_string(),
        })?,
        ConfigFormat::Json => to_json(config)?,
    };
    println!("{}", rendered);
    Ok(())
}

async fn execute_send_command(
    client: &QueueClient,
    body: &str,
    delivery: &DeliveryArgs,
    output: OutputFormat,
) -> Result<(), CliError> {
    info!(queue = %client.queue_name(), "Sending message");

    let result = client.send_message(&delivery.to_message(body)).await?;
    println!("{}", render_send(&result, output)?);

    match result.error() {
        Some(error) => Err(CliError::CommandFailed {
            message: error.to_string(),
        }),
        None => Ok(()),
    }
}

async fn execute_send_batch_command(
    client: &QueueClient,
    bodies: &[String],
    delivery: &DeliveryArgs,
    output: OutputFormat,
) -> Result<(), CliError> {
    info!(queue = %client.queue_name(), count = bodies.len(), "Sending message batch");

    let messages: Vec<Message> = bodies.iter().map(|body| delivery.to_message(body)).collect();
    let result = client.send_messages_batch(&messages).await?;
    println!("{}", render_batch(&result, output)?);

    if result.have_errors() {
        return Err(CliError::CommandFailed {
            message: "one or more messages in the batch failed".to_string(),
        });
    }
    Ok(())
}

async fn execute_receive_command(
    client: &QueueClient,
    max: u32,
    wait: u32,
    ack_all: bool,
    output: OutputFormat,
) -> Result<(), CliError> {
    info!(queue = %client.queue_name(), max, wait, "Receiving messages");

    let response = client.receive_messages(max, wait).await?;
    println!("{}", render_receive(&response, output)?);

    if let Some(error) = response.error() {
        return Err(CliError::CommandFailed {
            message: error.to_string(),
        });
    }

    if ack_all && response.messages_received() > 0 {
        execute_ack_all_command(client, output).await?;
    }
    Ok(())
}

async fn execute_peek_command(
    client: &QueueClient,
    max: u32,
    wait: u32,
    output: OutputFormat,
) -> Result<(), CliError> {
    info!(queue = %client.queue_name(), max, wait, "Peeking messages");

    let response = client.peek_messages(max, wait).await?;
    println!("{}", render_receive(&response, output)?);

    match response.error() {
        Some(error) => Err(CliError::CommandFailed {
            message: error.to_string(),
        }),
        None => Ok(()),
    }
}

async fn execute_ack_all_command(
    client: &QueueClient,
    output: OutputFormat,
) -> Result<(), CliError> {
    let response = client.ack_all_messages().await;
    println!("{}", render_ack_all(&response, output)?);

    match response.error() {
        Some(error) => Err(CliError::CommandFailed {
            message: error.to_string(),
        }),
        None => Ok(()),
    }
}

fn finish_settlement(verb: &str, response: AckMessageResponse) -> Result<(), CliError> {
    let message_id = response.message_id.clone();
    match response.into_result() {
        Ok(()) => {
            println!("{} message {}", verb, message_id);
            Ok(())
        }
        Err(error) => Err(CliError::CommandFailed {
            message: error.to_string(),
        }),
    }
}
