//! Event bus for log distribution.
//!
//! This module contains:
//! - `EventEmitter` trait: publishing one payload under a routing key
//! - `EventConsumer` trait: binding topics and feeding a record sink
//! - Connector with quadratic backoff for slow broker startup
//! - Implementations: AMQP (RabbitMQ) and an in-process channel broker

use std::sync::Arc;

use async_trait::async_trait;

use crate::storage::{LogStore, StorageError};

pub mod channel;
pub mod connector;
pub mod dispatch;
pub mod topic;

#[cfg(feature = "amqp")]
pub mod amqp;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::{AmqpConsumer, AmqpEmitter};
pub use channel::{ChannelBroker, ChannelConsumer, ChannelEmitter};
pub use connector::{connect_with_retry, ConnectMachine, ConnectState, QuadraticBackoff};
pub use dispatch::{Incoming, LogPayload};
pub use topic::{topic_matches, validate_routing_key, Severity};

/// Exchange all log traffic is published to.
pub const LOGS_EXCHANGE: &str = "logs_topic";

/// Content type advertised on published payloads.
pub const CONTENT_TYPE: &str = "text/plain";

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Topology declaration failed: {0}")]
    Topology(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid routing key '{key}': {reason}")]
    InvalidRoutingKey { key: String, reason: &'static str },

    #[error("Consumer channel closed")]
    Closed,
}

/// Publishes single payloads onto the log exchange.
///
/// Implementations:
/// - `AmqpEmitter`: RabbitMQ via AMQP, one channel per publish
/// - `ChannelEmitter`: in-process broker
#[async_trait]
pub trait EventEmitter: Send + Sync {
    /// Publish `payload` under `routing_key`.
    ///
    /// Not retried. The caller decides whether to retry or drop.
    async fn publish(&self, payload: &[u8], routing_key: &str) -> Result<()>;
}

/// Consumes log events for a set of routing-key patterns.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Bind to every pattern in `topics` and store each decoded message in `sink`.
    ///
    /// Runs until the connection or channel closes, reported as
    /// [`BusError::Closed`], or the broker fails with any other error.
    /// Per-message decode and storage errors are logged, never returned.
    async fn listen(&self, topics: &[String], sink: Arc<dyn LogStore>) -> Result<()>;
}

/// Serialize a `{name, data}` payload and publish it under the severity's routing key.
pub async fn emit_log(
    emitter: &dyn EventEmitter,
    name: &str,
    data: &str,
    severity: Severity,
) -> Result<()> {
    let payload = serde_json::to_vec(&LogPayload {
        name: name.to_string(),
        data: data.to_string(),
    })
    .map_err(|e| BusError::Publish(format!("Failed to encode payload: {}", e)))?;
    emitter.publish(&payload, severity.routing_key()).await
}
