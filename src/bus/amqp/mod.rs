//! AMQP (RabbitMQ) transport for log events.
//!
//! Uses a durable topic exchange; listeners bind an anonymous exclusive
//! queue under routing-key patterns such as `log.ERROR` or `log.*`.
//!
//! Every operation runs on its own channel, acquired from the process's
//! single [`Connection`] and closed on every exit path.

use std::future::Future;

use lapin::{Channel, Connection, ConnectionProperties};
use tracing::{debug, info, warn};

use super::connector::{connect_with_retry, QuadraticBackoff};
use super::{BusError, Result};
use crate::utils::bootstrap::redact_url;

mod consumer;
mod emitter;
mod topology;

pub use consumer::AmqpConsumer;
pub use emitter::AmqpEmitter;
pub use topology::{declare_exchange, declare_topology};

/// Connect to the broker, retrying with quadratic backoff.
///
/// Fails with [`BusError::Connection`] carrying the last dial error once
/// `max_retries` retries have been spent.
pub async fn connect(url: &str, max_retries: u32) -> Result<Connection> {
    let target = redact_url(url);

    connect_with_retry(&target, QuadraticBackoff::new(max_retries), || {
        Connection::connect(url, ConnectionProperties::default())
    })
    .await
    .map_err(|e| BusError::Connection(format!("{}: {}", target, e)))
}

/// Close the connection. Ends every consumer running on it.
pub async fn disconnect(connection: &Connection) {
    match connection.close(200, "shutdown").await {
        Ok(()) => info!("Closed broker connection"),
        Err(e) => warn!(error = %e, "Failed to close broker connection"),
    }
}

/// Run `op` on a fresh channel, then close the channel whatever the outcome.
///
/// A failure to open the channel is reported through `on_error`.
pub(crate) async fn with_channel<T, F, Fut>(
    connection: &Connection,
    on_error: fn(String) -> BusError,
    op: F,
) -> Result<T>
where
    F: FnOnce(Channel) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let channel = connection
        .create_channel()
        .await
        .map_err(|e| on_error(format!("Failed to create channel: {}", e)))?;

    let result = op(channel.clone()).await;
    close_channel(&channel).await;
    result
}

async fn close_channel(channel: &Channel) {
    // A channel the broker already closed (e.g. after a declare conflict) rejects this.
    if let Err(e) = channel.close(200, "OK").await {
        debug!(channel = channel.id(), error = %e, "Channel already closed");
    }
}
