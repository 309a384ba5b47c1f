//! Consuming side of the AMQP transport.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{BasicConsumeOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, ChannelState, Connection, ConnectionState,
};
use tracing::info;

use super::{declare_exchange, with_channel};
use crate::bus::dispatch::{run_dispatch_loop, Incoming};
use crate::bus::{BusError, EventConsumer, Result};
use crate::storage::LogStore;

/// Listens on an exclusive, broker-named queue bound to the log exchange.
///
/// Messages are auto-acknowledged: the broker considers them delivered once
/// handed to the client, so a record lost to a decode or storage failure is
/// not redelivered.
pub struct AmqpConsumer {
    connection: Arc<Connection>,
    exchange: String,
}

impl AmqpConsumer {
    pub fn new(connection: Arc<Connection>, exchange: impl Into<String>) -> Self {
        Self {
            connection,
            exchange: exchange.into(),
        }
    }

    /// Declare exchange and queue, bind every topic, and register as consumer.
    async fn setup(&self, channel: &Channel, topics: &[String]) -> Result<lapin::Consumer> {
        // The producer may not have run yet.
        declare_exchange(channel, &self.exchange).await?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    durable: false,
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to declare queue: {}", e)))?;
        let queue_name = queue.name().as_str();

        for topic in topics {
            channel
                .queue_bind(
                    queue_name,
                    &self.exchange,
                    topic,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BusError::Subscribe(format!("Failed to bind '{}': {}", topic, e)))?;

            info!(queue = %queue_name, routing_key = %topic, "Bound queue to exchange");
        }

        channel
            .basic_consume(
                queue_name,
                &format!("logpipe-{}", uuid::Uuid::new_v4()),
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {}", e)))
    }
}

/// A delivery error caused by the channel or connection going away is the
/// normal end of a listen loop, not a broker failure.
fn delivery_error(error: lapin::Error) -> BusError {
    match error {
        lapin::Error::InvalidChannelState(ChannelState::Closed | ChannelState::Closing)
        | lapin::Error::InvalidConnectionState(
            ConnectionState::Closed | ConnectionState::Closing,
        ) => BusError::Closed,
        e => BusError::Subscribe(format!("Delivery failed: {}", e)),
    }
}

#[async_trait]
impl EventConsumer for AmqpConsumer {
    async fn listen(&self, topics: &[String], sink: Arc<dyn LogStore>) -> Result<()> {
        if topics.is_empty() {
            return Err(BusError::Subscribe("No topics to bind".to_string()));
        }

        with_channel(&self.connection, BusError::Subscribe, |channel| async move {
            let consumer = self.setup(&channel, topics).await?;
            info!(exchange = %self.exchange, topics = ?topics, "Consumer started");

            let deliveries = consumer.map(|delivery| {
                delivery
                    .map(|d| Incoming::new(d.routing_key.as_str(), d.data))
                    .map_err(delivery_error)
            });

            run_dispatch_loop(deliveries, sink.as_ref()).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_channel_or_connection_ends_listen() {
        assert!(matches!(
            delivery_error(lapin::Error::InvalidChannelState(ChannelState::Closed)),
            BusError::Closed
        ));
        assert!(matches!(
            delivery_error(lapin::Error::InvalidConnectionState(ConnectionState::Closing)),
            BusError::Closed
        ));
    }

    #[test]
    fn test_other_delivery_errors_are_subscribe_failures() {
        assert!(matches!(
            delivery_error(lapin::Error::InvalidConnectionState(ConnectionState::Error)),
            BusError::Subscribe(_)
        ));
        assert!(matches!(
            delivery_error(lapin::Error::MissingHeartbeatError),
            BusError::Subscribe(_)
        ));
    }
}
