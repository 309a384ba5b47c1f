//! Publishing side of the AMQP transport.

use std::sync::Arc;

use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions},
    BasicProperties, Connection,
};
use tracing::debug;

use super::{declare_topology, with_channel};
use crate::bus::{validate_routing_key, BusError, EventEmitter, Result, CONTENT_TYPE};

/// Publishes log events to the topic exchange.
///
/// Holds only the shared connection; each publish gets a channel of its own,
/// so concurrent publishers never share channel state.
pub struct AmqpEmitter {
    connection: Arc<Connection>,
    exchange: String,
}

impl AmqpEmitter {
    /// Create an emitter, declaring the exchange first.
    pub async fn new(connection: Arc<Connection>, exchange: impl Into<String>) -> Result<Self> {
        let exchange = exchange.into();
        declare_topology(&connection, &exchange).await?;

        Ok(Self {
            connection,
            exchange,
        })
    }
}

#[async_trait]
impl EventEmitter for AmqpEmitter {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(routing_key = %routing_key))]
    async fn publish(&self, payload: &[u8], routing_key: &str) -> Result<()> {
        validate_routing_key(routing_key)?;

        with_channel(&self.connection, BusError::Publish, |channel| async move {
            // Confirms make the publish wait for the broker to take the message.
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| BusError::Publish(format!("Failed to enable confirms: {}", e)))?;

            let confirm = channel
                .basic_publish(
                    &self.exchange,
                    routing_key,
                    BasicPublishOptions {
                        mandatory: false,
                        immediate: false,
                    },
                    payload,
                    BasicProperties::default().with_content_type(CONTENT_TYPE.into()),
                )
                .await
                .map_err(|e| BusError::Publish(format!("Failed to publish: {}", e)))?;

            let confirmation = confirm
                .await
                .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {}", e)))?;

            if confirmation.is_nack() {
                return Err(BusError::Publish("Broker rejected message".to_string()));
            }
            Ok(())
        })
        .await?;

        debug!(exchange = %self.exchange, bytes = payload.len(), "Published log event");
        Ok(())
    }
}
