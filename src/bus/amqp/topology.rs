//! Exchange declaration.

use lapin::{options::ExchangeDeclareOptions, types::FieldTable, Channel, Connection, ExchangeKind};
use tracing::debug;

use super::with_channel;
use crate::bus::{BusError, Result};

/// Declare the durable topic exchange on an existing channel.
///
/// Redeclaring with identical properties is a no-op on the broker; a
/// conflicting declaration fails and the broker closes the channel.
pub async fn declare_exchange(channel: &Channel, exchange: &str) -> Result<()> {
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                passive: false,
                durable: true,
                auto_delete: false,
                internal: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BusError::Topology(format!("Failed to declare exchange '{}': {}", exchange, e)))?;

    debug!(exchange = %exchange, "Declared exchange");
    Ok(())
}

/// Declare the exchange on a short-lived channel of its own.
pub async fn declare_topology(connection: &Connection, exchange: &str) -> Result<()> {
    with_channel(connection, BusError::Topology, |channel| async move {
        declare_exchange(&channel, exchange).await
    })
    .await
}
