//! Message dispatch into the record sink.
//!
//! Decoding and storage failures are isolated per message: they are logged
//! and the loop moves on. Only the end of the delivery stream (connection
//! closed) or a broker-level error stops [`run_dispatch_loop`].

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{BusError, Result};
use crate::storage::{LogEntry, LogRecord, LogStore};

/// Wire shape of a log event body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPayload {
    pub name: String,
    pub data: String,
}

/// A message as handed over by the broker client.
#[derive(Debug, Clone)]
pub struct Incoming {
    pub routing_key: String,
    pub body: Vec<u8>,
}

impl Incoming {
    pub fn new(routing_key: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            routing_key: routing_key.into(),
            body: body.into(),
        }
    }
}

/// Decode a message body into a payload.
pub fn decode(body: &[u8]) -> Result<LogPayload> {
    Ok(serde_json::from_slice(body)?)
}

/// Decode one message and insert it, stamped with the consumption time.
pub async fn dispatch(message: &Incoming, sink: &dyn LogStore) -> Result<LogRecord> {
    let payload = decode(&message.body)?;
    let record = sink.insert(LogEntry::now(payload.name, payload.data)).await?;
    Ok(record)
}

/// Feed every delivery to `sink`, one at a time in delivery order.
///
/// Returns [`BusError::Closed`] when the stream ends, or the first error the
/// stream itself yields.
pub async fn run_dispatch_loop<S>(deliveries: S, sink: &dyn LogStore) -> Result<()>
where
    S: Stream<Item = Result<Incoming>>,
{
    let mut deliveries = std::pin::pin!(deliveries);

    while let Some(delivery) = deliveries.next().await {
        let message = delivery?;

        match dispatch(&message, sink).await {
            Ok(record) => {
                debug!(
                    routing_key = %message.routing_key,
                    id = %record.id,
                    name = %record.name,
                    "Stored log record"
                );
            }
            Err(e @ BusError::Decode(_)) => {
                error!(routing_key = %message.routing_key, error = %e, "Dropping malformed message");
            }
            Err(e) => {
                error!(routing_key = %message.routing_key, error = %e, "Failed to store log record");
            }
        }
    }

    info!("Delivery stream ended");
    Err(BusError::Closed)
}
