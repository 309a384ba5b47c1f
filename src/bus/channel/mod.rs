//! In-memory topic broker for single-process use.
//!
//! Mirrors the broker-side topology the AMQP transport relies on: named
//! exchanges with fixed properties, anonymous exclusive queues bound under
//! topic patterns, and connection close as the only way to stop a consumer.
//! Ideal for local development and testing without external dependencies.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::dispatch::{run_dispatch_loop, Incoming};
use super::topic::{topic_matches, validate_routing_key};
use super::{BusError, EventConsumer, EventEmitter, Result};
use crate::storage::LogStore;

/// Exchange properties compared on redeclaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeOptions {
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            durable: true,
            auto_delete: false,
            internal: false,
        }
    }
}

struct Queue {
    id: u64,
    bindings: Vec<(String, String)>,
    sender: mpsc::UnboundedSender<Incoming>,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeOptions>,
    queues: Vec<Queue>,
    next_queue_id: u64,
    closed: bool,
}

impl BrokerState {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(BusError::Connection("Broker connection closed".to_string()));
        }
        Ok(())
    }
}

/// Shared handle to an in-process broker. Clones address the same broker.
#[derive(Clone, Default)]
pub struct ChannelBroker {
    state: Arc<RwLock<BrokerState>>,
}

impl ChannelBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an exchange. Identical redeclaration is a no-op.
    pub async fn declare_exchange(&self, name: &str, options: ExchangeOptions) -> Result<()> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        match state.exchanges.get(name) {
            Some(existing) if *existing != options => Err(BusError::Topology(format!(
                "Exchange '{}' already declared with {:?}, requested {:?}",
                name, existing, options
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(name.to_string(), options);
                debug!(exchange = %name, "Declared exchange");
                Ok(())
            }
        }
    }

    /// Route a message to every queue with a matching binding.
    ///
    /// Returns the number of queues the message was delivered to. Each queue
    /// receives one copy however many of its patterns match.
    pub async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<usize> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        if !state.exchanges.contains_key(exchange) {
            return Err(BusError::Publish(format!("No exchange '{}'", exchange)));
        }

        let mut delivered = 0;
        // Queues whose consumer went away are deleted on the way.
        state.queues.retain(|queue| {
            let matches = queue
                .bindings
                .iter()
                .any(|(ex, pattern)| ex == exchange && topic_matches(pattern, routing_key));
            if !matches {
                return !queue.sender.is_closed();
            }
            match queue
                .sender
                .unbounded_send(Incoming::new(routing_key, body.to_vec()))
            {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });

        Ok(delivered)
    }

    /// Close the broker connection. Every consumer's delivery stream ends.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        state.closed = true;
        state.queues.clear();
        info!("Channel broker closed");
    }

    /// Number of live queues.
    pub async fn queue_count(&self) -> usize {
        self.state.read().await.queues.len()
    }

    /// Number of bindings across all live queues.
    pub async fn binding_count(&self) -> usize {
        self.state
            .read()
            .await
            .queues
            .iter()
            .map(|q| q.bindings.len())
            .sum()
    }

    async fn declare_queue(&self) -> Result<(u64, mpsc::UnboundedReceiver<Incoming>)> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        let (sender, receiver) = mpsc::unbounded();
        let id = state.next_queue_id;
        state.next_queue_id += 1;
        state.queues.push(Queue {
            id,
            bindings: Vec::new(),
            sender,
        });
        Ok((id, receiver))
    }

    async fn bind(&self, queue_id: u64, exchange: &str, pattern: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        if !state.exchanges.contains_key(exchange) {
            return Err(BusError::Subscribe(format!("No exchange '{}'", exchange)));
        }
        let queue = state
            .queues
            .iter_mut()
            .find(|q| q.id == queue_id)
            .ok_or_else(|| BusError::Subscribe(format!("No queue {}", queue_id)))?;

        queue
            .bindings
            .push((exchange.to_string(), pattern.to_string()));
        Ok(())
    }

    async fn delete_queue(&self, queue_id: u64) {
        self.state.write().await.queues.retain(|q| q.id != queue_id);
    }
}

/// Publishes onto an exchange of a [`ChannelBroker`].
pub struct ChannelEmitter {
    broker: ChannelBroker,
    exchange: String,
}

impl ChannelEmitter {
    /// Create an emitter, declaring the exchange first.
    pub async fn new(broker: ChannelBroker, exchange: impl Into<String>) -> Result<Self> {
        let exchange = exchange.into();
        broker
            .declare_exchange(&exchange, ExchangeOptions::default())
            .await?;
        Ok(Self { broker, exchange })
    }
}

#[async_trait]
impl EventEmitter for ChannelEmitter {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(routing_key = %routing_key))]
    async fn publish(&self, payload: &[u8], routing_key: &str) -> Result<()> {
        validate_routing_key(routing_key)?;
        let delivered = self
            .broker
            .publish(&self.exchange, routing_key, payload)
            .await?;
        debug!(exchange = %self.exchange, queues = delivered, "Published log event");
        Ok(())
    }
}

/// Consumes from an exclusive queue on a [`ChannelBroker`].
pub struct ChannelConsumer {
    broker: ChannelBroker,
    exchange: String,
}

impl ChannelConsumer {
    pub fn new(broker: ChannelBroker, exchange: impl Into<String>) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
        }
    }
}

#[async_trait]
impl EventConsumer for ChannelConsumer {
    async fn listen(&self, topics: &[String], sink: Arc<dyn LogStore>) -> Result<()> {
        if topics.is_empty() {
            return Err(BusError::Subscribe("No topics to bind".to_string()));
        }

        self.broker
            .declare_exchange(&self.exchange, ExchangeOptions::default())
            .await?;
        let (queue_id, receiver) = self.broker.declare_queue().await?;

        let result = async {
            for topic in topics {
                self.broker.bind(queue_id, &self.exchange, topic).await?;
                debug!(queue = queue_id, routing_key = %topic, "Bound queue to exchange");
            }
            info!(exchange = %self.exchange, topics = ?topics, "Consumer started");

            run_dispatch_loop(futures::StreamExt::map(receiver, Ok), sink.as_ref()).await
        }
        .await;

        // Exclusive queue goes with its consumer.
        self.broker.delete_queue(queue_id).await;
        result
    }
}

#[cfg(test)]
mod tests;
