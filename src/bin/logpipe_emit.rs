//! logpipe-emit: Publish one log event
//!
//! Usage: `logpipe-emit <name> <data> [severity]`
//!
//! Severity is `INFO`, `WARNING` or `ERROR` (optionally `log.`-prefixed) and
//! defaults to `INFO`. Broker settings come from the same configuration as
//! logpipe-listener.

use std::sync::Arc;

use tracing::info;

use logpipe::bus::amqp::{self, AmqpEmitter};
use logpipe::bus::{emit_log, Severity};
use logpipe::config::Config;
use logpipe::utils::bootstrap::init_tracing;

const USAGE: &str = "usage: logpipe-emit <name> <data> [severity]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let (name, data) = match (args.next(), args.next()) {
        (Some(name), Some(data)) => (name, data),
        _ => return Err(USAGE.into()),
    };
    let severity: Severity = match args.next() {
        Some(level) => level.parse()?,
        None => Severity::default(),
    };

    let config = Config::load(None)?;
    let amqp_config = &config.messaging.amqp;

    let connection = Arc::new(amqp::connect(&amqp_config.url, amqp_config.max_retries).await?);

    let result = async {
        let emitter = AmqpEmitter::new(Arc::clone(&connection), &amqp_config.exchange).await?;
        emit_log(&emitter, &name, &data, severity).await
    }
    .await;

    amqp::disconnect(&connection).await;
    result?;

    info!(name = %name, routing_key = %severity, "Published log event");
    Ok(())
}
