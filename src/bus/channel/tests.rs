use super::*;
use crate::bus::{emit_log, Severity, LOGS_EXCHANGE};
use crate::storage::MemoryLogStore;
use std::time::Duration;
use tokio::task::JoinHandle;

async fn wait_for_bindings(broker: &ChannelBroker, expected: usize) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while broker.binding_count().await < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("consumer never bound");
}

async fn wait_for_records(store: &MemoryLogStore, expected: usize) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while store.len().await < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("records never arrived");
}

fn spawn_listener(
    broker: &ChannelBroker,
    topics: &[&str],
) -> (Arc<MemoryLogStore>, JoinHandle<Result<()>>) {
    let store = Arc::new(MemoryLogStore::new());
    let consumer = ChannelConsumer::new(broker.clone(), LOGS_EXCHANGE);
    let topics: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
    let sink: Arc<dyn LogStore> = store.clone();

    let handle = tokio::spawn(async move { consumer.listen(&topics, sink).await });
    (store, handle)
}

#[tokio::test]
async fn test_declare_exchange_is_idempotent() {
    let broker = ChannelBroker::new();
    let options = ExchangeOptions::default();

    broker.declare_exchange(LOGS_EXCHANGE, options).await.unwrap();
    broker.declare_exchange(LOGS_EXCHANGE, options).await.unwrap();
    // A second handle on the same broker sees the same exchange.
    broker
        .clone()
        .declare_exchange(LOGS_EXCHANGE, options)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_declare_exchange_conflict_fails() {
    let broker = ChannelBroker::new();
    broker
        .declare_exchange(LOGS_EXCHANGE, ExchangeOptions::default())
        .await
        .unwrap();

    let transient = ExchangeOptions {
        durable: false,
        ..Default::default()
    };
    let result = broker.declare_exchange(LOGS_EXCHANGE, transient).await;
    assert!(matches!(result, Err(BusError::Topology(_))));
}

#[tokio::test]
async fn test_publish_without_exchange_fails() {
    let broker = ChannelBroker::new();
    let result = broker.publish(LOGS_EXCHANGE, "log.INFO", b"{}").await;
    assert!(matches!(result, Err(BusError::Publish(_))));
}

#[tokio::test]
async fn test_emitter_rejects_invalid_routing_key() {
    let broker = ChannelBroker::new();
    let emitter = ChannelEmitter::new(broker, LOGS_EXCHANGE).await.unwrap();

    let result = emitter.publish(b"{}", "log.*").await;
    assert!(matches!(result, Err(BusError::InvalidRoutingKey { .. })));
}

#[tokio::test]
async fn test_error_routes_to_exact_and_wildcard_but_not_info() {
    let broker = ChannelBroker::new();
    let (exact, _h1) = spawn_listener(&broker, &["log.ERROR"]);
    let (wildcard, _h2) = spawn_listener(&broker, &["log.*"]);
    let (info_only, _h3) = spawn_listener(&broker, &["log.INFO"]);
    wait_for_bindings(&broker, 3).await;

    let emitter = ChannelEmitter::new(broker.clone(), LOGS_EXCHANGE)
        .await
        .unwrap();
    emit_log(&emitter, "auth", "login-failed", Severity::Error)
        .await
        .unwrap();

    wait_for_records(&exact, 1).await;
    wait_for_records(&wildcard, 1).await;
    // Give the INFO consumer a chance to (wrongly) receive it.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(info_only.len().await, 0);

    let record = &exact.snapshot().await[0];
    assert_eq!(record.name, "auth");
    assert_eq!(record.data, "login-failed");
}

#[tokio::test]
async fn test_multiple_patterns_share_one_queue() {
    let broker = ChannelBroker::new();
    let (store, _handle) = spawn_listener(&broker, &["log.INFO", "log.ERROR", "log.#"]);
    wait_for_bindings(&broker, 3).await;

    let emitter = ChannelEmitter::new(broker.clone(), LOGS_EXCHANGE)
        .await
        .unwrap();
    emit_log(&emitter, "a", "1", Severity::Info).await.unwrap();
    emit_log(&emitter, "b", "2", Severity::Error).await.unwrap();
    emit_log(&emitter, "c", "3", Severity::Warning).await.unwrap();

    wait_for_records(&store, 3).await;
    let names: Vec<String> = store.snapshot().await.into_iter().map(|r| r.name).collect();
    // One copy each, in publish order, even where two patterns match.
    assert_eq!(names, vec!["a", "b", "c"]);
    assert_eq!(broker.queue_count().await, 1);
}

#[tokio::test]
async fn test_malformed_message_does_not_stop_consumer() {
    let broker = ChannelBroker::new();
    let (store, _handle) = spawn_listener(&broker, &["log.ERROR"]);
    wait_for_bindings(&broker, 1).await;

    let emitter = ChannelEmitter::new(broker.clone(), LOGS_EXCHANGE)
        .await
        .unwrap();
    emitter.publish(b"<<not json>>", "log.ERROR").await.unwrap();
    emit_log(&emitter, "after", "bad", Severity::Error)
        .await
        .unwrap();

    wait_for_records(&store, 1).await;
    assert_eq!(store.snapshot().await[0].name, "after");
}

#[tokio::test]
async fn test_close_ends_listen_and_removes_queue() {
    let broker = ChannelBroker::new();
    let (_store, handle) = spawn_listener(&broker, &["log.*"]);
    wait_for_bindings(&broker, 1).await;

    broker.close().await;

    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("listen did not return")
        .unwrap();
    assert!(matches!(result, Err(BusError::Closed)));
    assert_eq!(broker.queue_count().await, 0);
}

#[tokio::test]
async fn test_listen_requires_topics() {
    let broker = ChannelBroker::new();
    let consumer = ChannelConsumer::new(broker, LOGS_EXCHANGE);
    let result = consumer.listen(&[], Arc::new(MemoryLogStore::new())).await;
    assert!(matches!(result, Err(BusError::Subscribe(_))));
}

#[tokio::test]
async fn test_operations_fail_after_close() {
    let broker = ChannelBroker::new();
    broker.close().await;

    let result = ChannelEmitter::new(broker, LOGS_EXCHANGE).await;
    assert!(matches!(result, Err(BusError::Connection(_))));
}
