//! Producer tick behaviour against a scripted broker

use sensorbus::lifecycle::{ConnectionManager, ConnectionState, DEFAULT_RECONNECT_INTERVAL};
use sensorbus::testing::{BrokerCall, FixedReading, MockBrokerClient};
use sensorbus::transport::{BrokerError, ConnectOptions, QoS};
use sensorbus::worker::{ProducerPhase, ProducerWorker, TickOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

async fn connected_pair(reading: f64) -> (Arc<MockBrokerClient>, Arc<ConnectionManager>, ProducerWorker) {
    let client = Arc::new(MockBrokerClient::new());
    let manager = Arc::new(ConnectionManager::new(
        client.clone(),
        ConnectOptions::default(),
        DEFAULT_RECONNECT_INTERVAL,
    ));
    manager.initialize().await.unwrap();
    let producer = ProducerWorker::new(
        manager.clone(),
        Box::new(FixedReading::new(reading)),
        "sensor/temperature",
    );
    (client, manager, producer)
}

#[tokio::test(start_paused = true)]
async fn test_reading_is_rounded_and_retained() {
    let (client, _manager, producer) = connected_pair(23.456).await;

    assert_eq!(producer.on_tick().await, TickOutcome::Published(23.46));

    let published = client.published();
    assert_eq!(published.len(), 1);
    match &published[0] {
        BrokerCall::Publish {
            topic,
            payload,
            qos,
            retain,
        } => {
            assert_eq!(topic, "sensor/temperature");
            assert_eq!(payload.as_slice(), br#"{"temp":23.46}"#);
            assert_eq!(*qos, QoS::AtLeastOnce);
            assert!(*retain);
        }
        other => panic!("unexpected call: {other:?}"),
    }
    assert_eq!(producer.phase(), ProducerPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_tick_makes_no_client_calls() {
    let (client, manager, producer) = connected_pair(20.0).await;
    client.drop_connection(BrokerError::ConnectionLost("gone".to_string()));
    client.clear_calls();

    assert_eq!(producer.on_tick().await, TickOutcome::SkippedDisconnected);
    assert_eq!(producer.on_tick().await, TickOutcome::SkippedDisconnected);

    assert!(client.calls().is_empty());
    assert_eq!(manager.scheduler().scheduled_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_finite_reading_is_not_published() {
    let (client, _manager, producer) = connected_pair(f64::NAN).await;

    assert_eq!(producer.on_tick().await, TickOutcome::EncodeFailed);
    assert!(client.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_qos_and_retain_overrides() {
    let (client, manager, _) = connected_pair(0.0).await;
    let producer = ProducerWorker::new(
        manager.clone(),
        Box::new(FixedReading::new(18.0)),
        "lab/temperature",
    )
    .with_qos(QoS::AtMostOnce)
    .with_retain(false);

    producer.on_tick().await;

    assert_eq!(
        client.published(),
        vec![BrokerCall::Publish {
            topic: "lab/temperature".to_string(),
            payload: br#"{"temp":18.0}"#.to_vec(),
            qos: QoS::AtMostOnce,
            retain: false,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_publishing_resumes_after_reconnect() {
    let (client, manager, producer) = connected_pair(21.0).await;

    client.drop_connection(BrokerError::ConnectionLost("gone".to_string()));
    assert_eq!(producer.on_tick().await, TickOutcome::SkippedDisconnected);

    tokio::time::sleep(Duration::from_millis(3100)).await;
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(producer.on_tick().await, TickOutcome::Published(21.0));
}

#[tokio::test(start_paused = true)]
async fn test_run_ticks_until_stopped() {
    let (client, _manager, producer) = connected_pair(22.0).await;
    let (stop_tx, stop_rx) = watch::channel(false);

    let running = tokio::spawn(async move {
        producer.run(Duration::from_millis(5000), stop_rx).await;
    });

    tokio::time::sleep(Duration::from_millis(12_000)).await;
    stop_tx.send(true).unwrap();
    running.await.unwrap();

    assert_eq!(client.published().len(), 3);
}
