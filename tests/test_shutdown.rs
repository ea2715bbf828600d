//! Shutdown ordering: recovery is cancelled before the session ends

use sensorbus::lifecycle::{ConnectionManager, ConnectionState, DEFAULT_RECONNECT_INTERVAL};
use sensorbus::testing::{BrokerCall, MockBrokerClient};
use sensorbus::transport::{BrokerError, ConnectOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn manager_for(client: &Arc<MockBrokerClient>) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(
        client.clone(),
        ConnectOptions::default(),
        DEFAULT_RECONNECT_INTERVAL,
    ))
}

#[tokio::test(start_paused = true)]
async fn test_pending_reconnect_cancelled_before_disconnect() {
    let client = Arc::new(MockBrokerClient::new());
    let manager = manager_for(&client);
    manager.initialize().await.unwrap();

    // The client re-established the link on its own after a loss, so a
    // reconnect is queued while the link is up.
    client.drop_connection(BrokerError::ConnectionLost("gone".to_string()));
    client.set_connected(true);
    assert!(manager.reconnect_pending());

    let pending_at_disconnect = Arc::new(AtomicBool::new(true));
    {
        let observed = pending_at_disconnect.clone();
        let manager = Arc::downgrade(&manager);
        client.on_disconnect(move || {
            if let Some(manager) = manager.upgrade() {
                observed.store(manager.reconnect_pending(), Ordering::SeqCst);
            }
        });
    }

    manager.shutdown().await;

    assert!(!pending_at_disconnect.load(Ordering::SeqCst));
    let calls = client.calls();
    let disconnect = calls.iter().position(|c| *c == BrokerCall::Disconnect);
    let close = calls.iter().position(|c| *c == BrokerCall::Close);
    assert!(matches!((disconnect, close), (Some(d), Some(c)) if d < c));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(client.connect_count(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_in_flight_is_aborted() {
    let client = Arc::new(
        MockBrokerClient::new()
            .with_connect_failures(1)
            .with_connect_delay(Duration::from_secs(1)),
    );
    let manager = manager_for(&client);
    manager.initialize().await.unwrap();

    // First retry starts at 4 s and is still inside its connect call.
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert!(manager.scheduler().is_running());
    assert_eq!(client.connect_count(), 2);

    manager.shutdown().await;
    assert!(!manager.scheduler().is_running());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(client.connect_count(), 2);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_no_reconnect_after_shutdown() {
    let client = Arc::new(MockBrokerClient::new());
    let manager = manager_for(&client);
    manager.initialize().await.unwrap();
    manager.shutdown().await;

    client.drop_connection(BrokerError::ConnectionLost("late".to_string()));
    assert!(!manager.reconnect_pending());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(client.connect_count(), 1);
    assert!(client.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_idempotent() {
    let client = Arc::new(MockBrokerClient::new());
    let manager = manager_for(&client);
    manager.initialize().await.unwrap();

    manager.shutdown().await;
    manager.shutdown().await;

    assert_eq!(client.count(|c| matches!(c, BrokerCall::Disconnect)), 1);
    assert_eq!(client.count(|c| matches!(c, BrokerCall::Close)), 1);
}
