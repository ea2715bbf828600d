//! Mock broker client and worker collaborators
//!
//! [`MockBrokerClient`] records every capability call in order and lets a
//! test script connect failures, publish/subscribe failures, link drops and
//! message deliveries without a broker.

use crate::transport::{BrokerCallback, BrokerClient, BrokerError, ConnectOptions, QoS};
use crate::worker::{MessageSink, ReadingSource, ReceivedMessage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

type DisconnectProbe = Box<dyn Fn() + Send + Sync>;

/// Poisoning only happens after a panicking test thread; keep the data
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One recorded capability call
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerCall {
    Connect,
    Disconnect,
    Close,
    IsConnected,
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    },
    Subscribe {
        topic: String,
        qos: QoS,
    },
    SetCallback,
}

/// Scriptable in-memory broker client
#[derive(Default)]
pub struct MockBrokerClient {
    connected: AtomicBool,
    closed: AtomicBool,
    connect_failures: AtomicUsize,
    connect_delay: Mutex<Option<Duration>>,
    drops: AtomicUsize,
    fail_publish: AtomicBool,
    fail_subscribe: AtomicBool,
    calls: Mutex<Vec<BrokerCall>>,
    connect_instants: Mutex<Vec<Instant>>,
    callback: Mutex<Option<Arc<dyn BrokerCallback>>>,
    disconnect_probe: Mutex<Option<DisconnectProbe>>,
}

impl MockBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `count` connect calls
    pub fn with_connect_failures(self, count: usize) -> Self {
        self.connect_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Make every connect call take `delay` before resolving
    ///
    /// A [`drop_connection`](Self::drop_connection) during the delay makes
    /// that call fail.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *lock(&self.connect_delay) = Some(delay);
        self
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Change the link status without notifying anyone
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Run `probe` at the start of every disconnect call
    pub fn on_disconnect(&self, probe: impl Fn() + Send + Sync + 'static) {
        *lock(&self.disconnect_probe) = Some(Box::new(probe));
    }

    pub fn calls(&self) -> Vec<BrokerCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    pub fn count(&self, predicate: impl Fn(&BrokerCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|call| predicate(call)).count()
    }

    pub fn connect_count(&self) -> usize {
        self.count(|call| matches!(call, BrokerCall::Connect))
    }

    /// Clock readings taken at the start of each connect call
    pub fn connect_instants(&self) -> Vec<Instant> {
        lock(&self.connect_instants).clone()
    }

    /// Every successful-or-not publish call, in order
    pub fn published(&self) -> Vec<BrokerCall> {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, BrokerCall::Publish { .. }))
            .cloned()
            .collect()
    }

    /// Drop the link and fire the connection-lost callback
    pub fn drop_connection(&self, cause: BrokerError) {
        self.drops.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if let Some(callback) = self.registered_callback() {
            callback.connection_lost(&cause);
        }
    }

    /// Deliver an inbound message through the registered callback
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        if let Some(callback) = self.registered_callback() {
            callback.message_arrived(topic, payload);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn registered_callback(&self) -> Option<Arc<dyn BrokerCallback>> {
        lock(&self.callback).clone()
    }

    fn record(&self, call: BrokerCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl BrokerClient for MockBrokerClient {
    async fn connect(&self, _options: &ConnectOptions) -> Result<(), BrokerError> {
        self.record(BrokerCall::Connect);
        lock(&self.connect_instants).push(Instant::now());

        let drops_before = self.drops.load(Ordering::SeqCst);
        let delay = *lock(&self.connect_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.drops.load(Ordering::SeqCst) != drops_before {
            return Err(BrokerError::ConnectionFailed(
                "link dropped while connecting".to_string(),
            ));
        }

        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let refused = self
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(BrokerError::ConnectionFailed(
                "mock broker refused connection".to_string(),
            ));
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        if let Some(probe) = lock(&self.disconnect_probe).as_ref() {
            probe();
        }
        self.record(BrokerCall::Disconnect);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.record(BrokerCall::Close);
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.record(BrokerCall::IsConnected);
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BrokerError> {
        self.record(BrokerCall::Publish {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        if self.fail_publish.load(Ordering::SeqCst) || !self.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::PublishFailed {
                topic: topic.to_string(),
                source: "mock publish failure".into(),
            });
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BrokerError> {
        self.record(BrokerCall::Subscribe {
            topic: topic.to_string(),
            qos,
        });
        if self.fail_subscribe.load(Ordering::SeqCst) || !self.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::SubscriptionFailed {
                topic: topic.to_string(),
                source: "mock subscribe failure".into(),
            });
        }
        Ok(())
    }

    fn set_callback(&self, callback: Arc<dyn BrokerCallback>) {
        self.record(BrokerCall::SetCallback);
        *lock(&self.callback) = Some(callback);
    }
}

/// Reading source that returns scripted values, repeating the last one
#[derive(Debug)]
pub struct FixedReading {
    values: Vec<f64>,
    next: AtomicUsize,
}

impl FixedReading {
    pub fn new(value: f64) -> Self {
        Self::sequence(vec![value])
    }

    pub fn sequence(values: Vec<f64>) -> Self {
        Self {
            values,
            next: AtomicUsize::new(0),
        }
    }
}

impl ReadingSource for FixedReading {
    fn next_reading(&self) -> f64 {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        self.values
            .get(index)
            .or_else(|| self.values.last())
            .copied()
            .unwrap_or_default()
    }
}

/// Sink that keeps every delivered message
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<ReceivedMessage>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<ReceivedMessage> {
        lock(&self.messages).clone()
    }
}

impl MessageSink for CollectingSink {
    fn deliver(&self, message: ReceivedMessage) {
        lock(&self.messages).push(message);
    }
}
