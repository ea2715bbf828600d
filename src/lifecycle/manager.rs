//! Connection lifecycle manager
//!
//! Single source of truth for whether the broker session is usable, and the
//! only component that calls `connect`/`disconnect` on the broker client.
//! Every connectivity failure, whichever context reports it, ends up in
//! [`ConnectionManager::schedule_reconnect`], which collapses concurrent
//! requests into one pending task. Only one connect attempt runs at a time;
//! reports arriving while it is in flight are left to the attempt, which
//! queues its successor on the way out unless it ends connected.

use super::scheduler::{ReconnectScheduler, ScheduleOutcome};
use super::state::{AtomicConnectionState, ConnectionState};
use super::LifecycleError;
use crate::observability::metrics::metrics;
use crate::transport::{BrokerCallback, BrokerClient, BrokerError, ConnectOptions, QoS};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

/// Default delay between a failure and the next connect attempt
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

/// Role-specific reactions to session events
///
/// The consumer implements both methods; the producer needs neither.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Called after every transition into `Connected`
    async fn on_connected(&self, _manager: &Arc<ConnectionManager>) {}

    /// Called on the client's delivery context for every arriving message
    fn on_message(&self, _topic: &str, _payload: &[u8]) {}
}

/// How a call to [`ConnectionManager::connect`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A connect call succeeded
    Connected,
    /// The client already reported a live session; no network call made
    AlreadyConnected,
    /// The attempt failed and recovery was requested
    Failed,
    /// Another attempt was already in flight; nothing done
    InProgress,
    /// The manager is shut down
    ShutDown,
}

/// Owns the broker client and drives reconnection
pub struct ConnectionManager {
    client: Arc<dyn BrokerClient>,
    options: ConnectOptions,
    state: AtomicConnectionState,
    scheduler: ReconnectScheduler,
    reconnect_interval: Duration,
    handler: Option<Arc<dyn SessionHandler>>,
    initialized: AtomicBool,
    attempt_in_flight: AtomicBool,
    shut_down: AtomicBool,
}

impl ConnectionManager {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        options: ConnectOptions,
        reconnect_interval: Duration,
    ) -> Self {
        Self {
            client,
            options,
            state: AtomicConnectionState::default(),
            scheduler: ReconnectScheduler::new(),
            reconnect_interval,
            handler: None,
            initialized: AtomicBool::new(false),
            attempt_in_flight: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Attach the role hook invoked on connection and message arrival
    pub fn with_handler(mut self, handler: Arc<dyn SessionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    pub fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval
    }

    pub fn scheduler(&self) -> &ReconnectScheduler {
        &self.scheduler
    }

    pub fn reconnect_pending(&self) -> bool {
        self.scheduler.is_pending()
    }

    /// Whether a connect call is currently waiting on the broker
    pub fn attempt_in_flight(&self) -> bool {
        self.attempt_in_flight.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Register the transport callback and make the first connect attempt
    ///
    /// A failed first attempt is not an error: recovery has been scheduled.
    pub async fn initialize(self: &Arc<Self>) -> Result<ConnectOutcome, LifecycleError> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(LifecycleError::AlreadyInitialized);
        }

        let bridge = Arc::new(CallbackBridge {
            manager: Arc::downgrade(self),
        });
        self.client.set_callback(bridge);

        Ok(self.connect().await)
    }

    /// Attempt to establish the session
    pub async fn connect(self: &Arc<Self>) -> ConnectOutcome {
        let span = crate::connection_span!(interval_ms = self.reconnect_interval.as_millis() as u64);
        self.connect_inner().instrument(span).await
    }

    async fn connect_inner(self: &Arc<Self>) -> ConnectOutcome {
        if self.is_shut_down() {
            debug!("Connect requested after shutdown, ignoring");
            return ConnectOutcome::ShutDown;
        }
        if self.attempt_in_flight.swap(true, Ordering::AcqRel) {
            debug!("Connect attempt already in flight, skipping");
            return ConnectOutcome::InProgress;
        }

        let (outcome, became_connected) = self.attempt().await;
        self.attempt_in_flight.store(false, Ordering::Release);

        // Losses reported during the attempt were deferred to this point
        if self.state.load() != ConnectionState::Connected {
            self.schedule_reconnect();
        } else if became_connected {
            self.notify_connected().await;
        }
        outcome
    }

    /// One connect call; the flag says whether this moved us into `Connected`
    async fn attempt(&self) -> (ConnectOutcome, bool) {
        if self.client.is_connected() {
            debug!("Broker client already connected, skipping connect attempt");
            let previous = self.state.swap(ConnectionState::Connected);
            metrics().set_connected(true);
            return (
                ConnectOutcome::AlreadyConnected,
                previous != ConnectionState::Connected,
            );
        }

        self.state.store(ConnectionState::Connecting);
        metrics().record_connection_attempt();

        match self.client.connect(&self.options).await {
            Ok(()) => {
                if self
                    .state
                    .compare_exchange(ConnectionState::Connecting, ConnectionState::Connected)
                    .is_err()
                {
                    debug!("Connection lost while the connect call was completing");
                    return (ConnectOutcome::Failed, false);
                }
                metrics().record_connection_established();
                info!("Connected to MQTT broker");
                (ConnectOutcome::Connected, true)
            }
            Err(e) => {
                metrics().record_connection_failure();
                error!("MQTT connection failed: {}", e);
                self.state.store(ConnectionState::Disconnected);
                (ConnectOutcome::Failed, false)
            }
        }
    }

    async fn notify_connected(self: &Arc<Self>) {
        if let Some(handler) = &self.handler {
            handler.on_connected(self).await;
        }
    }

    /// Transport callback: the session dropped underneath us
    ///
    /// Runs on the client's delivery context, so it only flips state and
    /// queues recovery.
    pub fn on_connection_lost(self: &Arc<Self>, cause: &BrokerError) {
        let previous = self.state.swap(ConnectionState::Disconnected);
        metrics().record_connection_lost();
        warn!(previous = %previous, "MQTT connection lost: {}", cause);
        self.schedule_reconnect();
    }

    /// Report a connectivity failure observed by a worker
    ///
    /// Only a `Connected` cache is demoted: a report that races a connect
    /// attempt refers to the session before it and must not void the attempt.
    pub fn connection_failed(self: &Arc<Self>, cause: &BrokerError) -> ScheduleOutcome {
        if self
            .state
            .compare_exchange(ConnectionState::Connected, ConnectionState::Disconnected)
            .is_ok()
        {
            metrics().set_connected(false);
        }
        debug!(state = %self.state.load(), "Connectivity failure reported: {}", cause);
        self.schedule_reconnect()
    }

    /// Queue a delayed connect unless connected or already queued
    pub fn schedule_reconnect(self: &Arc<Self>) -> ScheduleOutcome {
        if self.state.load() == ConnectionState::Connected {
            debug!("Reconnect not needed: client is connected");
            return ScheduleOutcome::NotNeeded;
        }
        if self.attempt_in_flight() {
            debug!("Reconnect deferred: connect attempt in flight");
            return ScheduleOutcome::InFlight;
        }

        let manager = Arc::clone(self);
        let outcome = self
            .scheduler
            .schedule(self.reconnect_interval, async move {
                manager.connect().await;
            });

        match outcome {
            ScheduleOutcome::Scheduled => {
                metrics().record_reconnect_scheduled();
                info!(
                    "Scheduling MQTT reconnect in {} ms",
                    self.reconnect_interval.as_millis()
                );
            }
            ScheduleOutcome::AlreadyPending => {
                debug!("Reconnect not needed: already scheduled");
            }
            ScheduleOutcome::ShutDown => {
                debug!("Reconnect not scheduled: shutting down");
            }
            ScheduleOutcome::NotNeeded | ScheduleOutcome::InFlight => {}
        }
        outcome
    }

    /// Whether a publish/subscribe may be attempted right now
    ///
    /// Reads the cached state first and only asks the client when the cache
    /// claims `Connected`, demoting the cache if the client disagrees.
    pub fn is_connected(&self) -> bool {
        if self.state.load() != ConnectionState::Connected {
            return false;
        }
        if self.client.is_connected() {
            return true;
        }
        if self
            .state
            .compare_exchange(ConnectionState::Connected, ConnectionState::Disconnected)
            .is_ok()
        {
            metrics().set_connected(false);
            debug!("Broker client reports the link down");
        }
        false
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BrokerError> {
        if self.state.load() != ConnectionState::Connected {
            return Err(BrokerError::NotConnected);
        }
        self.client.publish(topic, payload, qos, retain).await
    }

    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BrokerError> {
        if self.state.load() != ConnectionState::Connected {
            return Err(BrokerError::NotConnected);
        }
        self.client.subscribe(topic, qos).await
    }

    fn dispatch_message(&self, topic: &str, payload: &[u8]) {
        match &self.handler {
            Some(handler) => handler.on_message(topic, payload),
            None => debug!("Ignoring message on {} with no handler", topic),
        }
    }

    /// Stop recovery, end the session and release the client
    ///
    /// The pending reconnect is cancelled before the disconnect so no attempt
    /// can fire once shutdown has begun. Failures are logged, never returned.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            debug!("Connection manager already shut down");
            return;
        }
        info!("Shutting down MQTT connection");

        let cancelled = self.scheduler.cancel_all();
        if cancelled > 0 {
            debug!("Cancelled {} reconnect task(s)", cancelled);
        }

        if self.client.is_connected() {
            if let Err(e) = self.client.disconnect().await {
                error!("Failed to disconnect from MQTT broker: {}", e);
            }
        }
        self.client.close().await;

        self.state.store(ConnectionState::Disconnected);
        metrics().set_connected(false);
        info!("MQTT connection shut down");
    }
}

/// Routes transport events back into the manager without keeping it alive
struct CallbackBridge {
    manager: Weak<ConnectionManager>,
}

impl BrokerCallback for CallbackBridge {
    fn connection_lost(&self, cause: &BrokerError) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_connection_lost(cause);
        }
    }

    fn message_arrived(&self, topic: &str, payload: &[u8]) {
        if let Some(manager) = self.manager.upgrade() {
            manager.dispatch_message(topic, payload);
        }
    }
}
