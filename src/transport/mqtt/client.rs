//! Impure I/O operations for the MQTT broker client
//!
//! Owns the rumqttc `AsyncClient`, spawns the event-loop driver task for each
//! session, and translates driver events into [`BrokerCallback`] calls.

use super::connection::{
    configure_mqtt_options, parse_broker_url, resolve_credentials, to_rumqttc_qos, BrokerEndpoint,
    Credentials,
};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::BrokerSection;
use crate::transport::{BrokerCallback, BrokerClient, BrokerError, ConnectOptions, QoS};
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause between failed polls while the client re-dials on its own
const AUTO_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Grace period for the driver to stop after a DISCONNECT
const DRIVER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of rumqttc's request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

type SharedCallback = Arc<RwLock<Option<Arc<dyn BrokerCallback>>>>;

/// Link status reported by the driver to a pending `connect`
#[derive(Debug, Clone, PartialEq)]
enum LinkStatus {
    Dialing,
    Up,
    Down(String),
}

/// One broker session: the request handle plus its driver task
struct Session {
    client: AsyncClient,
    driver: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// rumqttc-backed [`BrokerClient`]
pub struct MqttBrokerClient {
    client_id: String,
    endpoint: BrokerEndpoint,
    credentials: Option<Credentials>,
    session: Mutex<Option<Session>>,
    connected: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    disconnecting: Arc<AtomicBool>,
    closed: AtomicBool,
    callback: SharedCallback,
}

impl MqttBrokerClient {
    pub fn new(client_id: impl Into<String>, broker: &BrokerSection) -> Result<Self, BrokerError> {
        let endpoint = parse_broker_url(&broker.url)?;
        Ok(Self {
            client_id: client_id.into(),
            endpoint,
            credentials: resolve_credentials(broker),
            session: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            disconnecting: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            callback: Arc::new(RwLock::new(None)),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    /// Clone the request handle of the live session
    async fn request_handle(&self) -> Result<AsyncClient, BrokerError> {
        self.ensure_open()?;
        let session = self.session.lock().await;
        session
            .as_ref()
            .map(|session| session.client.clone())
            .ok_or(BrokerError::NotConnected)
    }

    /// Stop and drop the current session's driver, if any
    async fn teardown_session(&self) {
        if let Some(session) = self.session.lock().await.take() {
            let _ = session.shutdown_tx.send(true);
            session.driver.abort();
        }
        self.connected.store(false, Ordering::Release);
    }

    /// Wait until the driver reports the CONNACK or a failure
    async fn wait_for_connection_confirmation(
        mut status_rx: watch::Receiver<LinkStatus>,
        timeout: Duration,
    ) -> Result<(), BrokerError> {
        let outcome = tokio::time::timeout(timeout, async {
            loop {
                match &*status_rx.borrow_and_update() {
                    LinkStatus::Up => return Ok(()),
                    LinkStatus::Down(reason) => {
                        return Err(BrokerError::ConnectionFailed(reason.clone()))
                    }
                    LinkStatus::Dialing => {}
                }
                if status_rx.changed().await.is_err() {
                    return Err(BrokerError::ConnectionFailed(
                        "event loop stopped before CONNACK".to_string(),
                    ));
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(BrokerError::ConnectionFailed(format!(
                "no CONNACK within {}s",
                timeout.as_secs()
            ))),
        }
    }
}

/// Shared state the driver task needs
///
/// Only the driver of the newest session may touch the link flag or report
/// a loss; a replaced driver winding down stays silent.
struct Driver {
    connected: Arc<AtomicBool>,
    generation: u64,
    current_generation: Arc<AtomicU64>,
    disconnecting: Arc<AtomicBool>,
    callback: SharedCallback,
    status_tx: watch::Sender<LinkStatus>,
    automatic_reconnect: bool,
}

impl Driver {
    fn is_current(&self) -> bool {
        self.current_generation.load(Ordering::Acquire) == self.generation
    }

    fn set_link(&self, up: bool) {
        if self.is_current() {
            self.connected.store(up, Ordering::Release);
        }
    }

    fn callback(&self) -> Option<Arc<dyn BrokerCallback>> {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mark the link down and notify the callback once per established link
    fn link_down(&self, reason: String) {
        let was_connected = self.is_current() && self.connected.swap(false, Ordering::AcqRel);
        let _ = self.status_tx.send(LinkStatus::Down(reason.clone()));

        if was_connected && !self.disconnecting.load(Ordering::Acquire) {
            if let Some(callback) = self.callback() {
                callback.connection_lost(&BrokerError::ConnectionLost(reason));
            }
        }
    }

    /// Returns false when the driver should stop
    fn handle_route(&self, route: EventRoute) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                self.set_link(true);
                let _ = self.status_tx.send(LinkStatus::Up);
                debug!(target: "mqtt_transport", "CONNACK received");
                true
            }
            EventRoute::MessageReceived { topic, payload, .. } => {
                match self.callback() {
                    Some(callback) => callback.message_arrived(&topic, &payload),
                    None => debug!(target: "mqtt_transport", "No callback registered, dropping message on {}", topic),
                }
                true
            }
            EventRoute::Disconnected => {
                self.link_down("broker closed the session".to_string());
                self.automatic_reconnect
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                rejected,
            } => {
                if rejected > 0 {
                    error!("Broker rejected {} subscription filter(s) (packet {})", rejected, packet_id);
                } else {
                    debug!(target: "mqtt_transport", "Subscription confirmed: packet {}", packet_id);
                }
                true
            }
            EventRoute::OutgoingDisconnect => {
                self.set_link(false);
                !self.disconnecting.load(Ordering::Acquire)
            }
            EventRoute::InfrastructureEvent(event) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    async fn run(self, mut event_loop: EventLoop, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ever_connected = false;

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }

                polled = event_loop.poll() => {
                    match polled {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            if route == EventRoute::ConnectionAcknowledged {
                                ever_connected = true;
                            }
                            if !self.handle_route(route) {
                                break;
                            }
                        }
                        Err(e) => {
                            if self.disconnecting.load(Ordering::Acquire) {
                                break;
                            }
                            warn!("MQTT event loop error: {}", e);
                            self.link_down(e.to_string());

                            if !(self.automatic_reconnect && ever_connected) {
                                break;
                            }
                            tokio::select! {
                                _ = shutdown_rx.changed() => break,
                                _ = tokio::time::sleep(AUTO_RECONNECT_DELAY) => {}
                            }
                        }
                    }
                }
            }
        }

        self.set_link(false);
        debug!(target: "mqtt_transport", generation = self.generation, "MQTT event loop stopped");
    }
}

#[async_trait]
impl BrokerClient for MqttBrokerClient {
    async fn connect(&self, options: &ConnectOptions) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.teardown_session().await;
        self.disconnecting.store(false, Ordering::Release);

        let mqtt_options = configure_mqtt_options(
            &self.client_id,
            &self.endpoint,
            self.credentials.as_ref(),
            options,
        );
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(LinkStatus::Dialing);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let driver = Driver {
            connected: self.connected.clone(),
            generation,
            current_generation: self.generation.clone(),
            disconnecting: self.disconnecting.clone(),
            callback: self.callback.clone(),
            status_tx,
            automatic_reconnect: options.automatic_reconnect,
        };
        let handle = tokio::spawn(driver.run(event_loop, shutdown_rx));

        info!(
            "Connecting to MQTT broker {}:{} as {}",
            self.endpoint.host, self.endpoint.port, self.client_id
        );
        let timeout = Duration::from_secs(options.connection_timeout_secs.max(1));
        if let Err(e) = Self::wait_for_connection_confirmation(status_rx, timeout).await {
            let _ = shutdown_tx.send(true);
            handle.abort();
            self.connected.store(false, Ordering::Release);
            return Err(e);
        }

        *self.session.lock().await = Some(Session {
            client,
            driver: handle,
            shutdown_tx,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };

        self.disconnecting.store(true, Ordering::Release);
        let result = session
            .client
            .disconnect()
            .await
            .map_err(|e| BrokerError::DisconnectFailed(Box::new(e)));

        let abort = session.driver.abort_handle();
        match tokio::time::timeout(DRIVER_STOP_TIMEOUT, session.driver).await {
            Ok(Ok(())) => debug!(target: "mqtt_transport", "Event loop shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("Event loop didn't stop after DISCONNECT, aborting");
                let _ = session.shutdown_tx.send(true);
                abort.abort();
            }
        }

        self.connected.store(false, Ordering::Release);
        result
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.disconnecting.store(true, Ordering::Release);
        self.teardown_session().await;
        debug!(target: "mqtt_transport", "MQTT client {} closed", self.client_id);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BrokerError> {
        let client = self.request_handle().await?;
        client
            .publish(topic, to_rumqttc_qos(qos), retain, payload)
            .await
            .map_err(|e| BrokerError::PublishFailed {
                topic: topic.to_string(),
                source: Box::new(e),
            })
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BrokerError> {
        let client = self.request_handle().await?;
        client
            .subscribe(topic, to_rumqttc_qos(qos))
            .await
            .map_err(|e| BrokerError::SubscriptionFailed {
                topic: topic.to_string(),
                source: Box::new(e),
            })
    }

    fn set_callback(&self, callback: Arc<dyn BrokerCallback>) {
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }
}

impl Drop for MqttBrokerClient {
    fn drop(&mut self) {
        // No async in Drop: only make sure the driver task does not outlive us.
        if let Some(session) = self.session.get_mut().take() {
            let _ = session.shutdown_tx.send(true);
            session.driver.abort();
        }
    }
}
