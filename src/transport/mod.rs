//! Broker transport abstraction
//!
//! The lifecycle manager and the workers only ever talk to a broker through the
//! [`BrokerClient`] capability set. The production implementation lives in
//! [`mqtt`]; tests use [`crate::testing::MockBrokerClient`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub mod mqtt;

/// Boxed error source carried by transport failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Capability set of a publish/subscribe broker client
///
/// One instance is shared by whichever role uses it. Implementations must be
/// cheap to query through [`BrokerClient::is_connected`]: it is consulted on
/// every producer tick and must never perform network I/O.
#[async_trait::async_trait]
pub trait BrokerClient: Send + Sync {
    /// Open a session with the broker using the given options
    async fn connect(&self, options: &ConnectOptions) -> Result<(), BrokerError>;

    /// Gracefully end the current session
    async fn disconnect(&self) -> Result<(), BrokerError>;

    /// Release every resource held by the client; later calls fail with `Closed`
    async fn close(&self);

    /// Live connection status as seen by the client itself
    fn is_connected(&self) -> bool;

    /// Publish a payload to a topic
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BrokerError>;

    /// Subscribe to a topic
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BrokerError>;

    /// Register the receiver of connection-lost and message-arrived events
    fn set_callback(&self, callback: Arc<dyn BrokerCallback>);
}

/// Receiver of asynchronous broker events
///
/// Both methods are invoked on the client's own delivery context. They must
/// return quickly and must not block.
pub trait BrokerCallback: Send + Sync {
    fn connection_lost(&self, cause: &BrokerError);

    fn message_arrived(&self, topic: &str, payload: &[u8]);
}

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("invalid QoS level {other}, expected 0, 1 or 2")),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// Connection options handed to the broker client unchanged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Let the client re-dial on its own after a loss
    pub automatic_reconnect: bool,
    /// Start every session without stored subscriptions
    pub clean_session: bool,
    /// Maximum wait for the broker's CONNACK
    pub connection_timeout_secs: u64,
    /// MQTT keep-alive interval
    pub keep_alive_interval_secs: u64,
    /// Maximum number of unacknowledged outgoing QoS>0 messages
    pub max_in_flight: u16,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            automatic_reconnect: false,
            clean_session: true,
            connection_timeout_secs: 30,
            keep_alive_interval_secs: 60,
            max_in_flight: 10,
        }
    }
}

/// Transport failures
///
/// Every variant except `InvalidBrokerUrl` is a connectivity error: the
/// lifecycle manager reacts to it by scheduling a reconnect.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Publishing to {topic} failed")]
    PublishFailed {
        topic: String,
        #[source]
        source: BoxError,
    },
    #[error("Subscription to {topic} failed")]
    SubscriptionFailed {
        topic: String,
        #[source]
        source: BoxError,
    },
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] BoxError),
    #[error("Not connected")]
    NotConnected,
    #[error("Client closed")]
    Closed,
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
}

impl BrokerError {
    /// Whether this failure means the session is unusable
    pub fn is_connectivity(&self) -> bool {
        !matches!(self, BrokerError::InvalidBrokerUrl(_))
    }
}
