//! sensorbus - resilient MQTT telemetry producer and consumer
//!
//! Two small clients share one connection lifecycle: a producer that
//! publishes a temperature reading on a fixed cadence, and a consumer that
//! subscribes to the same topic and surfaces every reading. Both survive
//! broker outages by funnelling every connectivity failure into a single
//! delayed reconnect, and both gate their work on the cached connection state.
//!
//! # Overview
//!
//! - [`transport`] - the broker capability traits and the rumqttc client
//! - [`lifecycle`] - connection state, reconnect scheduler and manager
//! - [`worker`] - producer and consumer roles
//! - [`payload`] - the `{"temp": <number>}` wire format
//! - [`config`], [`error`], [`observability`] - ambient plumbing
//!
//! # Quick Start
//!
//! ```rust
//! use sensorbus::lifecycle::{ConnectionManager, DEFAULT_RECONNECT_INTERVAL};
//! use sensorbus::testing::{FixedReading, MockBrokerClient};
//! use sensorbus::transport::ConnectOptions;
//! use sensorbus::worker::{ProducerWorker, TickOutcome};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let client = Arc::new(MockBrokerClient::new());
//! let manager = Arc::new(ConnectionManager::new(
//!     client.clone(),
//!     ConnectOptions::default(),
//!     DEFAULT_RECONNECT_INTERVAL,
//! ));
//! manager.initialize().await.unwrap();
//!
//! let producer = ProducerWorker::new(
//!     manager.clone(),
//!     Box::new(FixedReading::new(23.456)),
//!     "sensor/temperature",
//! );
//! assert_eq!(producer.on_tick().await, TickOutcome::Published(23.46));
//!
//! manager.shutdown().await;
//! # });
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod payload;
pub mod testing;
pub mod transport;
pub mod worker;

pub use config::SensorConfig;
pub use error::{AppError, AppResult};
pub use lifecycle::{ConnectionManager, ConnectionState};
pub use transport::mqtt::MqttBrokerClient;
pub use worker::{ConsumerWorker, ProducerWorker};
