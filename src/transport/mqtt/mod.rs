//! MQTT implementation of the broker capability set
//!
//! The module separates pure functions from I/O:
//!
//! - [`connection`] - broker URL parsing and option mapping
//! - [`message_handler`] - routing of event-loop events
//! - [`client`] - the rumqttc-backed [`MqttBrokerClient`] and its driver task
//!
//! # Usage
//!
//! ```rust,no_run
//! use sensorbus::config::BrokerSection;
//! use sensorbus::transport::mqtt::MqttBrokerClient;
//! use sensorbus::transport::{BrokerClient, ConnectOptions, QoS};
//!
//! # tokio_test::block_on(async {
//! let broker = BrokerSection::default();
//! let client = MqttBrokerClient::new("client-1-publisher", &broker)?;
//! client.connect(&ConnectOptions::default()).await?;
//! client
//!     .publish("sensor/temperature", br#"{"temp":21.5}"#.to_vec(), QoS::AtLeastOnce, true)
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttBrokerClient;
pub use connection::{parse_broker_url, BrokerEndpoint, Credentials};
pub use message_handler::{EventRoute, MessageHandler};
