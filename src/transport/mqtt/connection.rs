//! Pure connection configuration for the MQTT client
//!
//! Broker URL parsing and the mapping from [`ConnectOptions`] onto rumqttc's
//! `MqttOptions`. Nothing in here touches the network.

use crate::config::BrokerSection;
use crate::transport::{BrokerError, ConnectOptions, QoS};
use rumqttc::{MqttOptions, Transport as RumqttcTransport};
use std::time::Duration;
use url::Url;

/// Where the broker lives and how to reach it
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse a broker URL
///
/// `mqtt://` and `tcp://` are plain TCP (default port 1883), `mqtts://` and
/// `ssl://` use TLS (default port 8883).
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerEndpoint, BrokerError> {
    let url =
        Url::parse(broker_url).map_err(|_| BrokerError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(BrokerError::InvalidBrokerUrl(broker_url.to_string())),
    };

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| BrokerError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerEndpoint {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Username/password pair resolved from the environment
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Resolve credentials from the environment variables named in the config
///
/// A missing password variable yields an empty password; a missing username
/// variable disables authentication entirely.
pub fn resolve_credentials(broker: &BrokerSection) -> Option<Credentials> {
    let username_env = broker.username_env.as_ref()?;
    let username = std::env::var(username_env).ok()?;
    let password = broker
        .password_env
        .as_ref()
        .and_then(|name| std::env::var(name).ok())
        .unwrap_or_default();
    Some(Credentials { username, password })
}

/// Build rumqttc options for one connection attempt
pub fn configure_mqtt_options(
    client_id: &str,
    endpoint: &BrokerEndpoint,
    credentials: Option<&Credentials>,
    options: &ConnectOptions,
) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(client_id, endpoint.host.clone(), endpoint.port);

    if endpoint.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(credentials) = credentials {
        mqtt_options.set_credentials(credentials.username.clone(), credentials.password.clone());
    }

    mqtt_options.set_keep_alive(Duration::from_secs(options.keep_alive_interval_secs));
    mqtt_options.set_clean_session(options.clean_session);
    mqtt_options.set_inflight(options.max_in_flight.max(1));

    mqtt_options
}

/// Map the transport-neutral QoS onto rumqttc's
pub fn to_rumqttc_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}
