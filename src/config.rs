//! TOML configuration for the sensorbus roles
//!
//! Every section is optional; the defaults reproduce the stock deployment
//! (local broker, `sensor/temperature`, 3 s reconnect, 5 s publish cadence).

use crate::transport::mqtt::parse_broker_url;
use crate::transport::{ConnectOptions, QoS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SensorConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    /// Passed through unchanged to the broker client
    #[serde(default)]
    pub connection: ConnectOptions,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub publisher: PublisherSection,
    #[serde(default)]
    pub health: HealthSection,
}

/// Broker location and identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerSection {
    /// `mqtt://`, `tcp://`, `mqtts://` or `ssl://` URL
    pub url: String,
    /// Base client id; the role name is appended
    pub client_id: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: "mqtt://localhost:1883".to_string(),
            client_id: "client-1".to_string(),
            username_env: None,
            password_env: None,
        }
    }
}

/// Settings shared by both roles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetrySection {
    pub topic: String,
    pub qos: QoS,
    pub reconnect_interval_ms: u64,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            topic: "sensor/temperature".to_string(),
            qos: QoS::AtLeastOnce,
            reconnect_interval_ms: 3000,
        }
    }
}

/// Producer cadence and reading range
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublisherSection {
    pub interval_ms: u64,
    pub retain: bool,
    pub min_reading: f64,
    pub max_reading: f64,
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            retain: true,
            min_reading: 15.0,
            max_reading: 30.0,
        }
    }
}

/// Optional HTTP health endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthSection {
    pub enabled: bool,
    pub port: u16,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SensorConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SensorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_broker_url(&self.broker.url).map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        if self.broker.client_id.trim().is_empty() {
            return Err(invalid("broker.client_id must not be empty"));
        }

        validate_topic(&self.telemetry.topic)?;

        if self.telemetry.reconnect_interval_ms == 0 {
            return Err(invalid("telemetry.reconnect_interval_ms must be greater than 0"));
        }
        if self.publisher.interval_ms == 0 {
            return Err(invalid("publisher.interval_ms must be greater than 0"));
        }

        let (min, max) = (self.publisher.min_reading, self.publisher.max_reading);
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(invalid(
                "publisher.min_reading must be finite and below publisher.max_reading",
            ));
        }

        if self.connection.max_in_flight == 0 {
            return Err(invalid("connection.max_in_flight must be at least 1"));
        }
        if self.connection.keep_alive_interval_secs > u64::from(u16::MAX) {
            return Err(invalid("connection.keep_alive_interval_secs must fit in 16 bits"));
        }
        if self.connection.connection_timeout_secs == 0 {
            return Err(invalid("connection.connection_timeout_secs must be at least 1"));
        }

        Ok(())
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry.reconnect_interval_ms)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publisher.interval_ms)
    }

    /// Client id for one role, e.g. `client-1-publisher`
    pub fn client_id_for(&self, role: &str) -> String {
        format!("{}-{}", self.broker.client_id, role)
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::InvalidConfig(message.to_string())
}

/// Topics are published to, so wildcards are not allowed
fn validate_topic(topic: &str) -> Result<(), ConfigError> {
    if topic.is_empty() {
        return Err(invalid("telemetry.topic must not be empty"));
    }
    if topic.contains(['+', '#']) {
        return Err(ConfigError::InvalidConfig(format!(
            "telemetry.topic must not contain wildcards: {topic}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_deployment() {
        let config = SensorConfig::default();
        assert_eq!(config.broker.url, "mqtt://localhost:1883");
        assert_eq!(config.broker.client_id, "client-1");
        assert_eq!(config.telemetry.topic, "sensor/temperature");
        assert_eq!(config.telemetry.qos, QoS::AtLeastOnce);
        assert_eq!(config.reconnect_interval(), Duration::from_millis(3000));
        assert_eq!(config.publish_interval(), Duration::from_millis(5000));
        assert!(config.publisher.retain);
        assert!(!config.health.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = SensorConfig::from_toml_str("").unwrap();
        assert_eq!(config, SensorConfig::default());
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config = SensorConfig::from_toml_str(
            r#"
[connection]
automatic_reconnect = true

[telemetry]
topic = "lab/room-2/temperature"
"#,
        )
        .unwrap();

        assert!(config.connection.automatic_reconnect);
        assert!(config.connection.clean_session);
        assert_eq!(config.telemetry.topic, "lab/room-2/temperature");
        assert_eq!(config.telemetry.reconnect_interval_ms, 3000);
    }

    #[test]
    fn test_client_id_for_role() {
        let config = SensorConfig::default();
        assert_eq!(config.client_id_for("publisher"), "client-1-publisher");
    }

    #[test]
    fn test_invalid_qos_is_a_parse_error() {
        let result = SensorConfig::from_toml_str("[telemetry]\nqos = 3\n");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_validation_failures() {
        let cases: Vec<(&str, fn(&mut SensorConfig))> = vec![
            ("bad url", |c| c.broker.url = "http://localhost".to_string()),
            ("empty client id", |c| c.broker.client_id = " ".to_string()),
            ("empty topic", |c| c.telemetry.topic = String::new()),
            ("wildcard topic", |c| c.telemetry.topic = "sensor/#".to_string()),
            ("zero reconnect", |c| c.telemetry.reconnect_interval_ms = 0),
            ("zero publish", |c| c.publisher.interval_ms = 0),
            ("inverted range", |c| c.publisher.min_reading = 40.0),
            ("nan range", |c| c.publisher.max_reading = f64::NAN),
            ("zero in-flight", |c| c.connection.max_in_flight = 0),
            ("huge keep-alive", |c| c.connection.keep_alive_interval_secs = 70_000),
            ("zero timeout", |c| c.connection.connection_timeout_secs = 0),
        ];

        for (name, mutate) in cases {
            let mut config = SensorConfig::default();
            mutate(&mut config);
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidConfig(_))),
                "case {name} should fail validation"
            );
        }
    }
}
