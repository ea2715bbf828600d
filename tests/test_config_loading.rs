//! Configuration loading and validation tests

use sensorbus::config::{ConfigError, SensorConfig};
use sensorbus::transport::QoS;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{contents}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_every_section() {
    let temp_file = write_config(
        r#"
[broker]
url = "mqtts://broker.example.com"
client_id = "greenhouse"
username_env = "MQTT_USERNAME"
password_env = "MQTT_PASSWORD"

[connection]
automatic_reconnect = true
clean_session = true
connection_timeout_secs = 10
keep_alive_interval_secs = 30
max_in_flight = 20

[telemetry]
topic = "greenhouse/temperature"
qos = 2
reconnect_interval_ms = 1500

[publisher]
interval_ms = 1000
retain = false
min_reading = -5.0
max_reading = 5.0

[health]
enabled = true
port = 9090
"#,
    );

    let config = SensorConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.broker.url, "mqtts://broker.example.com");
    assert_eq!(config.client_id_for("subscriber"), "greenhouse-subscriber");
    assert_eq!(config.broker.username_env.as_deref(), Some("MQTT_USERNAME"));
    assert!(config.connection.automatic_reconnect);
    assert_eq!(config.connection.connection_timeout_secs, 10);
    assert_eq!(config.connection.keep_alive_interval_secs, 30);
    assert_eq!(config.connection.max_in_flight, 20);
    assert_eq!(config.telemetry.topic, "greenhouse/temperature");
    assert_eq!(config.telemetry.qos, QoS::ExactlyOnce);
    assert_eq!(config.reconnect_interval(), Duration::from_millis(1500));
    assert_eq!(config.publish_interval(), Duration::from_secs(1));
    assert!(!config.publisher.retain);
    assert_eq!(config.publisher.min_reading, -5.0);
    assert!(config.health.enabled);
    assert_eq!(config.health.port, 9090);
}

#[test]
fn test_empty_file_yields_defaults() {
    let temp_file = write_config("");
    let config = SensorConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config, SensorConfig::default());
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = SensorConfig::load_from_file(Path::new("/nonexistent/sensorbus.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_invalid_toml_syntax() {
    let temp_file = write_config("[broker\nurl = ");
    let result = SensorConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_wrong_field_type() {
    let temp_file = write_config("[publisher]\ninterval_ms = \"fast\"\n");
    let result = SensorConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_unsupported_scheme_is_rejected() {
    let temp_file = write_config("[broker]\nurl = \"ws://localhost:9001\"\n");
    let result = SensorConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_wildcard_topic_is_rejected() {
    let temp_file = write_config("[telemetry]\ntopic = \"sensor/+\"\n");
    let err = SensorConfig::load_from_file(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("wildcards"));
}

#[test]
fn test_show_renders_back_to_toml() {
    let config = SensorConfig::default();
    let rendered = toml::to_string_pretty(&config).unwrap();
    let reparsed: SensorConfig = toml::from_str(&rendered).unwrap();
    assert_eq!(reparsed, config);
}
