//! Temperature reading wire format
//!
//! Producer and consumer exchange a UTF-8 JSON object with a single field:
//! `{"temp": 23.46}`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Single temperature reading as published on the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    pub temp: f64,
}

impl TemperatureReading {
    /// Reading rounded to two decimal places
    pub fn rounded(value: f64) -> Self {
        Self {
            temp: round_two_decimals(value),
        }
    }
}

/// Payload encode/decode failures
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Reading is not a finite number: {0}")]
    NonFinite(f64),
    #[error("Serialization error")]
    Serialization(#[source] serde_json::Error),
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8(#[source] std::str::Utf8Error),
}

/// Round half away from zero to two decimal places
pub fn round_two_decimals(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Serialize a reading into its JSON wire form
pub fn encode_reading(reading: &TemperatureReading) -> Result<Vec<u8>, PayloadError> {
    // serde_json writes NaN and infinities as `null`, which no consumer can read back
    if !reading.temp.is_finite() {
        return Err(PayloadError::NonFinite(reading.temp));
    }
    serde_json::to_vec(reading).map_err(PayloadError::Serialization)
}

/// Interpret raw payload bytes as UTF-8 text
pub fn decode_text(payload: &[u8]) -> Result<&str, PayloadError> {
    std::str::from_utf8(payload).map_err(PayloadError::InvalidUtf8)
}

/// Extract the reading from a decoded payload, if it is one
pub fn parse_reading(text: &str) -> Option<TemperatureReading> {
    serde_json::from_str(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_two_decimals() {
        assert_eq!(round_two_decimals(23.456), 23.46);
        assert_eq!(round_two_decimals(23.454), 23.45);
        assert_eq!(round_two_decimals(15.0), 15.0);
    }

    #[test]
    fn test_encode_rounded_reading() {
        let payload = encode_reading(&TemperatureReading::rounded(23.456)).unwrap();
        assert_eq!(String::from_utf8(payload).unwrap(), r#"{"temp":23.46}"#);
    }

    #[test]
    fn test_encode_rejects_non_finite() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = encode_reading(&TemperatureReading { temp: value });
            assert!(matches!(result, Err(PayloadError::NonFinite(_))));
        }
    }

    #[test]
    fn test_decode_text() {
        assert_eq!(decode_text(br#"{"temp":21.5}"#).unwrap(), r#"{"temp":21.5}"#);
        assert!(matches!(
            decode_text(&[0xff, 0xfe, 0x00]),
            Err(PayloadError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_parse_reading() {
        assert_eq!(
            parse_reading(r#"{"temp":21.5}"#),
            Some(TemperatureReading { temp: 21.5 })
        );
        assert_eq!(parse_reading("21.5"), None);
        assert_eq!(parse_reading("not json"), None);
        assert_eq!(parse_reading(r#"{"humidity":40}"#), None);
    }
}
