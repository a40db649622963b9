//! Device telemetry published on the sensors and status topics.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Literal status payload meaning the device is up.
pub const STATUS_ONLINE: &[u8] = b"online";

/// One sensor sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub temperature: f64,
    pub humidity: f64,
    pub battery: f64,
}

impl SensorReading {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| BridgeError::MalformedMessage(format!("invalid sensor payload: {e}")))
    }
}

/// Device liveness reported on the status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    /// `online` means Online; any other payload is treated as Offline.
    pub fn from_payload(payload: &[u8]) -> Self {
        if payload == STATUS_ONLINE {
            DeviceStatus::Online
        } else {
            DeviceStatus::Offline
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn parse_reading() {
        let r = SensorReading::parse(br#"{"temperature":22.5,"humidity":40,"battery":80}"#).unwrap();
        assert_eq!(r.temperature, 22.5);
        assert_eq!(r.humidity, 40.0);
        assert_eq!(r.battery, 80.0);
    }

    #[test]
    fn reading_requires_all_fields() {
        assert!(SensorReading::parse(br#"{"temperature":22.5}"#).is_err());
        assert!(SensorReading::parse(b"not json").is_err());
    }

    #[test]
    fn status_is_online_only_for_exact_literal() {
        assert_eq!(DeviceStatus::from_payload(b"online"), DeviceStatus::Online);
        assert_eq!(DeviceStatus::from_payload(b"Online"), DeviceStatus::Offline);
        assert_eq!(DeviceStatus::from_payload(b"offline"), DeviceStatus::Offline);
        assert_eq!(DeviceStatus::from_payload(b""), DeviceStatus::Offline);
    }
}
