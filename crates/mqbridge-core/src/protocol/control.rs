//! Control command published on the control topic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, Result};

/// Smallest accepted reporting interval (seconds).
pub const MIN_INTERVAL_SECS: u32 = 1;
/// Largest accepted reporting interval (seconds).
pub const MAX_INTERVAL_SECS: u32 = 3600;

/// Sets the device reporting interval. Wire form: `{"interval": <secs>}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommand {
    #[serde(rename = "interval")]
    pub interval_secs: u32,
}

impl ControlCommand {
    pub fn new(interval_secs: u32) -> Result<Self> {
        let cmd = Self { interval_secs };
        cmd.validate()?;
        Ok(cmd)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&self.interval_secs) {
            return Err(BridgeError::MalformedMessage(format!(
                "interval must be between {MIN_INTERVAL_SECS} and {MAX_INTERVAL_SECS} seconds, got {}",
                self.interval_secs
            )));
        }
        Ok(())
    }

    /// Parse and validate a control payload taken from a viewer frame.
    pub fn from_value(v: &Value) -> Result<Self> {
        let interval = v
            .get("interval")
            .ok_or_else(|| BridgeError::MalformedMessage("control payload missing interval".into()))?;
        let secs = interval
            .as_u64()
            .ok_or_else(|| BridgeError::MalformedMessage(format!("interval must be an integer, got {interval}")))?;
        let secs = u32::try_from(secs)
            .map_err(|_| BridgeError::MalformedMessage(format!("interval out of range: {secs}")))?;
        Self::new(secs)
    }

    /// Canonical JSON payload for the broker.
    pub fn encode(&self) -> String {
        serde_json::json!({ "interval": self.interval_secs }).to_string()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn bounds_are_inclusive() {
        assert!(ControlCommand::new(1).is_ok());
        assert!(ControlCommand::new(3600).is_ok());
        assert!(ControlCommand::new(0).is_err());
        assert!(ControlCommand::new(3601).is_err());
    }

    #[test]
    fn from_value_rejects_non_integers() {
        assert!(ControlCommand::from_value(&json!({"interval": "10"})).is_err());
        assert!(ControlCommand::from_value(&json!({"interval": 2.5})).is_err());
        assert!(ControlCommand::from_value(&json!({"interval": -3})).is_err());
        assert!(ControlCommand::from_value(&json!({})).is_err());
    }

    #[test]
    fn encode_is_canonical() {
        let cmd = ControlCommand::from_value(&json!({"interval": 10, "extra": true})).unwrap();
        assert_eq!(cmd.encode(), r#"{"interval":10}"#);
    }
}
