//! Wire formats on both sides of the bridge.
//!
//! - viewer: JSON frames exchanged with WebSocket viewers.
//! - control: the control command published back to the broker.
//! - telemetry: payloads published by the device on the sensors and status topics.
//!
//! All parsers are panic-free: malformed input is reported as
//! `BridgeError::MalformedMessage`.

pub mod control;
pub mod telemetry;
pub mod viewer;
