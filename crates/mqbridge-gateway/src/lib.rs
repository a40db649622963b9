//! mqbridge gateway library entry.
//!
//! This crate wires the broker link, viewer transport, client registry and
//! server lifecycle into the MQTT <-> WebSocket relay. It is consumed by the
//! binary (`main.rs`) and by integration tests.

pub mod app_state;
pub mod broker;
pub mod config;
pub mod obs;
pub mod relay;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod transport;

pub use server::BridgeServer;
