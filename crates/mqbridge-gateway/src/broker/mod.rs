//! Broker side of the bridge.
//!
//! `BrokerLink` owns the single broker connection shared by every viewer: link
//! state, recorded subscriptions, handler fan-out and control publishes. The
//! wire is behind `BrokerTransport`; `mqtt` drives a real broker through
//! rumqttc and `memory` records traffic in-process.

pub mod link;
pub mod memory;
pub mod mqtt;
pub mod transport;

pub use link::{BrokerLink, HandlerId};
pub use memory::MemoryTransport;
pub use transport::{BrokerTransport, LinkEvent, LinkState};
