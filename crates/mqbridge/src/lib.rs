//! Top-level facade crate for mqbridge.
//!
//! Re-exports core types and the gateway library so users can depend on a single crate.

pub mod core {
    pub use mqbridge_core::*;
}

pub mod gateway {
    pub use mqbridge_gateway::*;
}

/// Types needed to embed the bridge: config, server and the broker seam.
pub mod prelude {
    pub use mqbridge_core::{BridgeError, ErrorCode, Topic, TopicKind, TopicSet};
    pub use mqbridge_gateway::broker::{BrokerLink, BrokerTransport, LinkEvent, LinkState};
    pub use mqbridge_gateway::config::BridgeConfig;
    pub use mqbridge_gateway::BridgeServer;
}
