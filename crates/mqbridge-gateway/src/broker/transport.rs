use async_trait::async_trait;
use bytes::Bytes;

use mqbridge_core::error::Result;
use mqbridge_core::topic::Topic;

/// Broker link state. Only transport events move it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        }
    }
}

/// Events a transport driver feeds into `BrokerLink::handle_event`.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Connecting,
    Connected,
    Disconnected { reason: String },
    Message { topic: Topic, payload: Bytes },
}

/// Outbound half of a broker connection.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn subscribe(&self, topics: &[Topic]) -> Result<()>;
    async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
}
