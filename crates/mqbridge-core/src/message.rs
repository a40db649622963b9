//! Messages received from the broker.

use std::sync::OnceLock;
use std::time::SystemTime;

use bytes::Bytes;
use serde_json::json;

use crate::topic::Topic;

/// One message received from the broker. Immutable once built; shared across
/// every handler as `Arc<BrokerMessage>`.
#[derive(Debug)]
pub struct BrokerMessage {
    topic: Topic,
    payload: Bytes,
    received_at: SystemTime,
    frame: OnceLock<String>,
}

impl BrokerMessage {
    pub fn new(topic: Topic, payload: Bytes) -> Self {
        Self::with_time(topic, payload, SystemTime::now())
    }

    pub fn with_time(topic: Topic, payload: Bytes, received_at: SystemTime) -> Self {
        Self {
            topic,
            payload,
            received_at,
            frame: OnceLock::new(),
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }

    /// Payload as text. Invalid UTF-8 sequences are replaced.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Viewer frame `{"topic": ..., "payload": ...}`.
    ///
    /// Serialized once, then shared by every session forwarding this message.
    pub fn viewer_frame(&self) -> &str {
        self.frame.get_or_init(|| {
            json!({
                "topic": self.topic.as_str(),
                "payload": self.payload_text(),
            })
            .to_string()
        })
    }
}
