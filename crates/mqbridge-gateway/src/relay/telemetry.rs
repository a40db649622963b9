//! Latest device telemetry, kept by the server's own broker consumer.

use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use tokio::sync::mpsc;

use mqbridge_core::message::BrokerMessage;
use mqbridge_core::protocol::telemetry::{DeviceStatus, SensorReading};
use mqbridge_core::topic::{TopicKind, TopicSet};

#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetrySnapshot {
    pub device: Option<DeviceStatus>,
    pub reading: Option<SensorReading>,
    pub reading_at: Option<SystemTime>,
}

#[derive(Default)]
pub struct TelemetryState {
    inner: RwLock<TelemetrySnapshot>,
}

impl TelemetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        *self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fold one broker message into the snapshot.
    pub fn observe(&self, msg: &BrokerMessage, topics: &TopicSet) {
        match topics.classify(msg.topic()) {
            TopicKind::Sensors => match SensorReading::parse(msg.payload()) {
                Ok(reading) => {
                    let mut s = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
                    s.reading = Some(reading);
                    s.reading_at = Some(msg.received_at());
                }
                Err(e) => tracing::debug!(error = %e, "telemetry skipped sensor message"),
            },
            TopicKind::Status => {
                let status = DeviceStatus::from_payload(msg.payload());
                let mut s = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
                if s.device != Some(status) {
                    tracing::info!(device = status.as_str(), "device status changed");
                }
                s.device = Some(status);
            }
            TopicKind::Control | TopicKind::Other => {}
        }
    }
}

/// Consume a broker handler channel until it closes.
pub async fn run_observer(
    state: Arc<TelemetryState>,
    topics: TopicSet,
    mut rx: mpsc::Receiver<Arc<BrokerMessage>>,
) {
    while let Some(msg) = rx.recv().await {
        state.observe(&msg, &topics);
    }
    tracing::debug!("telemetry observer stopped");
}
