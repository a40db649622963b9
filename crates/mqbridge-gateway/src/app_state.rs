//! Shared application state for the bridge.
//!
//! Cloned into every request handler; everything inside is shared.

use std::sync::Arc;

use crate::broker::BrokerLink;
use crate::config::BridgeConfig;
use crate::obs::BridgeMetrics;
use crate::relay::{ClientRegistry, TelemetryState};
use crate::shutdown::{SessionTracker, ShutdownController};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: BridgeConfig,
    link: Arc<BrokerLink>,
    registry: Arc<ClientRegistry>,
    telemetry: Arc<TelemetryState>,
    shutdown: ShutdownController,
    tracker: SessionTracker,
}

impl AppState {
    pub fn new(cfg: BridgeConfig, link: Arc<BrokerLink>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                cfg,
                link,
                registry: Arc::new(ClientRegistry::new()),
                telemetry: Arc::new(TelemetryState::new()),
                shutdown: ShutdownController::new(),
                tracker: SessionTracker::new(),
            }),
        }
    }

    pub fn cfg(&self) -> &BridgeConfig {
        &self.inner.cfg
    }

    pub fn link(&self) -> Arc<BrokerLink> {
        Arc::clone(&self.inner.link)
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.inner.registry)
    }

    pub fn metrics(&self) -> Arc<BridgeMetrics> {
        self.inner.link.metrics()
    }

    pub fn telemetry(&self) -> Arc<TelemetryState> {
        Arc::clone(&self.inner.telemetry)
    }

    pub fn shutdown(&self) -> &ShutdownController {
        &self.inner.shutdown
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.inner.tracker
    }
}
