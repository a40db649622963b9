//! Process-lifetime orchestration: listener, broker link, viewer sessions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use mqbridge_core::error::{BridgeError, Result};

use crate::app_state::AppState;
use crate::broker::{mqtt, BrokerLink};
use crate::config::BridgeConfig;
use crate::obs::BridgeMetrics;
use crate::relay::telemetry;
use crate::router;
use crate::shutdown::ShutdownController;

/// Upper bound for the HTTP listener to finish after the stop request.
const SERVE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct BridgeServer {
    app: AppState,
    local_addr: SocketAddr,
    serve: JoinHandle<std::io::Result<()>>,
    listener_stop: ShutdownController,
    driver: Option<JoinHandle<()>>,
    observer: JoinHandle<()>,
}

impl BridgeServer {
    /// Bind the viewer listener, start connecting to the broker and begin
    /// accepting viewers. Only a bind failure is fatal; the broker may come
    /// up later.
    pub async fn start(cfg: BridgeConfig) -> Result<Self> {
        let listener = bind(&cfg).await?;
        let metrics = Arc::new(BridgeMetrics::default());
        let (link, driver) = mqtt::connect(&cfg.broker, cfg.topics.to_set(), metrics);
        Self::start_with(cfg, listener, link, Some(driver)).await
    }

    /// Start on an already bound listener with a prepared broker link.
    /// `driver` is the task feeding the link, if any; it is awaited on shutdown.
    pub async fn start_with(
        cfg: BridgeConfig,
        listener: TcpListener,
        link: Arc<BrokerLink>,
        driver: Option<JoinHandle<()>>,
    ) -> Result<Self> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| BridgeError::BindFailed(format!("listener address: {e}")))?;

        link.subscribe(&link.topics().inbound()).await?;

        let app = AppState::new(cfg, Arc::clone(&link));

        let (observer_tx, observer_rx) = mpsc::channel(app.cfg().gateway.broker_queue);
        link.on_message(observer_tx);
        let observer = tokio::spawn(telemetry::run_observer(
            app.telemetry(),
            link.topics().clone(),
            observer_rx,
        ));

        let router = router::build_router(app.clone());
        // Viewers are turned away by the draining flag first; the socket
        // itself is only released at the end of shutdown.
        let listener_stop = ShutdownController::new();
        let stop = listener_stop.clone();
        let serve = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { stop.wait_for_shutdown().await })
            .await
        });

        tracing::info!(%local_addr, "mqbridge listening for viewers");
        Ok(Self {
            app,
            local_addr,
            serve,
            listener_stop,
            driver,
            observer,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn app(&self) -> &AppState {
        &self.app
    }

    /// Stop accepting viewers, close every session, close the broker link,
    /// then release the listener. Always runs to the end; problems along the
    /// way are logged.
    pub async fn shutdown(self) -> Result<()> {
        let app = &self.app;
        let link = app.link();
        let registry = app.registry();

        // 1) stop accepting (upgrades now get 503)
        app.shutdown().initiate_shutdown();
        app.metrics().set_draining();

        // 2) close sessions
        let mut closed = 0usize;
        registry.for_each(|session| {
            if session.close(&link, &registry) {
                closed += 1;
            }
        });
        tracing::info!(closed, "viewer sessions closed");

        let drain_timeout = app.cfg().gateway.drain_timeout();
        if !app.tracker().wait_idle(drain_timeout).await {
            tracing::warn!(
                live = app.tracker().live(),
                "viewer tasks still running after drain timeout"
            );
        }

        // 3) close broker link
        link.close().await;
        if let Some(driver) = self.driver {
            if let Err(e) = driver.await {
                tracing::warn!(error = %e, "broker driver task failed");
            }
        }
        if let Err(e) = self.observer.await {
            tracing::warn!(error = %e, "telemetry observer task failed");
        }

        // 4) release listener
        self.listener_stop.initiate_shutdown();
        let result = match tokio::time::timeout(SERVE_STOP_TIMEOUT, self.serve).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(BridgeError::Transport(format!("listener failed: {e}"))),
            Ok(Err(e)) => Err(BridgeError::Internal(format!("listener task failed: {e}"))),
            Err(_) => Err(BridgeError::Internal("listener did not stop in time".into())),
        };
        tracing::info!("mqbridge stopped");
        result
    }
}

async fn bind(cfg: &BridgeConfig) -> Result<TcpListener> {
    let addr = cfg.gateway.listen_addr()?;
    TcpListener::bind(addr)
        .await
        .map_err(|e| BridgeError::BindFailed(format!("{addr}: {e}")))
}
