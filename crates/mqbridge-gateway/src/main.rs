//! mqbridge gateway
//!
//! Relays broker telemetry to WebSocket viewers and viewer control requests
//! back to the broker.
//! - Config: `$MQBRIDGE_CONFIG` or `mqbridge.yaml`, plus env overrides
//! - Viewer endpoint: `/v1/ws` (also `/`)
//! - SIGINT/SIGTERM: graceful shutdown

use std::process::ExitCode;

use tracing_subscriber::{fmt, EnvFilter};

use mqbridge_gateway::{config, shutdown, BridgeServer};

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let cfg = match config::load_from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "config load failed");
            return ExitCode::FAILURE;
        }
    };

    let server = match BridgeServer::start(cfg).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, fatal = e.is_fatal(), "mqbridge failed to start");
            return ExitCode::FAILURE;
        }
    };

    shutdown::wait_for_signal().await;

    match server.shutdown().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "shutdown finished with errors");
            ExitCode::FAILURE
        }
    }
}
