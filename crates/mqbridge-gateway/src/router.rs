//! Axum router wiring.
//!
//! - `/v1/ws`, `/`: viewer WebSocket upgrade
//! - `/healthz`: liveness
//! - `/v1/status`: broker link, device and viewer summary
//! - `/metrics`: Prometheus text

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::time::UNIX_EPOCH;

use crate::{app_state::AppState, transport};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(transport::ws::ws_upgrade))
        .route("/v1/ws", get(transport::ws::ws_upgrade))
        .route("/healthz", get(healthz))
        .route("/v1/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(app): State<AppState>) -> Json<Value> {
    let snap = app.telemetry().snapshot();
    let reading = snap.reading.map(|r| {
        let at_ms = snap
            .reading_at
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);
        json!({
            "temperature": r.temperature,
            "humidity": r.humidity,
            "battery": r.battery,
            "received_at_ms": at_ms,
        })
    });

    Json(json!({
        "broker": app.link().state().as_str(),
        "device": snap.device.map(|d| d.as_str()).unwrap_or("unknown"),
        "viewers": app.registry().len(),
        "draining": app.shutdown().is_shutdown_initiated(),
        "latest": reading,
    }))
}

async fn metrics(State(app): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        app.metrics().render(),
    )
}
