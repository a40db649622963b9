//! Viewer WebSocket handler.
//!
//! One relay session per viewer:
//! - Connecting: upgrade done, nothing attached yet
//! - Active: broker handler attached and session registered
//! - Closed: handler detached, registry entry removed (exactly once, see
//!   `SessionHandle::close`)
//!
//! Broker -> viewer is best-effort: a frame that does not fit the viewer's
//! queue is dropped for that viewer. Viewer -> broker only carries control
//! requests; everything else is ignored, malformed JSON is logged.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::Instrument;

use mqbridge_core::error::{BridgeError, Result};
use mqbridge_core::message::BrokerMessage;
use mqbridge_core::protocol::control::ControlCommand;
use mqbridge_core::topic::{Topic, TopicKind, TopicSet};

use crate::app_state::AppState;
use crate::obs::BridgeMetrics;
use crate::relay::{SendOutcome, SessionHandle};
use crate::transport::codec::{decode, Inbound};

const IDLE_CHECK_EVERY: Duration = Duration::from_millis(250);
const CLOSE_GRACE: Duration = Duration::from_secs(1);

// --------------------
// Query parsing
// --------------------
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Comma separated kind names (`sensors`) or literal topics.
    #[serde(default)]
    pub topics: Option<String>,
}

/// Which broker topics a viewer receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    All,
    Only(HashSet<Topic>),
}

impl TopicFilter {
    pub fn from_query(raw: Option<&str>, topics: &TopicSet) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return TopicFilter::All;
        };
        let set = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|name| match TopicKind::from_name(name).and_then(|k| topics.get(k)) {
                Some(t) => t.clone(),
                None => Topic::new(name),
            })
            .collect();
        TopicFilter::Only(set)
    }

    pub fn accepts(&self, topic: &Topic) -> bool {
        match self {
            TopicFilter::All => true,
            TopicFilter::Only(set) => set.contains(topic),
        }
    }
}

// --------------------
// Entry
// --------------------
pub async fn ws_upgrade(
    State(app): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(q): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if app.shutdown().is_shutdown_initiated() {
        return (StatusCode::SERVICE_UNAVAILABLE, "draining").into_response();
    }

    let gw = &app.cfg().gateway;
    let filter = if gw.viewer_topic_filter {
        TopicFilter::from_query(q.topics.as_deref(), app.link().topics())
    } else {
        TopicFilter::All
    };
    let max_frame = gw.max_frame_bytes;

    ws.max_message_size(max_frame)
        .max_frame_size(max_frame)
        .on_upgrade(move |socket| async move {
            let span = tracing::info_span!("viewer", %peer, session_id = tracing::field::Empty);
            if let Err(e) = run_session(app, Some(peer), filter, socket).instrument(span).await {
                tracing::warn!(%peer, error = %e, "viewer session rejected");
            }
        })
}

// --------------------
// Core session loop
// --------------------
async fn run_session(
    app: AppState,
    peer: Option<SocketAddr>,
    filter: TopicFilter,
    socket: WebSocket,
) -> Result<()> {
    let _task = app.tracker().enter();
    let gw = &app.cfg().gateway;
    let link = app.link();
    let registry = app.registry();
    let metrics = app.metrics();

    // ---- Connecting -> Active: attach first, then register
    let (broker_tx, mut broker_rx) = mpsc::channel::<Arc<BrokerMessage>>(gw.broker_queue);
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(gw.outbound_queue);
    let listener = link.on_message(broker_tx);
    let handle = Arc::new(SessionHandle::new(registry.next_id(), peer, listener, out_tx));
    if let Err(e) = registry.register(Arc::clone(&handle)) {
        link.remove_handler(listener);
        return Err(e);
    }
    metrics.viewer_sessions_active.inc();
    metrics.viewer_connects.inc(&[]);
    tracing::Span::current().record("session_id", handle.id());
    tracing::info!(filter = ?filter, "viewer connected");

    // Shutdown may have snapshotted the registry before we registered.
    if app.shutdown().is_shutdown_initiated() {
        handle.close(&link, &registry);
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    let ping_every = gw.ping_interval();
    let idle_timeout = gw.idle_timeout();
    let mut ping_tick = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut idle_tick = tokio::time::interval(IDLE_CHECK_EVERY);
    let mut last_activity = Instant::now();

    let reason = loop {
        tokio::select! {
            // outbound writer
            maybe_out = out_rx.recv() => {
                match maybe_out {
                    Some(m) => {
                        if let Err(e) = ws_tx.send(m).await {
                            tracing::debug!(error = %e, "viewer write failed");
                            break "write_failed";
                        }
                    }
                    // handle closed and queue drained
                    None => break "closed",
                }
            }

            // broker -> viewer
            Some(msg) = broker_rx.recv() => {
                forward(&handle, &filter, &metrics, &msg);
            }

            // viewer -> broker
            incoming = ws_rx.next() => {
                let Some(incoming) = incoming else { break "viewer_gone"; };
                let msg = match incoming {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::debug!(error = %e, "viewer transport error");
                        break "transport_error";
                    }
                };
                last_activity = Instant::now();

                match decode(msg) {
                    Ok(Inbound::Control { payload }) => relay_control(&app, payload).await,
                    Ok(Inbound::Ignored) => tracing::trace!("ignored viewer frame"),
                    // the websocket layer answers pings itself
                    Ok(Inbound::Ping) | Ok(Inbound::Pong) => {}
                    Ok(Inbound::Close) => break "viewer_closed",
                    Err(e) => {
                        metrics.malformed_messages.inc(&[("source", "viewer")]);
                        tracing::warn!(error = %e, "discarding viewer frame");
                    }
                }
            }

            _ = ping_tick.tick() => {
                handle.try_send(Message::Ping(Vec::new()));
            }

            _ = idle_tick.tick() => {
                if last_activity.elapsed() >= idle_timeout {
                    break "idle_timeout";
                }
            }
        }
    };

    handle.close(&link, &registry);
    let lived = handle.connected_at().elapsed().unwrap_or_default();
    tracing::info!(reason, lived_ms = lived.as_millis() as u64, "viewer disconnected");

    // Best-effort close frame; the viewer may already be gone.
    let _ = tokio::time::timeout(CLOSE_GRACE, async {
        let _ = ws_tx.send(Message::Close(None)).await;
        let _ = ws_tx.close().await;
    })
    .await;

    Ok(())
}

fn forward(handle: &SessionHandle, filter: &TopicFilter, metrics: &BridgeMetrics, msg: &BrokerMessage) {
    if !filter.accepts(msg.topic()) {
        return;
    }
    match handle.try_send(Message::Text(msg.viewer_frame().to_owned())) {
        SendOutcome::Queued => metrics.frames_forwarded.inc(&[]),
        SendOutcome::Full => {
            metrics.frames_dropped.inc(&[("reason", "viewer_queue_full")]);
            tracing::trace!(topic = %msg.topic(), "viewer queue full, frame dropped");
        }
        SendOutcome::Closed => {}
    }
}

async fn relay_control(app: &AppState, payload: Value) {
    let metrics = app.metrics();

    let body = if app.cfg().control.validate {
        match ControlCommand::from_value(&payload) {
            Ok(cmd) => cmd.encode(),
            Err(e) => {
                metrics.malformed_messages.inc(&[("source", "viewer")]);
                tracing::warn!(error = %e, "rejecting control request");
                return;
            }
        }
    } else {
        payload.to_string()
    };

    match app.link().publish_control(Bytes::from(body)).await {
        Ok(()) => {
            metrics.control_publishes.inc(&[("result", "ok")]);
            tracing::debug!("control request forwarded");
        }
        Err(BridgeError::NotConnected) => {
            metrics.control_publishes.inc(&[("result", "not_connected")]);
            tracing::warn!("control request dropped, broker not connected");
        }
        Err(e) => {
            metrics.control_publishes.inc(&[("result", "error")]);
            tracing::warn!(error = %e, "control publish failed");
        }
    }
}
