//! rumqttc-backed transport and its event-loop driver.
//!
//! The driver owns the rumqttc `EventLoop`: it turns CONNACK, PUBLISH and
//! connection errors into `LinkEvent`s, waits `reconnect_backoff` after each
//! error and polls again (which reconnects) until the link is closed.
//!
//! Only the driver drains the client's request queue, so nothing the driver
//! calls may wait on that queue. The transport therefore uses the `try_*`
//! client calls and reports a full queue as a transport error; `BrokerLink`
//! keeps the subscriptions and the driver retries them after every event.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, NetworkOptions, Outgoing,
    Packet, QoS, SubscribeFilter,
};
use tokio::task::JoinHandle;

use mqbridge_core::error::{BridgeError, Result};
use mqbridge_core::topic::{Topic, TopicSet};

use super::link::BrokerLink;
use super::transport::{BrokerTransport, LinkEvent};
use crate::config::BrokerSection;
use crate::obs::BridgeMetrics;

/// How long the driver keeps polling after close to flush DISCONNECT.
const FLUSH_ON_CLOSE: Duration = Duration::from_secs(1);

pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    async fn subscribe(&self, topics: &[Topic]) -> Result<()> {
        let filters = topics
            .iter()
            .map(|t| SubscribeFilter::new(t.as_str().to_owned(), QoS::AtMostOnce));
        self.client
            .try_subscribe_many(filters)
            .map_err(|e| BridgeError::Transport(format!("subscribe failed: {e}")))
    }

    async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<()> {
        self.client
            .try_publish(topic.as_str(), QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| BridgeError::Transport(format!("publish failed: {e}")))
    }

    async fn disconnect(&self) -> Result<()> {
        self.client
            .try_disconnect()
            .map_err(|e| BridgeError::Transport(format!("disconnect failed: {e}")))
    }
}

/// Start connecting to the configured broker. Returns immediately; the
/// returned task drives the connection until `BrokerLink::close`.
pub fn connect(
    cfg: &BrokerSection,
    topics: TopicSet,
    metrics: Arc<BridgeMetrics>,
) -> (Arc<BrokerLink>, JoinHandle<()>) {
    let client_id = cfg.client_id();
    let mut opts = MqttOptions::new(client_id.clone(), cfg.host.clone(), cfg.port);
    opts.set_keep_alive(cfg.keep_alive());
    opts.set_clean_session(cfg.clean_session);

    let (client, mut eventloop) = AsyncClient::new(opts, cfg.request_capacity);
    let mut network = NetworkOptions::new();
    network.set_connection_timeout(cfg.connect_timeout_secs());
    eventloop.set_network_options(network);

    let link = Arc::new(BrokerLink::new(
        Arc::new(MqttTransport::new(client)),
        topics,
        metrics,
    ));

    tracing::info!(
        host = %cfg.host,
        port = cfg.port,
        client_id = %client_id,
        clean_session = cfg.clean_session,
        connect_timeout_ms = cfg.connect_timeout_ms,
        "connecting to broker"
    );

    let driver = tokio::spawn(drive(Arc::clone(&link), eventloop, cfg.reconnect_backoff()));
    (link, driver)
}

async fn drive(link: Arc<BrokerLink>, mut eventloop: EventLoop, backoff: Duration) {
    link.handle_event(LinkEvent::Connecting).await;
    let mut connected = false;

    loop {
        tokio::select! {
            _ = link.closed() => break,

            polled = eventloop.poll() => match polled {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        connected = true;
                        link.handle_event(LinkEvent::Connected).await;
                    } else {
                        tracing::warn!(code = ?ack.code, "broker refused connection");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    link.handle_event(LinkEvent::Message {
                        topic: Topic::new(p.topic),
                        payload: p.payload,
                    })
                    .await;
                }
                Ok(_) => {}
                Err(e) => {
                    connected = false;
                    link.handle_event(LinkEvent::Disconnected { reason: e.to_string() }).await;
                    tokio::select! {
                        _ = link.closed() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    link.handle_event(LinkEvent::Connecting).await;
                }
            }
        }

        // the poll above may have freed room in the request queue
        link.retry_replay().await;
    }

    if connected {
        let flushed = tokio::time::timeout(FLUSH_ON_CLOSE, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if flushed.is_err() {
            tracing::debug!("broker disconnect not flushed before timeout");
        }
    }
    tracing::info!("broker driver stopped");
}
