use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch, Mutex};

use mqbridge_core::error::{BridgeError, Result};
use mqbridge_core::message::BrokerMessage;
use mqbridge_core::protocol::telemetry::SensorReading;
use mqbridge_core::topic::{Topic, TopicKind, TopicSet};

use super::transport::{BrokerTransport, LinkEvent, LinkState};
use crate::obs::BridgeMetrics;

/// Upper bound for the transport to accept DISCONNECT during `close`.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Token returned by `BrokerLink::on_message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// The single broker connection shared by every viewer.
///
/// Consumers attach a bounded channel with `on_message` and receive every
/// broker message in receipt order. Delivery never blocks: a full channel
/// loses that message for that consumer only.
pub struct BrokerLink {
    transport: Arc<dyn BrokerTransport>,
    topics: TopicSet,
    metrics: Arc<BridgeMetrics>,
    state: watch::Sender<LinkState>,
    /// Held across state changes to Connected so a subscribe never races the replay.
    subscriptions: Mutex<BTreeSet<Topic>>,
    /// Set when a SUBSCRIBE could not be handed to the transport while Connected.
    replay_pending: AtomicBool,
    handlers: DashMap<HandlerId, mpsc::Sender<Arc<BrokerMessage>>>,
    handler_seq: AtomicU64,
    closed: watch::Sender<bool>,
}

impl BrokerLink {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        topics: TopicSet,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            transport,
            topics,
            metrics,
            state: watch::channel(LinkState::Disconnected).0,
            subscriptions: Mutex::new(BTreeSet::new()),
            replay_pending: AtomicBool::new(false),
            handlers: DashMap::new(),
            handler_seq: AtomicU64::new(1),
            closed: watch::channel(false).0,
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn metrics(&self) -> Arc<BridgeMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Request delivery of `topics`.
    ///
    /// Topics are recorded and replayed after every successful (re)connect.
    /// Only topics not recorded before are sent now, and only when Connected.
    /// A failed send is logged; the topic stays recorded and is sent again by
    /// `retry_replay` or the next reconnect.
    pub async fn subscribe(&self, topics: &[Topic]) -> Result<()> {
        let mut subs = self.subscriptions.lock().await;

        let fresh: Vec<Topic> = topics
            .iter()
            .filter(|t| subs.insert((*t).clone()))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }

        if self.state() != LinkState::Connected {
            tracing::debug!(topics = ?fresh, "subscription deferred until connected");
            return Ok(());
        }

        if let Err(e) = self.transport.subscribe(&fresh).await {
            self.replay_pending.store(true, Ordering::Release);
            tracing::warn!(topics = ?fresh, error = %e, "subscribe failed, will retry");
        }
        Ok(())
    }

    /// Re-send every recorded subscription if an earlier send while Connected
    /// failed. Returns true when a replay was handed to the transport.
    ///
    /// Transport drivers call this after each event so a replay rejected by a
    /// full request queue goes out once the queue drains.
    pub async fn retry_replay(&self) -> bool {
        if !self.replay_pending.load(Ordering::Acquire) || self.is_closed() {
            return false;
        }
        let subs = self.subscriptions.lock().await;
        if self.state() != LinkState::Connected
            || !self.replay_pending.swap(false, Ordering::AcqRel)
        {
            return false;
        }
        self.replay(&subs).await
    }

    async fn replay(&self, subs: &BTreeSet<Topic>) -> bool {
        if subs.is_empty() {
            return false;
        }
        let topics: Vec<Topic> = subs.iter().cloned().collect();
        match self.transport.subscribe(&topics).await {
            Ok(()) => true,
            Err(e) => {
                self.replay_pending.store(true, Ordering::Release);
                tracing::warn!(error = %e, "subscription replay failed, will retry");
                false
            }
        }
    }

    pub async fn subscriptions(&self) -> Vec<Topic> {
        self.subscriptions.lock().await.iter().cloned().collect()
    }

    /// Attach a consumer. Messages are pushed into `tx` until `remove_handler`.
    pub fn on_message(&self, tx: mpsc::Sender<Arc<BrokerMessage>>) -> HandlerId {
        let id = HandlerId(self.handler_seq.fetch_add(1, Ordering::Relaxed));
        self.handlers.insert(id, tx);
        id
    }

    /// Detach a consumer.
    ///
    /// Waits for a fan-out currently visiting this handler, so once this
    /// returns nothing more is pushed into its channel. Returns false if the
    /// handler was already gone.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.handlers.remove(&id).is_some()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Publish to the broker. Fails with `NotConnected` unless Connected; in
    /// that case nothing reaches the wire.
    pub async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<()> {
        if self.is_closed() || self.state() != LinkState::Connected {
            return Err(BridgeError::NotConnected);
        }
        self.transport.publish(topic, payload).await
    }

    /// Publish on the configured control topic.
    pub async fn publish_control(&self, payload: Bytes) -> Result<()> {
        let topic = self.topics.control.clone();
        self.publish(&topic, payload).await
    }

    /// Feed one transport event. Ignored once the link is closed.
    pub async fn handle_event(&self, event: LinkEvent) {
        if self.is_closed() {
            return;
        }
        match event {
            LinkEvent::Connecting => {
                self.state.send_replace(LinkState::Connecting);
                tracing::debug!("broker link connecting");
            }
            LinkEvent::Connected => {
                let subs = self.subscriptions.lock().await;
                self.state.send_replace(LinkState::Connected);
                self.metrics.broker_link_events.inc(&[("event", "connected")]);
                tracing::info!(subscriptions = subs.len(), "broker link connected");

                self.replay_pending.store(false, Ordering::Release);
                self.replay(&subs).await;
            }
            LinkEvent::Disconnected { reason } => {
                let prev = self.state.send_replace(LinkState::Disconnected);
                if prev == LinkState::Connected {
                    self.metrics.broker_link_events.inc(&[("event", "disconnected")]);
                    tracing::warn!(%reason, "broker link lost");
                } else {
                    tracing::debug!(%reason, "broker connect attempt failed");
                }
            }
            LinkEvent::Message { topic, payload } => {
                self.deliver(BrokerMessage::new(topic, payload));
            }
        }
    }

    /// Fan one message out to every attached handler. Returns how many
    /// handlers accepted it.
    pub fn deliver(&self, msg: BrokerMessage) -> usize {
        let kind = self.topics.classify(msg.topic());
        tracing::debug!(topic = %msg.topic(), len = msg.payload().len(), "broker message received");
        self.metrics.broker_messages.inc(&[("topic", kind.as_str())]);

        if kind == TopicKind::Sensors {
            if let Err(e) = SensorReading::parse(msg.payload()) {
                self.metrics.malformed_messages.inc(&[("source", "broker")]);
                tracing::warn!(topic = %msg.topic(), error = %e, "discarding sensor message");
                return 0;
            }
        }

        let started = Instant::now();
        let msg = Arc::new(msg);
        let mut delivered = 0;
        for entry in self.handlers.iter() {
            match entry.value().try_send(Arc::clone(&msg)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.metrics.frames_dropped.inc(&[("reason", "handler_queue_full")]);
                }
                // Owner is tearing down; its removal is in progress.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        self.metrics.fanout_duration.observe(started.elapsed());
        delivered
    }

    /// Disconnect from the broker and drop every handler. Idempotent.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        match tokio::time::timeout(DISCONNECT_TIMEOUT, self.transport.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "broker disconnect failed"),
            Err(_) => tracing::warn!("broker disconnect timed out"),
        }
        self.state.send_replace(LinkState::Disconnected);
        self.handlers.clear();
        tracing::info!("broker link closed");
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryTransport;

    fn link() -> (Arc<MemoryTransport>, BrokerLink) {
        let transport = Arc::new(MemoryTransport::new());
        let link = BrokerLink::new(
            transport.clone(),
            TopicSet::default(),
            Arc::new(BridgeMetrics::default()),
        );
        (transport, link)
    }

    fn sensors() -> Bytes {
        Bytes::from_static(br#"{"temperature":22.5,"humidity":40,"battery":80}"#)
    }

    #[tokio::test]
    async fn publish_requires_connected() {
        let (transport, link) = link();

        let err = link
            .publish_control(Bytes::from_static(br#"{"interval":10}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected));
        assert!(transport.published().is_empty());

        link.handle_event(LinkEvent::Connecting).await;
        assert!(link.publish_control(Bytes::from_static(b"{}")).await.is_err());

        link.handle_event(LinkEvent::Connected).await;
        link.publish_control(Bytes::from_static(br#"{"interval":10}"#))
            .await
            .unwrap();
        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0.as_str(), "control");
        assert_eq!(&published[0].1[..], br#"{"interval":10}"#);
    }

    #[tokio::test]
    async fn subscribe_before_connect_is_replayed() {
        let (transport, link) = link();
        link.subscribe(&TopicSet::default().inbound()).await.unwrap();
        assert!(transport.subscribe_calls().is_empty());

        link.handle_event(LinkEvent::Connecting).await;
        link.handle_event(LinkEvent::Connected).await;
        let calls = transport.subscribe_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
    }

    #[tokio::test]
    async fn subscriptions_survive_reconnect_without_resubscribe() {
        let (transport, link) = link();
        link.handle_event(LinkEvent::Connected).await;
        link.subscribe(&["sensors".into()]).await.unwrap();
        assert_eq!(transport.subscribe_calls().len(), 1);

        link.handle_event(LinkEvent::Disconnected { reason: "reset".into() }).await;
        assert_eq!(link.state(), LinkState::Disconnected);
        link.handle_event(LinkEvent::Connecting).await;
        link.handle_event(LinkEvent::Connected).await;

        let calls = transport.subscribe_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], vec![Topic::from("sensors")]);

        let (tx, mut rx) = mpsc::channel(4);
        link.on_message(tx);
        link.handle_event(LinkEvent::Message { topic: "sensors".into(), payload: sensors() }).await;
        assert_eq!(rx.recv().await.unwrap().topic().as_str(), "sensors");
    }

    #[tokio::test]
    async fn repeated_subscribe_is_not_resent() {
        let (transport, link) = link();
        link.handle_event(LinkEvent::Connected).await;
        link.subscribe(&["status".into()]).await.unwrap();
        link.subscribe(&["status".into()]).await.unwrap();
        assert_eq!(transport.subscribe_calls().len(), 1);
        assert_eq!(link.subscriptions().await.len(), 1);
    }

    #[tokio::test]
    async fn fan_out_preserves_order_per_handler() {
        let (_t, link) = link();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        link.on_message(tx_a);
        link.on_message(tx_b);

        for p in ["a", "b", "c"] {
            link.deliver(BrokerMessage::new("status".into(), Bytes::from(p)));
        }
        for rx in [&mut rx_a, &mut rx_b] {
            for p in ["a", "b", "c"] {
                assert_eq!(rx.recv().await.unwrap().payload_text(), p);
            }
        }
    }

    #[tokio::test]
    async fn removed_handler_receives_nothing_more() {
        let (_t, link) = link();
        let (tx, mut rx) = mpsc::channel(8);
        let id = link.on_message(tx);

        assert_eq!(link.deliver(BrokerMessage::new("status".into(), Bytes::from("online"))), 1);
        assert!(link.remove_handler(id));
        assert!(!link.remove_handler(id));
        assert_eq!(link.deliver(BrokerMessage::new("status".into(), Bytes::from("offline"))), 0);

        assert_eq!(rx.recv().await.unwrap().payload_text(), "online");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn full_handler_drops_without_blocking_others() {
        let (_t, link) = link();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        link.on_message(slow_tx);
        link.on_message(fast_tx);

        link.deliver(BrokerMessage::new("status".into(), Bytes::from("1")));
        link.deliver(BrokerMessage::new("status".into(), Bytes::from("2")));

        assert_eq!(fast_rx.recv().await.unwrap().payload_text(), "1");
        assert_eq!(fast_rx.recv().await.unwrap().payload_text(), "2");
        assert_eq!(
            link.metrics().frames_dropped.get(&[("reason", "handler_queue_full")]),
            1
        );
    }

    #[tokio::test]
    async fn malformed_sensor_payload_is_discarded() {
        let (_t, link) = link();
        let (tx, mut rx) = mpsc::channel(8);
        link.on_message(tx);

        assert_eq!(link.deliver(BrokerMessage::new("sensors".into(), Bytes::from("nope"))), 0);
        assert_eq!(link.deliver(BrokerMessage::new("sensors".into(), sensors())), 1);
        assert_eq!(rx.recv().await.unwrap().payload(), &sensors());
        assert_eq!(link.metrics().malformed_messages.get(&[("source", "broker")]), 1);
    }

    #[tokio::test]
    async fn rejected_replay_is_retried_once_transport_recovers() {
        let (transport, link) = link();
        link.subscribe(&TopicSet::default().inbound()).await.unwrap();

        transport.set_failing(true);
        link.handle_event(LinkEvent::Connected).await;
        assert!(transport.subscribe_calls().is_empty());
        assert!(!link.retry_replay().await);

        transport.set_failing(false);
        assert!(link.retry_replay().await);
        assert!(!link.retry_replay().await);
        let calls = transport.subscribe_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);

        // lock is free again
        link.subscribe(&["extra".into()]).await.unwrap();
        assert_eq!(transport.subscribe_calls().len(), 2);
    }

    #[tokio::test]
    async fn retry_waits_for_connected() {
        let (transport, link) = link();
        link.handle_event(LinkEvent::Connected).await;
        transport.set_failing(true);
        link.subscribe(&["status".into()]).await.unwrap();
        link.handle_event(LinkEvent::Disconnected { reason: "reset".into() }).await;

        transport.set_failing(false);
        assert!(!link.retry_replay().await);
        assert!(transport.subscribe_calls().is_empty());

        link.handle_event(LinkEvent::Connected).await;
        assert_eq!(transport.subscribe_calls(), vec![vec![Topic::from("status")]]);
        assert!(!link.retry_replay().await);
    }

    struct HangingTransport;

    #[async_trait::async_trait]
    impl BrokerTransport for HangingTransport {
        async fn subscribe(&self, _topics: &[Topic]) -> Result<()> {
            std::future::pending().await
        }

        async fn publish(&self, _topic: &Topic, _payload: Bytes) -> Result<()> {
            std::future::pending().await
        }

        async fn disconnect(&self) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn close_finishes_when_transport_hangs() {
        let link = BrokerLink::new(
            Arc::new(HangingTransport),
            TopicSet::default(),
            Arc::new(BridgeMetrics::default()),
        );
        let (tx, _rx) = mpsc::channel(1);
        link.on_message(tx);
        link.handle_event(LinkEvent::Connected).await;

        tokio::time::timeout(DISCONNECT_TIMEOUT + Duration::from_secs(2), link.close())
            .await
            .expect("close must not wait on the transport forever");
        assert!(link.is_closed());
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(link.handler_count(), 0);
    }

    #[derive(Clone, Default)]
    struct LogBuf(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn every_received_message_is_logged() {
        let (_t, link) = link();
        let buf = LogBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            link.deliver(BrokerMessage::new("status".into(), Bytes::from("online")));
        });

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("broker message received"), "{out}");
        assert!(out.contains("topic=status"), "{out}");
        assert!(out.contains("len=6"), "{out}");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let (transport, link) = link();
        let (tx, _rx) = mpsc::channel(8);
        link.on_message(tx);
        link.handle_event(LinkEvent::Connected).await;

        link.close().await;
        link.close().await;
        link.closed().await;

        assert_eq!(transport.disconnect_calls(), 1);
        assert_eq!(link.handler_count(), 0);
        assert_eq!(link.state(), LinkState::Disconnected);

        link.handle_event(LinkEvent::Connected).await;
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(matches!(
            link.publish_control(Bytes::from_static(b"{}")).await,
            Err(BridgeError::NotConnected)
        ));
    }
}
