use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use axum::extract::ws::Message;
use tokio::sync::mpsc;

use crate::broker::{BrokerLink, HandlerId};
use crate::relay::ClientRegistry;

pub type SessionId = u64;

/// Result of a non-blocking send to a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// Viewer queue full; the frame is dropped.
    Full,
    /// Session closed; nothing more may be sent.
    Closed,
}

/// Shared handle of one viewer session, stored in the registry.
///
/// The session task owns the socket; everything else talks to the viewer
/// through `try_send` and ends it with `close`.
pub struct SessionHandle {
    id: SessionId,
    peer: Option<SocketAddr>,
    listener: HandlerId,
    connected_at: SystemTime,
    closed: AtomicBool,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        peer: Option<SocketAddr>,
        listener: HandlerId,
        outbound: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            id,
            peer,
            listener,
            connected_at: SystemTime::now(),
            closed: AtomicBool::new(false),
            outbound: Mutex::new(Some(outbound)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn listener(&self) -> HandlerId {
        self.listener
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue a frame for the viewer without waiting.
    pub fn try_send(&self, msg: Message) -> SendOutcome {
        let outbound = self.outbound();
        let Some(tx) = outbound.as_ref() else {
            return SendOutcome::Closed;
        };
        match tx.try_send(msg) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Move the session to Closed: detach its broker handler, leave the
    /// registry and release the outbound queue.
    ///
    /// Runs once no matter how many paths (viewer gone, server shutdown)
    /// call it; returns true for the call that did the work. After it returns
    /// `try_send` always reports `Closed`.
    pub fn close(&self, link: &BrokerLink, registry: &ClientRegistry) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        link.remove_handler(self.listener);
        if let Err(e) = registry.unregister(self.id) {
            tracing::debug!(session_id = self.id, error = %e, "session already unregistered");
        }
        self.outbound().take();
        link.metrics().viewer_sessions_active.dec();
        true
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::Sender<Message>>> {
        self.outbound.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("listener", &self.listener)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use mqbridge_core::message::BrokerMessage;
    use mqbridge_core::topic::TopicSet;

    use super::*;
    use crate::broker::MemoryTransport;
    use crate::obs::BridgeMetrics;

    #[tokio::test]
    async fn close_runs_once_from_either_path() {
        let metrics = Arc::new(BridgeMetrics::default());
        let link = BrokerLink::new(Arc::new(MemoryTransport::new()), TopicSet::default(), metrics.clone());
        let registry = ClientRegistry::new();

        let (broker_tx, _broker_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let listener = link.on_message(broker_tx);
        let handle = Arc::new(SessionHandle::new(registry.next_id(), None, listener, out_tx));
        registry.register(handle.clone()).unwrap();
        metrics.viewer_sessions_active.inc();

        assert_eq!(handle.try_send(Message::Text("hi".into())), SendOutcome::Queued);

        // viewer path and shutdown path race; only one does the work
        assert!(handle.close(&link, &registry));
        assert!(!handle.close(&link, &registry));

        assert_eq!(link.handler_count(), 0);
        assert!(registry.is_empty());
        assert_eq!(metrics.viewer_sessions_active.get(), 0);
        assert_eq!(handle.try_send(Message::Text("late".into())), SendOutcome::Closed);

        // queued before close still drains, then the queue ends
        assert!(matches!(out_rx.recv().await, Some(Message::Text(t)) if t == "hi"));
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn close_racing_fan_out_stops_forwarding() {
        for _ in 0..20 {
            let link = Arc::new(BrokerLink::new(
                Arc::new(MemoryTransport::new()),
                TopicSet::default(),
                Arc::new(BridgeMetrics::default()),
            ));
            let registry = Arc::new(ClientRegistry::new());
            let (broker_tx, mut broker_rx) = mpsc::channel::<Arc<BrokerMessage>>(1024);
            let (out_tx, mut out_rx) = mpsc::channel(4096);
            let listener = link.on_message(broker_tx);
            let handle = Arc::new(SessionHandle::new(registry.next_id(), None, listener, out_tx));
            registry.register(handle.clone()).unwrap();

            let seq = Arc::new(AtomicU64::new(0));
            let stop = Arc::new(AtomicBool::new(false));

            let fan_out = {
                let (link, seq, stop) = (link.clone(), seq.clone(), stop.clone());
                tokio::spawn(async move {
                    while !stop.load(Ordering::SeqCst) {
                        let n = seq.fetch_add(1, Ordering::SeqCst) + 1;
                        link.deliver(BrokerMessage::new("status".into(), Bytes::from(n.to_string())));
                        tokio::task::yield_now().await;
                    }
                })
            };

            // session task: handler channel into the viewer queue
            let forward = {
                let handle = handle.clone();
                tokio::spawn(async move {
                    while let Some(msg) = broker_rx.recv().await {
                        handle.try_send(Message::Text(msg.payload_text()));
                    }
                })
            };

            tokio::time::sleep(Duration::from_millis(2)).await;
            let closer = {
                let (handle, link, registry) = (handle.clone(), link.clone(), registry.clone());
                tokio::spawn(async move { handle.close(&link, &registry) })
            };
            assert!(closer.await.unwrap());
            let at_close = seq.load(Ordering::SeqCst);
            assert_eq!(handle.try_send(Message::Text("late".into())), SendOutcome::Closed);

            // fan-out keeps going after close
            tokio::time::sleep(Duration::from_millis(2)).await;
            stop.store(true, Ordering::SeqCst);
            fan_out.await.unwrap();
            assert!(seq.load(Ordering::SeqCst) > at_close);

            // queue ends (sender released by close) and holds nothing newer than close
            let mut last = 0;
            while let Some(frame) = tokio::time::timeout(Duration::from_secs(1), out_rx.recv())
                .await
                .expect("viewer queue still open after close")
            {
                let Message::Text(text) = frame else {
                    panic!("unexpected non-text frame");
                };
                let n: u64 = text.parse().unwrap();
                assert!(n <= at_close, "frame {n} forwarded after close at {at_close}");
                assert!(n > last);
                last = n;
            }
            tokio::time::timeout(Duration::from_secs(1), forward)
                .await
                .expect("handler channel still attached")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn full_queue_reports_full() {
        let link = BrokerLink::new(
            Arc::new(MemoryTransport::new()),
            TopicSet::default(),
            Arc::new(BridgeMetrics::default()),
        );
        let (broker_tx, _broker_rx) = mpsc::channel(1);
        let (out_tx, _out_rx) = mpsc::channel(1);
        let handle = SessionHandle::new(1, None, link.on_message(broker_tx), out_tx);

        assert_eq!(handle.try_send(Message::Text("1".into())), SendOutcome::Queued);
        assert_eq!(handle.try_send(Message::Text("2".into())), SendOutcome::Full);
    }
}
