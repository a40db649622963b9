//! In-process transport that records traffic instead of sending it.
//!
//! Pair it with `BrokerLink::handle_event` to script broker behaviour
//! (connect, drop, deliver) without a network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;

use mqbridge_core::error::{BridgeError, Result};
use mqbridge_core::topic::Topic;

use super::transport::BrokerTransport;

#[derive(Default)]
pub struct MemoryTransport {
    subscribes: Mutex<Vec<Vec<Topic>>>,
    publishes: Mutex<Vec<(Topic, Bytes)>>,
    disconnects: AtomicUsize,
    failing: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every SUBSCRIBE sent, in order.
    pub fn subscribe_calls(&self) -> Vec<Vec<Topic>> {
        lock(&self.subscribes).clone()
    }

    /// Every PUBLISH sent, in order.
    pub fn published(&self) -> Vec<(Topic, Bytes)> {
        lock(&self.publishes).clone()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Make every following call fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("memory transport failing".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerTransport for MemoryTransport {
    async fn subscribe(&self, topics: &[Topic]) -> Result<()> {
        self.check()?;
        lock(&self.subscribes).push(topics.to_vec());
        Ok(())
    }

    async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<()> {
        self.check()?;
        lock(&self.publishes).push((topic.clone(), payload));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
