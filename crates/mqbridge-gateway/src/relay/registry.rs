use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use mqbridge_core::error::{BridgeError, Result};

use super::session::{SessionHandle, SessionId};

/// Active viewer sessions: `session_id -> SessionHandle`.
///
/// Every operation takes the lock, so register/unregister/iterate are
/// mutually exclusive. `for_each` visits a snapshot taken under the lock and
/// runs the visitor after releasing it, so visitors may unregister.
pub struct ClientRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
    seq: AtomicU64,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(1),
        }
    }

    /// Fresh id for a new connection.
    pub fn next_id(&self) -> SessionId {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register(&self, session: Arc<SessionHandle>) -> Result<()> {
        let mut sessions = self.write();
        let id = session.id();
        if sessions.contains_key(&id) {
            return Err(BridgeError::DuplicateSession(id));
        }
        sessions.insert(id, session);
        Ok(())
    }

    pub fn unregister(&self, id: SessionId) -> Result<Arc<SessionHandle>> {
        self.write().remove(&id).ok_or(BridgeError::NotFound(id))
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Point-in-time copy of the active sessions.
    pub fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.read().values().cloned().collect()
    }

    pub fn for_each(&self, mut visitor: impl FnMut(&Arc<SessionHandle>)) {
        for session in self.snapshot() {
            visitor(&session);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<SessionHandle>>> {
        self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<SessionHandle>>> {
        self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use mqbridge_core::topic::TopicSet;
    use tokio::sync::mpsc;

    use super::*;
    use crate::broker::{BrokerLink, MemoryTransport};
    use crate::obs::BridgeMetrics;

    fn link() -> BrokerLink {
        BrokerLink::new(
            Arc::new(MemoryTransport::new()),
            TopicSet::default(),
            Arc::new(BridgeMetrics::default()),
        )
    }

    fn session(link: &BrokerLink, id: SessionId) -> Arc<SessionHandle> {
        let (broker_tx, _) = mpsc::channel(1);
        let (out_tx, _) = mpsc::channel(1);
        Arc::new(SessionHandle::new(id, None, link.on_message(broker_tx), out_tx))
    }

    #[test]
    fn duplicate_and_missing_ids() {
        let link = link();
        let registry = ClientRegistry::new();
        registry.register(session(&link, 7)).unwrap();

        let err = registry.register(session(&link, 7)).unwrap_err();
        assert_eq!(err.code().as_str(), "DUPLICATE_SESSION");

        assert_eq!(registry.unregister(7).unwrap().id(), 7);
        let err = registry.unregister(7).unwrap_err();
        assert_eq!(err.code().as_str(), "NOT_FOUND");
    }

    #[test]
    fn count_tracks_connects_minus_disconnects() {
        let link = link();
        let registry = ClientRegistry::new();
        let ids: Vec<SessionId> = (0..16).map(|_| registry.next_id()).collect();

        for (n, id) in ids.iter().enumerate() {
            registry.register(session(&link, *id)).unwrap();
            assert_eq!(registry.len(), n + 1);
        }

        // odd positions first, then even positions backwards
        let order: Vec<SessionId> = ids
            .iter()
            .skip(1)
            .step_by(2)
            .chain(ids.iter().step_by(2).rev())
            .copied()
            .collect();
        for (n, id) in order.iter().enumerate() {
            registry.unregister(*id).unwrap();
            assert_eq!(registry.len(), ids.len() - n - 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn iteration_sees_snapshot_while_visitor_mutates() {
        let link = link();
        let registry = ClientRegistry::new();
        for id in 1..=3 {
            registry.register(session(&link, id)).unwrap();
        }

        let mut visited = 0;
        registry.for_each(|s| {
            visited += 1;
            registry.unregister(s.id()).unwrap();
            registry.register(session(&link, 100 + s.id())).unwrap();
        });

        assert_eq!(visited, 3);
        assert_eq!(registry.len(), 3);
        assert!(registry.get(101).is_some());
    }

    #[test]
    fn concurrent_register_unregister_keeps_set_consistent() {
        let link = Arc::new(link());
        let registry = Arc::new(ClientRegistry::new());

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let link = Arc::clone(&link);
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let id = registry.next_id();
                        registry.register(session(&link, id)).unwrap();
                        registry.unregister(id).unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
