//! Connection registry: ordered live peers plus the id → channel map.

use std::collections::HashMap;
use std::sync::Arc;

use parley_common::protocol::ServerEnvelope;
use parley_common::PeerId;
use tokio::sync::{mpsc, RwLock};

/// Join-ordered peer list and the id → sender map, kept under one lock so
/// the two structures can never diverge. `next_id` lives here too: ids are
/// allocated by whoever holds the write lock, which removes the
/// collision-retry dance a random generator would need.
struct RegistryInner {
    order: Vec<PeerId>,
    senders: HashMap<PeerId, mpsc::Sender<ServerEnvelope>>,
    next_id: u32,
}

/// Thread-safe connection directory shared by all handler tasks.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                order: Vec::new(),
                senders: HashMap::new(),
                next_id: 1,
            })),
        }
    }

    /// Insert a new connection and allocate its peer id.
    pub async fn register(&self, tx: mpsc::Sender<ServerEnvelope>) -> PeerId {
        let mut inner = self.inner.write().await;
        // The counter only revisits an id after u32 wraps; skip any that is
        // somehow still live rather than clobbering its channel.
        let id = loop {
            let candidate = PeerId::new(inner.next_id);
            inner.next_id = inner.next_id.wrapping_add(1);
            if !inner.senders.contains_key(&candidate) {
                break candidate;
            }
        };
        inner.order.push(id);
        inner.senders.insert(id, tx);
        id
    }

    /// Remove a connection from both structures. Idempotent.
    pub async fn deregister(&self, id: PeerId) {
        let mut inner = self.inner.write().await;
        if inner.senders.remove(&id).is_some() {
            inner.order.retain(|&p| p != id);
        }
    }

    /// Clone the target's sender out under the read lock; the send itself
    /// happens outside it, so a slow client cannot stall routing for others.
    pub async fn sender(&self, id: PeerId) -> Option<mpsc::Sender<ServerEnvelope>> {
        self.inner.read().await.senders.get(&id).cloned()
    }

    /// Snapshot of every connected peer's sender, in join order. Taken under
    /// the lock, iterated outside it: a join or leave racing the broadcast
    /// sees either the old or the new set, never a torn one.
    pub async fn snapshot(&self) -> Vec<(PeerId, mpsc::Sender<ServerEnvelope>)> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.senders.get(id).map(|tx| (*id, tx.clone())))
            .collect()
    }

    /// Ids of all currently connected peers, in join order.
    pub async fn peer_ids(&self) -> Vec<PeerId> {
        self.inner.read().await.order.clone()
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.inner.read().await.senders.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> mpsc::Sender<ServerEnvelope> {
        let (tx, _rx) = mpsc::channel(8);
        tx
    }

    #[tokio::test]
    async fn concurrent_registrations_get_distinct_ids() {
        let registry = Registry::new();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(
                async move { registry.register(channel()).await },
            ));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }

        assert_eq!(registry.len().await, 32);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 32, "ids must be pairwise distinct");
    }

    #[tokio::test]
    async fn deregister_removes_both_structures() {
        let registry = Registry::new();
        let a = registry.register(channel()).await;
        let b = registry.register(channel()).await;

        registry.deregister(a).await;

        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.peer_ids().await, vec![b]);
        assert!(registry.sender(a).await.is_none());
        assert!(registry.sender(b).await.is_some());
    }

    #[tokio::test]
    async fn deregister_is_idempotent() {
        let registry = Registry::new();
        let a = registry.register(channel()).await;

        registry.deregister(a).await;
        registry.deregister(a).await;

        assert_eq!(registry.len().await, 0);
        assert!(registry.peer_ids().await.is_empty());
    }

    #[tokio::test]
    async fn snapshot_preserves_join_order() {
        let registry = Registry::new();
        let a = registry.register(channel()).await;
        let b = registry.register(channel()).await;
        let c = registry.register(channel()).await;

        registry.deregister(b).await;
        let ids: Vec<PeerId> = registry.snapshot().await.into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![a, c]);
    }

    #[tokio::test]
    async fn sender_for_removed_id_is_none() {
        let registry = Registry::new();
        let a = registry.register(channel()).await;
        registry.deregister(a).await;
        assert!(registry.sender(a).await.is_none());
    }
}
