use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use hdbus_core::error::{HdbusError, Result};

#[derive(Clone)]
struct PeerEntry {
    tx: mpsc::Sender<Bytes>,
    created_seq: u64,
}

/// `identity -> outbound queue` for connected requesters.
///
/// A reconnect under the same identity replaces the older connection; the
/// older connection's cleanup is then a no-op thanks to `created_seq`.
#[derive(Default)]
pub struct PeerRegistry {
    peers: DashMap<String, PeerEntry>,
    seq: AtomicU64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
            seq: AtomicU64::new(1),
        }
    }

    /// Register a connection; returns its sequence number for `remove`.
    pub fn insert(&self, identity: &str, tx: mpsc::Sender<Bytes>) -> u64 {
        let created_seq = self.seq.fetch_add(1, Ordering::Relaxed);
        if self
            .peers
            .insert(identity.to_string(), PeerEntry { tx, created_seq })
            .is_some()
        {
            tracing::warn!(peer = %identity, "identity reconnected; replacing older connection");
        }
        created_seq
    }

    /// Remove `identity` only if it still belongs to connection `created_seq`.
    pub fn remove(&self, identity: &str, created_seq: u64) -> bool {
        self.peers
            .remove_if(identity, |_, e| e.created_seq == created_seq)
            .is_some()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.peers.contains_key(identity)
    }

    pub fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.peers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Queue `payload` for `identity`.
    pub async fn send(&self, identity: &str, payload: Bytes) -> Result<()> {
        let tx = self
            .peers
            .get(identity)
            .map(|e| e.value().tx.clone())
            .ok_or_else(|| HdbusError::Transport(format!("unroutable peer {identity}")))?;
        tx.send(payload)
            .await
            .map_err(|_| HdbusError::Transport(format!("peer {identity} disconnected")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_by_identity() {
        let reg = PeerRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        reg.insert("Client 1", tx);

        reg.send("Client 1", Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hi"));
        assert!(reg.send("Client 2", Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn stale_connection_does_not_remove_newer_one() {
        let reg = PeerRegistry::new();
        let (old_tx, _old_rx) = mpsc::channel(1);
        let (new_tx, _new_rx) = mpsc::channel(1);
        let old = reg.insert("Client 1", old_tx);
        let new = reg.insert("Client 1", new_tx);

        assert!(!reg.remove("Client 1", old));
        assert!(reg.contains("Client 1"));
        assert!(reg.remove("Client 1", new));
        assert!(reg.is_empty());
    }
}
