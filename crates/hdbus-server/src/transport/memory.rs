//! In-process transport over tokio channels.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use hdbus_core::error::{HdbusError, Result};

use crate::transport::{Inbound, PeerRegistry, ServerTransport};

const QUEUE: usize = 64;

pub struct MemoryTransport {
    inbound_tx: Option<mpsc::Sender<Inbound>>,
    inbound_rx: mpsc::Receiver<Inbound>,
    peers: Arc<PeerRegistry>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE);
        Self {
            inbound_tx: Some(inbound_tx),
            inbound_rx,
            peers: Arc::new(PeerRegistry::new()),
        }
    }

    /// Attach a requester under `identity`.
    pub fn connect(&self, identity: &str) -> Result<MemoryPeer> {
        let tx = self
            .inbound_tx
            .clone()
            .ok_or_else(|| HdbusError::Transport("memory transport closed".into()))?;
        let (reply_tx, reply_rx) = mpsc::channel(QUEUE);
        self.peers.insert(identity, reply_tx);
        Ok(MemoryPeer {
            identity: identity.to_string(),
            tx,
            rx: reply_rx,
        })
    }

    /// Stop accepting peers; `recv` returns `None` once every peer is gone.
    pub fn close(&mut self) {
        self.inbound_tx = None;
    }
}

#[async_trait]
impl ServerTransport for MemoryTransport {
    async fn recv(&mut self) -> Option<Inbound> {
        self.inbound_rx.recv().await
    }

    async fn send(&self, peer: &str, payload: Bytes) -> Result<()> {
        self.peers.send(peer, payload).await
    }
}

/// Requester end of a [`MemoryTransport`].
pub struct MemoryPeer {
    identity: String,
    tx: mpsc::Sender<Inbound>,
    rx: mpsc::Receiver<Bytes>,
}

impl MemoryPeer {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.tx
            .send(Inbound {
                peer: self.identity.clone(),
                payload: payload.into(),
            })
            .await
            .map_err(|_| HdbusError::Transport("memory transport closed".into()))
    }

    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}
