//! TCP router transport.
//!
//! Wire protocol per connection (frames from `hdbus_core::protocol::frame`):
//! - first frame: one part, the requester identity (UTF-8, non-empty)
//! - requests: `[payload]` or `["", payload]`; the last part is the payload
//! - replies: `["", payload]`
//!
//! A frame over the size limit, a bad hello or any read error closes that
//! connection only.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use hdbus_core::error::{HdbusError, Result};
use hdbus_core::protocol::stream::{read_frame, write_frame};

use crate::obs::HdbusMetrics;
use crate::transport::{Inbound, PeerRegistry, ServerTransport};

const INBOUND_QUEUE: usize = 1024;
const OUTBOUND_QUEUE: usize = 64;

pub struct TcpRouter {
    local_addr: SocketAddr,
    inbound_rx: mpsc::Receiver<Inbound>,
    peers: Arc<PeerRegistry>,
    accept_task: JoinHandle<()>,
}

impl TcpRouter {
    pub async fn bind(
        addr: SocketAddr,
        max_frame_bytes: usize,
        metrics: Arc<HdbusMetrics>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HdbusError::Transport(format!("bind {addr} failed: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| HdbusError::Transport(format!("local_addr failed: {e}")))?;

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let peers = Arc::new(PeerRegistry::new());
        let accept_task = tokio::spawn(accept_loop(
            listener,
            inbound_tx,
            Arc::clone(&peers),
            max_frame_bytes,
            metrics,
        ));

        Ok(Self {
            local_addr,
            inbound_rx,
            peers,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peers(&self) -> Arc<PeerRegistry> {
        Arc::clone(&self.peers)
    }
}

impl Drop for TcpRouter {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

#[async_trait]
impl ServerTransport for TcpRouter {
    async fn recv(&mut self) -> Option<Inbound> {
        self.inbound_rx.recv().await
    }

    async fn send(&self, peer: &str, payload: Bytes) -> Result<()> {
        self.peers.send(peer, payload).await
    }
}

async fn accept_loop(
    listener: TcpListener,
    inbound_tx: mpsc::Sender<Inbound>,
    peers: Arc<PeerRegistry>,
    max_frame_bytes: usize,
    metrics: Arc<HdbusMetrics>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                let _ = stream.set_nodelay(true);
                tokio::spawn(serve_connection(
                    stream,
                    remote,
                    inbound_tx.clone(),
                    Arc::clone(&peers),
                    max_frame_bytes,
                    Arc::clone(&metrics),
                ));
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }
}

async fn read_hello(stream: &mut tokio::net::tcp::OwnedReadHalf, max_frame_bytes: usize) -> Result<String> {
    let parts = read_frame(stream, max_frame_bytes)
        .await?
        .ok_or_else(|| HdbusError::Transport("closed before hello".into()))?;
    if parts.len() != 1 {
        return Err(HdbusError::Transport(format!(
            "hello must have one part, got {}",
            parts.len()
        )));
    }
    let identity = parts
        .into_iter()
        .next()
        .map(|b| String::from_utf8(b.to_vec()))
        .transpose()
        .map_err(|_| HdbusError::Transport("hello identity is not UTF-8".into()))?
        .unwrap_or_default();
    if identity.is_empty() {
        return Err(HdbusError::Transport("empty hello identity".into()));
    }
    Ok(identity)
}

async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    inbound_tx: mpsc::Sender<Inbound>,
    peers: Arc<PeerRegistry>,
    max_frame_bytes: usize,
    metrics: Arc<HdbusMetrics>,
) {
    let (mut rd, mut wr) = stream.into_split();

    let identity = match read_hello(&mut rd, max_frame_bytes).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(%remote, error = %e, "rejecting connection");
            return;
        }
    };

    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE);
    let seq = peers.insert(&identity, out_tx);
    metrics.connections.inc(&[]);
    tracing::info!(peer = %identity, %remote, "requester connected");

    // Ends once the registry drops `out_tx`.
    let writer_peer = identity.clone();
    tokio::spawn(async move {
        while let Some(payload) = out_rx.recv().await {
            if let Err(e) = write_frame(&mut wr, &[Bytes::new(), payload]).await {
                tracing::debug!(peer = %writer_peer, error = %e, "reply write failed");
                break;
            }
        }
    });

    loop {
        match read_frame(&mut rd, max_frame_bytes).await {
            Ok(Some(parts)) => {
                let Some(payload) = parts.into_iter().last() else {
                    continue;
                };
                let inbound = Inbound {
                    peer: identity.clone(),
                    payload,
                };
                if inbound_tx.send(inbound).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(peer = %identity, error = %e, "closing connection");
                break;
            }
        }
    }

    peers.remove(&identity, seq);
    metrics.connections.dec(&[]);
    tracing::info!(peer = %identity, "requester disconnected");
}
