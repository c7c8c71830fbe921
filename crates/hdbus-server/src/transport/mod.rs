//! Request/reply transport.
//!
//! The dispatch loop sees requests as `(requester identity, payload)` pairs
//! and answers by identity; how identities map to connections is the
//! transport's business.
//! - `tcp`: multipart frames over TCP, identity announced in a hello frame
//! - `memory`: in-process channels for tests and embedding

pub mod memory;
pub mod peers;
pub mod tcp;

use async_trait::async_trait;
use bytes::Bytes;

use hdbus_core::error::Result;

pub use memory::{MemoryPeer, MemoryTransport};
pub use peers::PeerRegistry;
pub use tcp::TcpRouter;

/// Requester identity label, echoed back on reply.
pub type PeerId = String;

#[derive(Debug, Clone)]
pub struct Inbound {
    pub peer: PeerId,
    pub payload: Bytes,
}

#[async_trait]
pub trait ServerTransport: Send {
    /// Next request. `None` once the transport is closed for good.
    async fn recv(&mut self) -> Option<Inbound>;

    /// Deliver a reply. Fails with `Transport` if `peer` is not connected.
    async fn send(&self, peer: &str, payload: Bytes) -> Result<()>;
}
