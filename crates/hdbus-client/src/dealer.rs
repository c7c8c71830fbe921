use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::{TcpStream, ToSocketAddrs};

use hdbus_core::error::{HdbusError, Result};
use hdbus_core::protocol::stream::{read_frame, write_frame};

use crate::requester::RequesterTransport;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// TCP connection to a router, announced under a fixed identity.
pub struct TcpDealer {
    stream: TcpStream,
    identity: String,
    max_frame_bytes: usize,
}

impl TcpDealer {
    /// Connect and send the hello frame carrying `identity`.
    pub async fn connect<A: ToSocketAddrs>(addr: A, identity: &str) -> Result<Self> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| HdbusError::Transport(format!("connect failed: {e}")))?;
        let _ = stream.set_nodelay(true);
        write_frame(&mut stream, &[Bytes::copy_from_slice(identity.as_bytes())]).await?;
        tracing::debug!(identity, "dealer connected");
        Ok(Self {
            stream,
            identity: identity.to_string(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        })
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}

#[async_trait]
impl RequesterTransport for TcpDealer {
    async fn send(&mut self, payload: Bytes) -> Result<()> {
        write_frame(&mut self.stream, &[payload]).await
    }

    /// Next reply payload; the router prefixes it with an empty delimiter part.
    async fn recv(&mut self) -> Result<Bytes> {
        let parts = read_frame(&mut self.stream, self.max_frame_bytes)
            .await?
            .ok_or_else(|| HdbusError::Transport("server closed the connection".into()))?;
        parts
            .into_iter()
            .last()
            .ok_or_else(|| HdbusError::Transport("empty reply frame".into()))
    }
}
