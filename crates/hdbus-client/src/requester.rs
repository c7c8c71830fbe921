use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use tokio::net::ToSocketAddrs;

use hdbus_core::error::{HdbusError, Result};
use hdbus_core::protocol::envelope::{params, Encoding, Envelope, Operation};

use crate::dealer::TcpDealer;

/// Byte-level request/reply channel to one server.
#[async_trait]
pub trait RequesterTransport: Send {
    async fn send(&mut self, payload: Bytes) -> Result<()>;
    async fn recv(&mut self) -> Result<Bytes>;
}

/// `"Client <n>"` with `n` drawn from `0..=100000`.
pub fn random_identity() -> String {
    format!("Client {}", rand::thread_rng().gen_range(0..=100_000))
}

/// A decoded server reply.
#[derive(Debug, Clone)]
pub struct Reply {
    envelope: Envelope,
    text: String,
}

impl Reply {
    fn from_envelope(envelope: Envelope) -> Result<Self> {
        let text = envelope.param(params::REPLY)?.to_string();
        Ok(Self { envelope, text })
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Full `REPLY` text, including the `Processed Request from` header.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// `REPLY` text without the header line.
    pub fn body(&self) -> &str {
        match self.text.split_once("\n: ") {
            Some((head, body)) if head.starts_with("Processed Request from ") => body,
            _ => &self.text,
        }
    }

    /// Body split into its per-device lines.
    pub fn lines(&self) -> Vec<&str> {
        self.body().lines().filter(|l| !l.is_empty()).collect()
    }
}

/// Issues commands to a dispatch server, one request in flight at a time.
///
/// If a request future is dropped before its reply arrives, the next request
/// first receives and discards that reply, so replies never shift onto later
/// requests.
pub struct Requester<T = TcpDealer> {
    transport: T,
    identity: String,
    encoding: Encoding,
    /// Set between sending a request and receiving its reply.
    awaiting_reply: bool,
}

impl Requester<TcpDealer> {
    /// Connect over TCP under a random `"Client <n>"` identity.
    pub async fn connect<A: ToSocketAddrs>(addr: A, encoding: Encoding) -> Result<Self> {
        Self::with_identity(addr, &random_identity(), encoding).await
    }

    pub async fn with_identity<A: ToSocketAddrs>(
        addr: A,
        identity: &str,
        encoding: Encoding,
    ) -> Result<Self> {
        let dealer = TcpDealer::connect(addr, identity).await?;
        Ok(Self::new(dealer, identity, encoding))
    }
}

impl<T: RequesterTransport> Requester<T> {
    pub fn new(transport: T, identity: &str, encoding: Encoding) -> Self {
        Self {
            transport,
            identity: identity.to_string(),
            encoding,
            awaiting_reply: false,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub async fn status(&mut self, alias: &str) -> Result<Reply> {
        self.request(Self::command(Operation::Status, alias)).await
    }

    pub async fn read(&mut self, alias: &str) -> Result<Reply> {
        self.request(Self::command(Operation::Read, alias)).await
    }

    pub async fn config(&mut self, alias: &str, value: &str) -> Result<Reply> {
        let env = Self::command(Operation::Config, alias).with_param(params::CONFIG, value);
        self.request(env).await
    }

    /// Start `process`; omitted timings fall back to the server's defaults.
    pub async fn start_process(
        &mut self,
        alias: &str,
        process: &str,
        timeout_secs: Option<f64>,
        rate_secs: Option<f64>,
    ) -> Result<Reply> {
        let mut env = Self::command(Operation::Process, alias)
            .with_param(params::PROCESS, format!("START_{process}"));
        if let Some(t) = timeout_secs {
            env.set_param(params::TIMEOUT, t.to_string());
        }
        if let Some(r) = rate_secs {
            env.set_param(params::RATE, r.to_string());
        }
        self.request(env).await
    }

    pub async fn stop_process(&mut self, alias: &str, process: &str) -> Result<Reply> {
        let env = Self::command(Operation::Process, alias)
            .with_param(params::PROCESS, format!("STOP_{process}"));
        self.request(env).await
    }

    /// Send `env` in this requester's encoding and wait for the reply.
    pub async fn request(&mut self, env: Envelope) -> Result<Reply> {
        let env = env.with_encoding(self.encoding);
        let payload = Bytes::from(env.encode()?);

        if self.awaiting_reply {
            let stale = self.transport.recv().await?;
            self.awaiting_reply = false;
            tracing::debug!(identity = %self.identity, len = stale.len(), "discarded reply to cancelled request");
        }

        tracing::debug!(identity = %self.identity, op = env.msg_val(), "sending request");
        self.awaiting_reply = true;
        if let Err(e) = self.transport.send(payload).await {
            self.awaiting_reply = false;
            return Err(e);
        }
        let payload = self.transport.recv().await?;
        self.awaiting_reply = false;

        let reply = Envelope::decode(&payload, self.encoding)?;
        if reply.operation() != Some(Operation::Notify) {
            return Err(HdbusError::MalformedEnvelope(format!(
                "expected NOTIFY reply, got {}",
                reply.msg_val().unwrap_or_default()
            )));
        }
        Reply::from_envelope(reply)
    }

    fn command(op: Operation, alias: &str) -> Envelope {
        Envelope::command(op).with_param(params::DEVICE, alias)
    }
}
