//! The request/reply loop.
//!
//! One request is taken to completion at a time: decode with the server's
//! encoding, dispatch, wrap the body in a `NOTIFY` reply and send it back to
//! the requester that asked. Per-request failures become reply text (or are
//! dropped, for undecodable input); only the transport closing ends the loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use hdbus_core::protocol::envelope::{params, Encoding, Envelope, Operation};

use crate::config::{MalformedPolicy, ServerSection};
use crate::dispatch::Dispatcher;
use crate::obs::HdbusMetrics;
use crate::transport::ServerTransport;

pub struct DispatchServer<T> {
    transport: T,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<HdbusMetrics>,
    encoding: Encoding,
    on_malformed: MalformedPolicy,
}

impl<T: ServerTransport> DispatchServer<T> {
    pub fn new(
        transport: T,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<HdbusMetrics>,
        section: &ServerSection,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            metrics,
            encoding: section.encoding,
            on_malformed: section.on_malformed,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Serve until the transport closes.
    pub async fn run(&mut self) {
        self.run_until(std::future::pending()).await;
    }

    /// Serve until `shutdown` resolves or the transport closes.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!(encoding = %self.encoding, "dispatch loop started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("dispatch loop stopping");
                    break;
                }
                inbound = self.transport.recv() => {
                    let Some(inbound) = inbound else {
                        tracing::warn!("transport closed; dispatch loop exiting");
                        break;
                    };
                    let Some(reply) = self.handle_request(&inbound.peer, &inbound.payload).await else {
                        continue;
                    };
                    if let Err(e) = self.transport.send(&inbound.peer, reply).await {
                        self.metrics.unroutable_replies.inc(&[]);
                        tracing::warn!(peer = %inbound.peer, error = %e, "reply dropped");
                    }
                }
            }
        }
    }

    /// Process one raw request. `None` means no reply is sent.
    pub async fn handle_request(&self, peer: &str, payload: &[u8]) -> Option<Bytes> {
        let started = Instant::now();
        let env = match Envelope::decode(payload, self.encoding) {
            Ok(env) => env,
            Err(e) => {
                self.metrics
                    .decode_errors
                    .inc(&[("encoding", self.encoding.as_str())]);
                tracing::warn!(peer, len = payload.len(), error = %e, "undecodable request");
                return match self.on_malformed {
                    MalformedPolicy::Drop => None,
                    MalformedPolicy::Nack => {
                        self.metrics
                            .error_replies
                            .inc(&[("code", e.reply_code().as_str())]);
                        self.reply(peer, &format!("{}.\n", e.reply_text()))
                    }
                };
            }
        };

        let op = env.operation().map(Operation::as_str).unwrap_or("UNKNOWN");
        tracing::debug!(peer, op, device = env.opt_param(params::DEVICE), "request");
        tracing::trace!(request = %env, "request envelope");

        let body = match self.dispatcher.dispatch(&env).await {
            Ok(body) => body,
            Err(e) => {
                self.metrics
                    .error_replies
                    .inc(&[("code", e.reply_code().as_str())]);
                tracing::debug!(peer, op, error = %e, "request failed");
                format!("{}.\n", e.reply_text())
            }
        };

        self.metrics.requests.inc(&[("op", op)]);
        self.metrics
            .dispatch_duration
            .observe(&[("op", op)], started.elapsed());
        self.reply(peer, &body)
    }

    fn reply(&self, peer: &str, body: &str) -> Option<Bytes> {
        let reply = Envelope::command(Operation::Notify)
            .with_encoding(self.encoding)
            .with_param(params::REPLY, format!("Processed Request from {peer}\n: {body}"));
        match reply.encode() {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(e) => {
                tracing::warn!(peer, error = %e, "reply encode failed");
                None
            }
        }
    }
}
