//! hdbus core: transport-agnostic protocol primitives and error types.
//!
//! This crate defines the command envelope, its two wire encodings, the
//! multipart frame codec and the error surface shared by the dispatch server
//! and requesters. Async frame I/O sits behind the optional `tokio` feature;
//! everything else is runtime-free.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths surface as `HdbusError`/`Result` so the server does not
//! crash on malformed input.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{HdbusError, Result};
pub use protocol::envelope::{Encoding, Envelope, MsgKind, Operation};
