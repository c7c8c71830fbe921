//! Requester side of the hdbus protocol.
//!
//! A [`Requester`] sends one command envelope at a time and waits for the
//! server's `NOTIFY` reply. The wire is abstracted by [`RequesterTransport`];
//! [`TcpDealer`] speaks the server's TCP router protocol.

pub mod dealer;
pub mod requester;

pub use dealer::TcpDealer;
pub use requester::{random_identity, Reply, Requester, RequesterTransport};

pub use hdbus_core::{Encoding, Envelope, HdbusError, Operation, Result};
