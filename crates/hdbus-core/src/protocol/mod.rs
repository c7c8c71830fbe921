//! Protocol modules (envelope + multipart framing).
//!
//! - `envelope`: the self-describing command/reply message with JSON and CBOR
//!   encodings, chosen per envelope.
//! - `frame`: length-prefixed multipart frames carried over byte streams.
//! - `stream` (feature `tokio`): async frame read/write helpers.
//!
//! All parsers are panic-free: malformed input is reported as `HdbusError`
//! instead of panicking or indexing raw buffers, keeping the dispatch loop
//! resilient to bad traffic.

pub mod envelope;
pub mod frame;
#[cfg(feature = "tokio")]
pub mod stream;
