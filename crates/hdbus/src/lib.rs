//! Top-level facade crate for hdbus.
//!
//! Re-exports the protocol core, the dispatch server library and the requester
//! so users can depend on a single crate.

pub mod core {
    pub use hdbus_core::*;
}

pub mod server {
    pub use hdbus_server::*;
}

pub mod client {
    pub use hdbus_client::*;
}
