//! hdbus dispatch server library.
//!
//! Wires config, virtual devices, the address registry, the process
//! supervisor, the dispatcher and the transports into a server. Consumed by
//! the binary (`main.rs`) and by integration tests.

pub mod app_state;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod obs;
pub mod ops;
pub mod registry;
pub mod router;
pub mod server;
pub mod services;
pub mod supervisor;
pub mod transport;

pub use app_state::AppState;
pub use server::DispatchServer;
