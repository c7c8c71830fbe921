//! Built-in command handlers, one per operation.

pub mod config;
pub mod process;
pub mod read;
pub mod status;

use std::sync::Arc;

pub use config::ConfigHandler;
pub use process::{ProcessCommand, ProcessHandler};
pub use read::ReadHandler;
pub use status::StatusHandler;

use crate::dispatch::Dispatcher;

/// Register STATUS, READ, CONFIG and PROCESS.
pub fn register_builtin(dispatcher: &Dispatcher) {
    dispatcher.register(Arc::new(StatusHandler::new()));
    dispatcher.register(Arc::new(ReadHandler::new()));
    dispatcher.register(Arc::new(ConfigHandler::new()));
    dispatcher.register(Arc::new(ProcessHandler::new()));
}
