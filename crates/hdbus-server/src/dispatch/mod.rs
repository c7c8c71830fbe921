//! Request dispatch.
//!
//! The dispatcher resolves the `DEVICE` alias to one device or a group and
//! fans the request out to the handler registered for its operation.

pub mod dispatcher;

pub use dispatcher::{CommandCtx, CommandHandler, DeviceTarget, Dispatcher};
