use async_trait::async_trait;

use hdbus_core::error::Result;
use hdbus_core::protocol::envelope::{Envelope, Operation};

use crate::dispatch::{CommandCtx, CommandHandler, DeviceTarget};

#[derive(Default)]
pub struct StatusHandler;

impl StatusHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandHandler for StatusHandler {
    fn operation(&self) -> Operation {
        Operation::Status
    }

    async fn handle(&self, _ctx: &CommandCtx, _env: &Envelope, target: &DeviceTarget) -> Result<String> {
        let status = target.device.status();
        Ok(format!(
            "Status of {} at address {} is: {}.\n",
            target.alias(),
            target.address,
            status
        ))
    }
}
