use async_trait::async_trait;

use hdbus_core::error::Result;
use hdbus_core::protocol::envelope::{Envelope, Operation};

use crate::dispatch::{CommandCtx, CommandHandler, DeviceTarget};

#[derive(Default)]
pub struct ReadHandler;

impl ReadHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandHandler for ReadHandler {
    fn operation(&self) -> Operation {
        Operation::Read
    }

    async fn handle(&self, _ctx: &CommandCtx, _env: &Envelope, target: &DeviceTarget) -> Result<String> {
        let value = target.device.with(|d| d.read_data())?;
        Ok(format!(
            "Value of {} at address {} is: {}.\n",
            target.alias(),
            target.address,
            value
        ))
    }
}
