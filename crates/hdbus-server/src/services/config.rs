use async_trait::async_trait;

use hdbus_core::error::{HdbusError, Result};
use hdbus_core::protocol::envelope::{params, Envelope, Operation};

use crate::dispatch::{CommandCtx, CommandHandler, DeviceTarget};

/// Sets a device's configuration and echoes the value the device now reports.
#[derive(Default)]
pub struct ConfigHandler;

impl ConfigHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandHandler for ConfigHandler {
    fn operation(&self) -> Operation {
        Operation::Config
    }

    fn validate(&self, env: &Envelope) -> Result<()> {
        env.param(params::CONFIG).map(|_| ())
    }

    /// Reject values outside the device's domain before any device changes.
    fn check(&self, env: &Envelope, target: &DeviceTarget) -> Result<()> {
        let value = env.param(params::CONFIG)?;
        let domain = target.device.with(|d| d.config_domain());
        if domain.is_empty() {
            return Err(HdbusError::UnsupportedOperation {
                alias: target.alias().to_string(),
                operation: Operation::Config.to_string(),
            });
        }
        if !domain.contains(&value) {
            return Err(HdbusError::InvalidConfig {
                alias: target.alias().to_string(),
                value: value.to_string(),
                expected: domain.join("|"),
            });
        }
        Ok(())
    }

    async fn handle(&self, _ctx: &CommandCtx, env: &Envelope, target: &DeviceTarget) -> Result<String> {
        let value = env.param(params::CONFIG)?;
        let config = target.device.with(|d| {
            d.set_config(value)?;
            d.config()
        })?;
        tracing::debug!(alias = %target.alias(), %config, "config applied");
        Ok(format!(
            "Set {} at {} to: {}.\n",
            target.alias(),
            target.address,
            config
        ))
    }
}
