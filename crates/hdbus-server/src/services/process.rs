use async_trait::async_trait;

use hdbus_core::error::{HdbusError, Result};
use hdbus_core::protocol::envelope::{params, Envelope, Operation};

use crate::dispatch::{CommandCtx, CommandHandler, DeviceTarget};
use crate::supervisor::{StartOutcome, StopOutcome};

/// Parsed `PROCESS` parameter: `START_<name>` or `STOP_<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessCommand {
    Start(String),
    Stop(String),
}

impl ProcessCommand {
    pub fn parse(value: &str) -> Result<Self> {
        match value.split_once('_') {
            Some(("START", name)) if !name.is_empty() => Ok(ProcessCommand::Start(name.to_string())),
            Some(("STOP", name)) if !name.is_empty() => Ok(ProcessCommand::Stop(name.to_string())),
            _ => Err(HdbusError::InvalidProcessCommand(value.to_string())),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ProcessCommand::Start(name) | ProcessCommand::Stop(name) => name,
        }
    }
}

#[derive(Default)]
pub struct ProcessHandler;

impl ProcessHandler {
    pub fn new() -> Self {
        Self
    }

    fn command(env: &Envelope) -> Result<ProcessCommand> {
        ProcessCommand::parse(env.param(params::PROCESS)?)
    }
}

#[async_trait]
impl CommandHandler for ProcessHandler {
    fn operation(&self) -> Operation {
        Operation::Process
    }

    fn validate(&self, env: &Envelope) -> Result<()> {
        Self::command(env).map(|_| ())
    }

    fn check(&self, env: &Envelope, target: &DeviceTarget) -> Result<()> {
        let cmd = Self::command(env)?;
        if !target.device.with(|d| d.supports_process(cmd.name())) {
            return Err(HdbusError::UnsupportedOperation {
                alias: target.alias().to_string(),
                operation: format!("PROCESS {}", cmd.name()),
            });
        }
        Ok(())
    }

    async fn handle(&self, ctx: &CommandCtx, env: &Envelope, target: &DeviceTarget) -> Result<String> {
        let alias = target.alias();
        let address = &target.address;
        match Self::command(env)? {
            ProcessCommand::Start(name) => {
                let opts = ctx
                    .process_defaults
                    .resolve(env.opt_param(params::TIMEOUT), env.opt_param(params::RATE))?;
                match ctx.supervisor.start(&target.device, &name, opts)? {
                    StartOutcome::Started => Ok(format!(
                        "Started {name} process on {alias} at address {address}.\n"
                    )),
                    StartOutcome::AlreadyRunning => Ok(format!(
                        "Process {name} on {alias} at address {address} is already running.\n"
                    )),
                }
            }
            ProcessCommand::Stop(name) => match ctx.supervisor.stop(alias, &name) {
                StopOutcome::Stopping => Ok(format!(
                    "Stopped {name} process on {alias} at address {address}.\n"
                )),
                StopOutcome::NotRunning => Ok(format!(
                    "Process {name} on {alias} at address {address} is not running.\n"
                )),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_and_stop() {
        assert_eq!(
            ProcessCommand::parse("START_BLINK").unwrap(),
            ProcessCommand::Start("BLINK".into())
        );
        assert_eq!(
            ProcessCommand::parse("STOP_SLOW_BLINK").unwrap(),
            ProcessCommand::Stop("SLOW_BLINK".into())
        );
    }

    #[test]
    fn rejects_other_shapes() {
        for bad in ["BLINK", "PAUSE_BLINK", "START_", "start_BLINK", ""] {
            let err = ProcessCommand::parse(bad).unwrap_err();
            assert_eq!(err.to_string(), format!("Process type {bad} not recognized"));
        }
    }
}
