use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use hdbus_core::error::{HdbusError, Result};
use hdbus_core::protocol::envelope::{params, Envelope, Operation};

use crate::device::DeviceHandle;
use crate::registry::{AddressRegistry, Target};
use crate::supervisor::{ProcessDefaults, ProcessSupervisor};

/// Shared collaborators handed to every handler.
#[derive(Clone)]
pub struct CommandCtx {
    pub supervisor: Arc<ProcessSupervisor>,
    pub process_defaults: ProcessDefaults,
}

/// One resolved device a command applies to.
#[derive(Debug, Clone)]
pub struct DeviceTarget {
    pub device: DeviceHandle,
    pub address: String,
}

impl DeviceTarget {
    pub fn alias(&self) -> &str {
        self.device.alias()
    }
}

/// Handler for one operation.
///
/// `validate` runs once per request, `check` once per target before any
/// target is touched, and `handle` once per target producing one reply line.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn operation(&self) -> Operation;

    fn validate(&self, _env: &Envelope) -> Result<()> {
        Ok(())
    }

    fn check(&self, _env: &Envelope, _target: &DeviceTarget) -> Result<()> {
        Ok(())
    }

    async fn handle(&self, ctx: &CommandCtx, env: &Envelope, target: &DeviceTarget) -> Result<String>;
}

/// Routes decoded requests to operation handlers over resolved targets.
pub struct Dispatcher {
    handlers: DashMap<Operation, Arc<dyn CommandHandler>>,
    registry: Arc<AddressRegistry>,
    ctx: CommandCtx,
}

impl Dispatcher {
    pub fn new(registry: Arc<AddressRegistry>, ctx: CommandCtx) -> Self {
        Self {
            handlers: DashMap::new(),
            registry,
            ctx,
        }
    }

    pub fn register(&self, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(handler.operation(), handler);
    }

    pub fn registered_ops(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self.handlers.iter().map(|e| *e.key()).collect();
        ops.sort_by_key(|op| op.as_str());
        ops
    }

    pub fn registry(&self) -> &Arc<AddressRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.ctx.supervisor
    }

    /// Run one request and return the reply body.
    ///
    /// An unrecognised `msg_val` is answered, not rejected. Errors are
    /// per-request and never leave partial group output behind a failed
    /// check.
    pub async fn dispatch(&self, env: &Envelope) -> Result<String> {
        let Some(op) = env.operation() else {
            return Ok(format!(
                "Msg value {} not recognized",
                env.msg_val().unwrap_or_default()
            ));
        };
        let handler = self
            .handlers
            .get(&op)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| HdbusError::UnsupportedOperation {
                alias: "server".to_string(),
                operation: op.to_string(),
            })?;

        let alias = env.param(params::DEVICE)?;
        handler.validate(env)?;

        let targets = match self.registry.lookup(alias)? {
            Target::Device { device, address } => vec![DeviceTarget { device, address }],
            Target::Group { alias, members } => {
                if members.is_empty() {
                    return Ok(format!("No devices matched group {alias}.\n"));
                }
                members
                    .into_iter()
                    .map(|(device, address)| DeviceTarget { device, address })
                    .collect()
            }
        };

        for target in &targets {
            handler.check(env, target)?;
        }

        let mut reply = String::new();
        for target in &targets {
            reply.push_str(&handler.handle(&self.ctx, env, target).await?);
        }
        Ok(reply)
    }
}
