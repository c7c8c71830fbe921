//! Shared application state for the hdbus server.
//!
//! Builds every startup-time component from config in dependency order
//! (expander, devices, registry, supervisor, dispatcher) and returns errors
//! instead of panicking so `main` can report them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hdbus_core::error::Result;

use crate::config::HdbusConfig;
use crate::device::{self, Expander};
use crate::dispatch::{CommandCtx, Dispatcher};
use crate::obs::HdbusMetrics;
use crate::registry::AddressRegistry;
use crate::services;
use crate::supervisor::{ProcessDefaults, ProcessSupervisor};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<HdbusMetrics>,
}

struct AppStateInner {
    cfg: HdbusConfig,
    expander: Option<Arc<Expander>>,
    draining: AtomicBool,
}

impl AppState {
    pub fn new(cfg: HdbusConfig) -> Result<Self> {
        let metrics = Arc::new(HdbusMetrics::default());

        let expander = match &cfg.expander {
            Some(section) => {
                let expander = Arc::new(Expander::new(section.bus_address));
                expander.setup_outputs(&section.output_pins)?;
                Some(expander)
            }
            None => None,
        };

        let devices = device::build_devices(&cfg, expander.as_ref())?;
        let registry = Arc::new(AddressRegistry::build(
            devices,
            &cfg.registry.address_pool,
            &cfg.groups,
            cfg.registry.on_exhaustion,
        )?);

        let ctx = CommandCtx {
            supervisor: Arc::new(ProcessSupervisor::new(Arc::clone(&metrics))),
            process_defaults: ProcessDefaults::from(&cfg.process),
        };
        let dispatcher = Dispatcher::new(registry, ctx);
        services::register_builtin(&dispatcher);
        tracing::debug!(ops = ?dispatcher.registered_ops(), "handlers registered");

        Ok(Self {
            inner: Arc::new(AppStateInner {
                cfg,
                expander,
                draining: AtomicBool::new(false),
            }),
            dispatcher: Arc::new(dispatcher),
            metrics,
        })
    }

    pub fn cfg(&self) -> &HdbusConfig {
        &self.inner.cfg
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn registry(&self) -> &AddressRegistry {
        self.dispatcher.registry()
    }

    pub fn supervisor(&self) -> Arc<ProcessSupervisor> {
        Arc::clone(self.dispatcher.supervisor())
    }

    pub fn expander(&self) -> Option<&Arc<Expander>> {
        self.inner.expander.as_ref()
    }

    pub fn metrics(&self) -> Arc<HdbusMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn set_draining(&self) {
        self.inner.draining.store(true, Ordering::Relaxed);
        self.metrics.set_draining();
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Relaxed)
    }

    /// Gauges computed at scrape time.
    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        let registry = self.registry();
        vec![
            ("hdbus_devices", registry.devices().len() as u64),
            ("hdbus_devices_addressed", registry.address_table().len() as u64),
            (
                "hdbus_expander_levels",
                self.expander().map(|e| u64::from(e.levels())).unwrap_or(0),
            ),
        ]
    }
}
