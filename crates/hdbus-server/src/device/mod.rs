//! Virtual hardware devices.
//!
//! Every device implements [`Device`]. Capability methods (`read_data`,
//! `config`, `set_config`, process control) default to
//! `UnsupportedOperation`, so a device only overrides what it can do.
//! Devices are shared between the dispatch loop and process tasks through a
//! [`DeviceHandle`], which serialises access with a per-device mutex.

pub mod expander;
pub mod led;
pub mod power;
pub mod temperature;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use hdbus_core::error::{HdbusError, Result};

use crate::config::{DeviceConfig, DeviceKind, HdbusConfig};

pub use expander::{Expander, ExpanderPin};
pub use led::{ExpanderLed, GpioPin, Led, OutputPin, BLINK};
pub use power::PowerController;
pub use temperature::{TemperatureSensor, TemperatureUnit};

pub const STATUS_ON: &str = "ON";
pub const STATUS_OFF: &str = "OFF";

/// Coarse device class; contributes the device's class tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Led,
    Temperature,
    Power,
}

impl DeviceClass {
    pub fn tag(self) -> &'static str {
        match self {
            DeviceClass::Led => "led",
            DeviceClass::Temperature => "temperature",
            DeviceClass::Power => "power",
        }
    }
}

/// Identity and status fields common to every device.
#[derive(Debug, Clone)]
pub struct DeviceCore {
    alias: String,
    address: Option<String>,
    status: String,
}

impl DeviceCore {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            address: None,
            status: STATUS_OFF.to_string(),
        }
    }
}

pub trait Device: Send {
    fn core(&self) -> &DeviceCore;
    fn core_mut(&mut self) -> &mut DeviceCore;
    fn class(&self) -> DeviceClass;

    fn alias(&self) -> &str {
        &self.core().alias
    }

    fn address(&self) -> Option<&str> {
        self.core().address.as_deref()
    }

    fn set_address(&mut self, address: String) {
        self.core_mut().address = Some(address);
    }

    fn status(&self) -> &str {
        &self.core().status
    }

    fn set_status(&mut self, status: &str) -> Result<()> {
        self.core_mut().status = status.to_string();
        Ok(())
    }

    fn read_data(&mut self) -> Result<String> {
        Err(unsupported(self.alias(), "READ"))
    }

    fn config(&self) -> Result<String> {
        Err(unsupported(self.alias(), "CONFIG"))
    }

    /// Accepted `set_config` values; empty when the device is not configurable.
    fn config_domain(&self) -> &'static [&'static str] {
        &[]
    }

    fn set_config(&mut self, _value: &str) -> Result<()> {
        Err(unsupported(self.alias(), "CONFIG"))
    }

    fn supports_process(&self, _name: &str) -> bool {
        false
    }

    /// One period of a long-running process.
    fn process_step(&mut self, name: &str) -> Result<()> {
        Err(unsupported(self.alias(), &format!("PROCESS {name}")))
    }

    /// Put the device in its terminal state after a process ends.
    fn process_finish(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn unsupported(alias: &str, operation: &str) -> HdbusError {
    HdbusError::UnsupportedOperation {
        alias: alias.to_string(),
        operation: operation.to_string(),
    }
}

pub(crate) fn invalid_config(alias: &str, value: &str, domain: &[&str]) -> HdbusError {
    HdbusError::InvalidConfig {
        alias: alias.to_string(),
        value: value.to_string(),
        expected: domain.join("|"),
    }
}

/// Shared handle to one device.
///
/// Alias and tags are immutable and readable without locking.
#[derive(Clone)]
pub struct DeviceHandle {
    alias: Arc<str>,
    tags: Arc<BTreeSet<String>>,
    inner: Arc<Mutex<Box<dyn Device>>>,
}

impl DeviceHandle {
    pub fn new<D: Device + 'static>(device: D, extra_tags: &[String]) -> Self {
        Self::from_boxed(Box::new(device), extra_tags)
    }

    pub fn from_boxed(device: Box<dyn Device>, extra_tags: &[String]) -> Self {
        let mut tags: BTreeSet<String> = extra_tags.iter().cloned().collect();
        tags.insert(device.class().tag().to_string());
        Self {
            alias: Arc::from(device.alias()),
            tags: Arc::new(tags),
            inner: Arc::new(Mutex::new(device)),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Run `f` with exclusive access to the device.
    ///
    /// A poisoned lock (a panic inside a previous holder) is recovered so the
    /// device can still be driven to a terminal state.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn Device) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut **guard)
    }

    pub fn address(&self) -> Option<String> {
        self.with(|d| d.address().map(str::to_string))
    }

    pub fn status(&self) -> String {
        self.with(|d| d.status().to_string())
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("alias", &self.alias)
            .field("tags", &self.tags)
            .finish()
    }
}

/// Instantiate every configured device, in config order.
pub fn build_devices(cfg: &HdbusConfig, expander: Option<&Arc<Expander>>) -> Result<Vec<DeviceHandle>> {
    cfg.devices
        .iter()
        .map(|d| build_device(d, expander))
        .collect()
}

fn build_device(d: &DeviceConfig, expander: Option<&Arc<Expander>>) -> Result<DeviceHandle> {
    let mut device: Box<dyn Device> = match d.kind {
        DeviceKind::Led => Box::new(Led::new(&d.alias, GpioPin::new(d.pin))),
        DeviceKind::Temperature => Box::new(TemperatureSensor::new(&d.alias)),
        DeviceKind::Power => Box::new(PowerController::new(&d.alias)),
        DeviceKind::ExpanderLed => {
            let expander = expander.ok_or_else(|| {
                HdbusError::Config(format!("{}: no expander configured", d.alias))
            })?;
            let pin = d
                .pin
                .ok_or_else(|| HdbusError::Config(format!("{}: missing expander pin", d.alias)))?;
            Box::new(ExpanderLed::new(&d.alias, Expander::claim_pin(expander, pin)?))
        }
    };

    if let Some(status) = &d.status {
        device.set_status(status)?;
    }
    if let Some(config) = &d.config {
        device.set_config(config)?;
    }
    Ok(DeviceHandle::from_boxed(device, &d.tags))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn handle_carries_class_and_extra_tags() {
        let h = DeviceHandle::new(TemperatureSensor::new("TEMP"), &["board".to_string()]);
        assert_eq!(h.alias(), "TEMP");
        assert!(h.has_tag("temperature"));
        assert!(h.has_tag("board"));
        assert!(!h.has_tag("led"));
    }

    #[test]
    fn capabilities_default_to_unsupported() {
        let h = DeviceHandle::new(TemperatureSensor::new("TEMP"), &[]);
        let err = h.with(|d| d.process_step(BLINK)).unwrap_err();
        assert!(matches!(err, HdbusError::UnsupportedOperation { .. }));
        assert!(!h.with(|d| d.supports_process(BLINK)));
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let h = DeviceHandle::new(Led::new("LED_BLUE", GpioPin::new(Some(17))), &[]);
        let h2 = h.clone();
        let _ = std::thread::spawn(move || {
            h2.with(|_| panic!("boom"));
        })
        .join();
        h.with(|d| d.set_status(STATUS_ON)).unwrap();
        assert_eq!(h.status(), STATUS_ON);
    }
}
