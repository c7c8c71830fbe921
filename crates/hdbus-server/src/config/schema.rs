use std::net::SocketAddr;

use serde::Deserialize;
use hdbus_core::error::{HdbusError, Result};
use hdbus_core::Encoding;

use crate::device::expander::EXPANDER_PINS;
use crate::supervisor::{valid_secs, MAX_SECS};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HdbusConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub http: Option<HttpSection>,

    pub registry: RegistrySection,

    #[serde(default)]
    pub process: ProcessSection,

    #[serde(default)]
    pub expander: Option<ExpanderSection>,

    pub devices: Vec<DeviceConfig>,

    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

impl HdbusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(HdbusError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        if self.devices.is_empty() {
            return Err(HdbusError::Config("devices must not be empty".into()));
        }

        self.server.validate()?;
        if let Some(http) = &self.http {
            http.validate()?;
        }
        self.registry.validate()?;
        self.process.validate()?;
        if let Some(expander) = &self.expander {
            expander.validate()?;
        }

        for d in &self.devices {
            d.validate(self.expander.as_ref())?;
        }
        for g in &self.groups {
            if g.alias.is_empty() || g.tag.is_empty() {
                return Err(HdbusError::Config(
                    "groups entries need a non-empty alias and tag".into(),
                ));
            }
        }
        Ok(())
    }
}

/// What to do with a request that does not decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Log and skip the reply.
    #[default]
    Drop,
    /// Reply with a NOTIFY envelope describing the decode failure.
    Nack,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_identity")]
    pub identity: String,

    #[serde(default)]
    pub encoding: Encoding,

    #[serde(default)]
    pub on_malformed: MalformedPolicy,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            identity: default_identity(),
            encoding: Encoding::default(),
            on_malformed: MalformedPolicy::default(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        parse_addr("server.listen", &self.listen)?;
        if !(256..=16 * 1024 * 1024).contains(&self.max_frame_bytes) {
            return Err(HdbusError::Config(
                "server.max_frame_bytes must be between 256 and 16777216".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_addr("server.listen", &self.listen)
    }
}

fn default_listen() -> String {
    "0.0.0.0:5555".into()
}
fn default_identity() -> String {
    "hdbus-server".into()
}
fn default_max_frame_bytes() -> usize {
    65536
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSection {
    pub listen: String,
}

impl HttpSection {
    pub fn validate(&self) -> Result<()> {
        parse_addr("http.listen", &self.listen).map(|_| ())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_addr("http.listen", &self.listen)
    }
}

/// What to do when there are more devices than pool addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustionPolicy {
    /// Refuse to start.
    #[default]
    Fail,
    /// Log the unaddressed aliases and start anyway.
    Warn,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrySection {
    pub address_pool: Vec<String>,

    #[serde(default)]
    pub on_exhaustion: ExhaustionPolicy,
}

impl RegistrySection {
    pub fn validate(&self) -> Result<()> {
        if self.address_pool.is_empty() {
            return Err(HdbusError::Config(
                "registry.address_pool must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessSection {
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: f64,

    #[serde(default = "default_min_rate_secs")]
    pub min_rate_secs: f64,

    #[serde(default = "default_max_rate_secs")]
    pub max_rate_secs: f64,
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            min_rate_secs: default_min_rate_secs(),
            max_rate_secs: default_max_rate_secs(),
        }
    }
}

impl ProcessSection {
    pub fn validate(&self) -> Result<()> {
        if !valid_secs(self.default_timeout_secs) {
            return Err(HdbusError::Config(format!(
                "process.default_timeout_secs must be positive and below {MAX_SECS}"
            )));
        }
        if !valid_secs(self.min_rate_secs) || !valid_secs(self.max_rate_secs) {
            return Err(HdbusError::Config(format!(
                "process rate bounds must be positive and below {MAX_SECS}"
            )));
        }
        if self.min_rate_secs > self.max_rate_secs {
            return Err(HdbusError::Config(
                "process.min_rate_secs must not exceed max_rate_secs".into(),
            ));
        }
        Ok(())
    }
}

fn default_timeout_secs() -> f64 {
    10.0
}
fn default_min_rate_secs() -> f64 {
    0.1
}
fn default_max_rate_secs() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpanderSection {
    #[serde(default = "default_bus_address")]
    pub bus_address: u8,

    pub output_pins: Vec<u8>,
}

impl ExpanderSection {
    pub fn validate(&self) -> Result<()> {
        if let Some(pin) = self.output_pins.iter().find(|p| **p >= EXPANDER_PINS) {
            return Err(HdbusError::Config(format!(
                "expander.output_pins: pin {pin} out of range 0..{EXPANDER_PINS}"
            )));
        }
        Ok(())
    }
}

fn default_bus_address() -> u8 {
    0x20
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Led,
    Temperature,
    Power,
    ExpanderLed,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub alias: String,
    pub kind: DeviceKind,

    #[serde(default)]
    pub pin: Option<u8>,

    /// Initial config value, applied through the device's own `set_config`.
    #[serde(default)]
    pub config: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    /// Extra tags on top of the kind's class tag.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl DeviceConfig {
    pub fn validate(&self, expander: Option<&ExpanderSection>) -> Result<()> {
        if self.alias.is_empty() {
            return Err(HdbusError::Config("device alias must not be empty".into()));
        }
        if self.kind != DeviceKind::ExpanderLed {
            return Ok(());
        }

        let pin = self.pin.ok_or_else(|| {
            HdbusError::Config(format!("{}: expander_led requires a pin", self.alias))
        })?;
        let expander = expander.ok_or_else(|| {
            HdbusError::Config(format!(
                "{}: expander_led requires an expander section",
                self.alias
            ))
        })?;
        if !expander.output_pins.contains(&pin) {
            return Err(HdbusError::Config(format!(
                "{}: expander pin {pin} is not configured as an output",
                self.alias
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub alias: String,
    pub tag: String,
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| HdbusError::Config(format!("{field} must be a valid SocketAddr: {e}")))
}
