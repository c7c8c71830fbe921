//! Server config loader (strict parsing).

pub mod schema;

use std::fs;

use hdbus_core::error::{HdbusError, Result};

pub use schema::{
    DeviceConfig, DeviceKind, ExhaustionPolicy, ExpanderSection, GroupConfig, HdbusConfig,
    HttpSection, MalformedPolicy, ProcessSection, RegistrySection, ServerSection,
};

/// Env var naming the config file; defaults to [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "HDBUS_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "hdbus.yaml";

pub fn load_from_file(path: &str) -> Result<HdbusConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| HdbusError::Config(format!("read config {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<HdbusConfig> {
    let cfg: HdbusConfig = serde_yaml::from_str(s)
        .map_err(|e| HdbusError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Resolve the config path from the environment.
pub fn config_path() -> String {
    std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}
