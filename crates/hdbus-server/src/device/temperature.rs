//! Simulated temperature sensor.
//!
//! Each `read_data` draws a fresh integer sample in
//! [`RAW_MIN`]..=[`RAW_MAX`] degrees Celsius; the unit config only changes how
//! the sample is rendered.

use rand::Rng;

use hdbus_core::error::Result;

use super::{invalid_config, Device, DeviceClass, DeviceCore};

pub const RAW_MIN: i32 = -100;
pub const RAW_MAX: i32 = 200;

const UNIT_DOMAIN: &[&str] = &["C", "F"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "C",
            TemperatureUnit::Fahrenheit => "F",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "C" => Some(TemperatureUnit::Celsius),
            "F" => Some(TemperatureUnit::Fahrenheit),
            _ => None,
        }
    }

    /// Render a raw Celsius sample in this unit.
    pub fn render(self, raw_celsius: i32) -> String {
        match self {
            TemperatureUnit::Celsius => format!("{raw_celsius} C"),
            TemperatureUnit::Fahrenheit => format!("{} F", to_fahrenheit(raw_celsius)),
        }
    }
}

pub fn to_fahrenheit(celsius: i32) -> f64 {
    f64::from(celsius) * 1.8 + 32.0
}

pub struct TemperatureSensor {
    core: DeviceCore,
    unit: TemperatureUnit,
    last_raw: Option<i32>,
}

impl TemperatureSensor {
    pub fn new(alias: &str) -> Self {
        Self {
            core: DeviceCore::new(alias),
            unit: TemperatureUnit::Celsius,
            last_raw: None,
        }
    }

    pub fn unit(&self) -> TemperatureUnit {
        self.unit
    }

    /// Raw sample behind the most recent reading.
    pub fn last_raw(&self) -> Option<i32> {
        self.last_raw
    }
}

impl Device for TemperatureSensor {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }

    fn class(&self) -> DeviceClass {
        DeviceClass::Temperature
    }

    fn read_data(&mut self) -> Result<String> {
        let raw = rand::thread_rng().gen_range(RAW_MIN..=RAW_MAX);
        self.last_raw = Some(raw);
        Ok(self.unit.render(raw))
    }

    fn config(&self) -> Result<String> {
        Ok(self.unit.as_str().to_string())
    }

    fn config_domain(&self) -> &'static [&'static str] {
        UNIT_DOMAIN
    }

    fn set_config(&mut self, value: &str) -> Result<()> {
        self.unit = TemperatureUnit::parse(value)
            .ok_or_else(|| invalid_config(&self.core.alias, value, UNIT_DOMAIN))?;
        Ok(())
    }
}
