use rand::Rng;

use hdbus_core::error::Result;

use super::{invalid_config, Device, DeviceClass, DeviceCore};

/// Readings wander this far from the set-point.
pub const READING_JITTER: f64 = 0.2;

const SET_POINT_DOMAIN: &[&str] = &["5", "3.3"];
const DEFAULT_SET_POINT: &str = "5";

/// Simulated supply rail with a configurable voltage set-point.
pub struct PowerController {
    core: DeviceCore,
    set_point: f64,
    /// Set-point exactly as configured, echoed back by `config`.
    set_point_text: String,
    last_reading: Option<f64>,
}

impl PowerController {
    pub fn new(alias: &str) -> Self {
        Self {
            core: DeviceCore::new(alias),
            set_point: 5.0,
            set_point_text: DEFAULT_SET_POINT.to_string(),
            last_reading: None,
        }
    }

    pub fn set_point(&self) -> f64 {
        self.set_point
    }

    pub fn last_reading(&self) -> Option<f64> {
        self.last_reading
    }
}

impl Device for PowerController {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }

    fn class(&self) -> DeviceClass {
        DeviceClass::Power
    }

    fn read_data(&mut self) -> Result<String> {
        let sp = self.set_point;
        let reading = rand::thread_rng().gen_range(sp - READING_JITTER..=sp + READING_JITTER);
        self.last_reading = Some(reading);
        Ok(format!("{reading:.3}V"))
    }

    fn config(&self) -> Result<String> {
        Ok(format!("{}V", self.set_point_text))
    }

    fn config_domain(&self) -> &'static [&'static str] {
        SET_POINT_DOMAIN
    }

    fn set_config(&mut self, value: &str) -> Result<()> {
        let set_point = value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| invalid_config(&self.core.alias, value, SET_POINT_DOMAIN))?;
        self.set_point = set_point;
        self.set_point_text = value.trim().to_string();
        Ok(())
    }
}
