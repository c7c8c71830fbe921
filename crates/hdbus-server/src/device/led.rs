//! LEDs driven either by a direct GPIO pin or by an expander pin.
//!
//! For an LED, configuration *is* status: `config`/`set_config` read and
//! write the ON/OFF state, and `read_data` reports it as well.

use hdbus_core::error::Result;

use super::expander::ExpanderPin;
use super::{
    invalid_config, Device, DeviceClass, DeviceCore, STATUS_OFF, STATUS_ON,
};

/// Blink process name.
pub const BLINK: &str = "BLINK";

const LED_DOMAIN: &[&str] = &[STATUS_ON, STATUS_OFF];

/// Where an LED's level is physically written.
pub trait OutputPin: Send {
    fn write(&mut self, on: bool) -> Result<()>;
    fn describe(&self) -> String;
}

/// Simulated direct GPIO output.
#[derive(Debug)]
pub struct GpioPin {
    number: Option<u8>,
    level: bool,
}

impl GpioPin {
    pub fn new(number: Option<u8>) -> Self {
        Self {
            number,
            level: false,
        }
    }

    pub fn level(&self) -> bool {
        self.level
    }
}

impl OutputPin for GpioPin {
    fn write(&mut self, on: bool) -> Result<()> {
        self.level = on;
        Ok(())
    }

    fn describe(&self) -> String {
        match self.number {
            Some(n) => format!("gpio{n}"),
            None => "gpio".to_string(),
        }
    }
}

pub struct Led<P: OutputPin> {
    core: DeviceCore,
    pin: P,
}

/// LED whose writes go through a shared expander.
pub type ExpanderLed = Led<ExpanderPin>;

impl<P: OutputPin> Led<P> {
    pub fn new(alias: &str, pin: P) -> Self {
        Self {
            core: DeviceCore::new(alias),
            pin,
        }
    }

    pub fn pin(&self) -> &P {
        &self.pin
    }

    fn is_on(&self) -> bool {
        self.core.status == STATUS_ON
    }
}

impl<P: OutputPin> Device for Led<P> {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }

    fn class(&self) -> DeviceClass {
        DeviceClass::Led
    }

    fn set_status(&mut self, status: &str) -> Result<()> {
        let on = match status {
            STATUS_ON => true,
            STATUS_OFF => false,
            other => return Err(invalid_config(&self.core.alias, other, LED_DOMAIN)),
        };
        self.pin.write(on)?;
        self.core.status = status.to_string();
        tracing::trace!(alias = %self.core.alias, pin = %self.pin.describe(), status, "led write");
        Ok(())
    }

    fn read_data(&mut self) -> Result<String> {
        Ok(self.core.status.clone())
    }

    fn config(&self) -> Result<String> {
        Ok(self.core.status.clone())
    }

    fn config_domain(&self) -> &'static [&'static str] {
        LED_DOMAIN
    }

    fn set_config(&mut self, value: &str) -> Result<()> {
        self.set_status(value)
    }

    fn supports_process(&self, name: &str) -> bool {
        name == BLINK
    }

    fn process_step(&mut self, name: &str) -> Result<()> {
        if name != BLINK {
            return Err(super::unsupported(&self.core.alias, &format!("PROCESS {name}")));
        }
        let next = if self.is_on() { STATUS_OFF } else { STATUS_ON };
        self.set_status(next)
    }

    fn process_finish(&mut self, _name: &str) -> Result<()> {
        self.set_status(STATUS_OFF)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn config_is_status() {
        let mut led = Led::new("LED_BLUE", GpioPin::new(Some(17)));
        led.set_config("ON").unwrap();
        assert_eq!(led.status(), "ON");
        assert_eq!(led.config().unwrap(), "ON");
        assert_eq!(led.read_data().unwrap(), "ON");
        assert!(led.pin().level());
    }

    #[test]
    fn out_of_domain_value_is_invalid_config() {
        let mut led = Led::new("LED_BLUE", GpioPin::new(None));
        let err = led.set_config("DIM").unwrap_err();
        assert!(matches!(err, hdbus_core::HdbusError::InvalidConfig { .. }));
        assert_eq!(led.status(), "OFF");
    }

    #[test]
    fn blink_step_toggles_and_finish_turns_off() {
        let mut led = Led::new("LED_BLUE", GpioPin::new(None));
        led.process_step(BLINK).unwrap();
        assert_eq!(led.status(), "ON");
        led.process_step(BLINK).unwrap();
        assert_eq!(led.status(), "OFF");
        led.process_step(BLINK).unwrap();
        led.process_finish(BLINK).unwrap();
        assert_eq!(led.status(), "OFF");
        assert!(!led.pin().level());
    }

    #[test]
    fn only_blink_is_supported() {
        let mut led = Led::new("LED_BLUE", GpioPin::new(None));
        assert!(led.supports_process(BLINK));
        assert!(!led.supports_process("FADE"));
        assert!(led.process_step("FADE").is_err());
    }
}
