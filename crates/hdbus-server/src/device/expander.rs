//! Simulated 16-pin I/O expander shared by several LEDs.
//!
//! The server owns one `Arc<Expander>` and hands each LED an [`ExpanderPin`]
//! claimed from it. A pin can be claimed once, so every pin has a single
//! writer; the register itself sits behind a mutex.

use std::sync::{Arc, Mutex, PoisonError};

use hdbus_core::error::{HdbusError, Result};

use super::led::OutputPin;

pub const EXPANDER_PINS: u8 = 16;

#[derive(Debug, Default)]
struct Registers {
    /// Direction mask, 1 = output.
    outputs: u16,
    levels: u16,
    claimed: u16,
}

#[derive(Debug)]
pub struct Expander {
    bus_address: u8,
    regs: Mutex<Registers>,
}

impl Expander {
    pub fn new(bus_address: u8) -> Self {
        Self {
            bus_address,
            regs: Mutex::new(Registers::default()),
        }
    }

    pub fn bus_address(&self) -> u8 {
        self.bus_address
    }

    /// Configure `pins` as outputs, driven low.
    pub fn setup_outputs(&self, pins: &[u8]) -> Result<()> {
        let mut regs = self.regs();
        for &pin in pins {
            let bit = bit(pin)?;
            regs.outputs |= bit;
            regs.levels &= !bit;
        }
        Ok(())
    }

    /// Hand out exclusive write access to one output pin.
    pub fn claim_pin(expander: &Arc<Expander>, pin: u8) -> Result<ExpanderPin> {
        let bit = bit(pin)?;
        let mut regs = expander.regs();
        if regs.outputs & bit == 0 {
            return Err(HdbusError::Config(format!(
                "expander 0x{:02X}: pin {pin} is not an output",
                expander.bus_address
            )));
        }
        if regs.claimed & bit != 0 {
            return Err(HdbusError::Config(format!(
                "expander 0x{:02X}: pin {pin} already claimed",
                expander.bus_address
            )));
        }
        regs.claimed |= bit;
        Ok(ExpanderPin {
            expander: Arc::clone(expander),
            pin,
        })
    }

    pub fn read_pin(&self, pin: u8) -> Result<bool> {
        let bit = bit(pin)?;
        Ok(self.regs().levels & bit != 0)
    }

    /// Snapshot of the output latch.
    pub fn levels(&self) -> u16 {
        self.regs().levels
    }

    fn write_pin(&self, pin: u8, on: bool) -> Result<()> {
        let bit = bit(pin)?;
        let mut regs = self.regs();
        if regs.outputs & bit == 0 {
            return Err(HdbusError::Internal(format!(
                "expander 0x{:02X}: write to non-output pin {pin}",
                self.bus_address
            )));
        }
        if on {
            regs.levels |= bit;
        } else {
            regs.levels &= !bit;
        }
        Ok(())
    }

    fn regs(&self) -> std::sync::MutexGuard<'_, Registers> {
        self.regs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn bit(pin: u8) -> Result<u16> {
    if pin >= EXPANDER_PINS {
        return Err(HdbusError::Internal(format!("expander pin {pin} out of range")));
    }
    Ok(1u16 << pin)
}

/// One claimed expander output.
#[derive(Debug)]
pub struct ExpanderPin {
    expander: Arc<Expander>,
    pin: u8,
}

impl ExpanderPin {
    pub fn number(&self) -> u8 {
        self.pin
    }
}

impl OutputPin for ExpanderPin {
    fn write(&mut self, on: bool) -> Result<()> {
        self.expander.write_pin(self.pin, on)
    }

    fn describe(&self) -> String {
        format!("expander 0x{:02X} pin {}", self.expander.bus_address, self.pin)
    }
}
