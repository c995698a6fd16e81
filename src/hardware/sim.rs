//! Simulated bench instruments.
//!
//! These stand-ins let sequences run end-to-end with no hardware on
//! the bench: the CLI uses them for dry runs and every test scripts
//! them directly. They model just enough behavior to be interesting:
//!
//! - [`SimI2cDevice`] keeps a byte map, records all traffic, and can
//!   be told to fail specific addresses.
//! - [`SimMultimeter`] / [`SimSourcemeter`] return scripted readings,
//!   falling back to programmed levels.
//! - [`SimChamber`] approaches its target temperature first-order, so
//!   stabilization waits take a realistic number of polls.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use log::trace;

use super::{Chamber, HardwareError, HwResult, I2cDevice, Multimeter, Sourcemeter, Terminal};

fn fault_error(device: &'static str, fault: &Option<String>) -> HwResult<()> {
    match fault {
        Some(detail) => Err(HardwareError::Connection {
            device,
            detail: detail.clone(),
        }),
        None => Ok(()),
    }
}

/// Shared view of the bytes a [`SimI2cDevice`] has written, in wire
/// order. Cloned handles stay live after the device moves into a
/// context, which is how tests and dry runs watch the traffic.
#[derive(Debug, Clone, Default)]
pub struct WireLog {
    inner: Arc<Mutex<Vec<(u16, u8)>>>,
}

impl WireLog {
    pub fn snapshot(&self) -> Vec<(u16, u8)> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, address: u16, value: u8) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((address, value));
    }
}

/// In-memory register file reachable over "I2C".
#[derive(Debug, Default)]
pub struct SimI2cDevice {
    registers: BTreeMap<u16, u8>,
    /// Addresses whose writes fail with a NAK.
    nak_addresses: BTreeSet<u16>,
    /// Fault applied to every transaction when set.
    pub fault: Option<String>,
    /// Every successful write, in wire order.
    writes: WireLog,
}

impl SimI2cDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the register file, e.g. from a map's reset-state bytes.
    pub fn with_registers(bytes: impl IntoIterator<Item = (u16, u8)>) -> Self {
        Self {
            registers: bytes.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Make writes to `address` fail with a NAK from now on.
    pub fn nak_at(mut self, address: u16) -> Self {
        self.nak_addresses.insert(address);
        self
    }

    /// Handle onto the write log that outlives this device's move
    /// into a context.
    pub fn write_log(&self) -> WireLog {
        self.writes.clone()
    }

    pub fn register(&self, address: u16) -> Option<u8> {
        self.registers.get(&address).copied()
    }
}

impl I2cDevice for SimI2cDevice {
    fn write(&mut self, address: u16, value: u8) -> HwResult<()> {
        fault_error("i2c bridge", &self.fault)?;
        if self.nak_addresses.contains(&address) {
            return Err(HardwareError::Connection {
                device: "i2c bridge",
                detail: format!("NAK writing 0x{:04X}", address),
            });
        }
        trace!("i2c write 0x{:04X} <= 0x{:02X}", address, value);
        self.registers.insert(address, value);
        self.writes.push(address, value);
        Ok(())
    }

    fn read(&mut self, address: u16) -> HwResult<u8> {
        fault_error("i2c bridge", &self.fault)?;
        let value = self.registers.get(&address).copied().unwrap_or(0);
        trace!("i2c read 0x{:04X} => 0x{:02X}", address, value);
        Ok(value)
    }
}

/// Multimeter returning scripted readings.
#[derive(Debug, Default)]
pub struct SimMultimeter {
    pub terminal: Option<Terminal>,
    pub fault: Option<String>,
    /// Readings handed out before falling back to the defaults.
    voltage_script: VecDeque<f64>,
    current_script: VecDeque<f64>,
    pub default_voltage: f64,
    pub default_current: f64,
}

impl SimMultimeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_voltage(&mut self, reading: f64) {
        self.voltage_script.push_back(reading);
    }

    pub fn queue_current(&mut self, reading: f64) {
        self.current_script.push_back(reading);
    }
}

impl Multimeter for SimMultimeter {
    fn measure_voltage(&mut self) -> HwResult<f64> {
        fault_error("multimeter", &self.fault)?;
        Ok(self
            .voltage_script
            .pop_front()
            .unwrap_or(self.default_voltage))
    }

    fn measure_current(&mut self) -> HwResult<f64> {
        fault_error("multimeter", &self.fault)?;
        Ok(self
            .current_script
            .pop_front()
            .unwrap_or(self.default_current))
    }

    fn set_terminal(&mut self, terminal: Terminal) -> HwResult<()> {
        fault_error("multimeter", &self.fault)?;
        self.terminal = Some(terminal);
        Ok(())
    }
}

/// Source-measure unit with readback of its programmed levels.
#[derive(Debug, Default)]
pub struct SimSourcemeter {
    pub voltage: f64,
    pub current: f64,
    pub protection_current: f64,
    pub output_enabled: bool,
    pub terminal: Option<Terminal>,
    pub fault: Option<String>,
    voltage_script: VecDeque<f64>,
    current_script: VecDeque<f64>,
}

impl SimSourcemeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_voltage(&mut self, reading: f64) {
        self.voltage_script.push_back(reading);
    }

    pub fn queue_current(&mut self, reading: f64) {
        self.current_script.push_back(reading);
    }
}

impl Sourcemeter for SimSourcemeter {
    fn set_voltage(&mut self, volts: f64) -> HwResult<()> {
        fault_error("sourcemeter", &self.fault)?;
        self.voltage = volts;
        Ok(())
    }

    fn set_current(&mut self, amps: f64) -> HwResult<()> {
        fault_error("sourcemeter", &self.fault)?;
        self.current = amps;
        Ok(())
    }

    fn set_protection_current(&mut self, amps: f64) -> HwResult<()> {
        fault_error("sourcemeter", &self.fault)?;
        self.protection_current = amps;
        Ok(())
    }

    fn set_terminal(&mut self, terminal: Terminal) -> HwResult<()> {
        fault_error("sourcemeter", &self.fault)?;
        self.terminal = Some(terminal);
        Ok(())
    }

    fn enable_output(&mut self, on: bool) -> HwResult<()> {
        fault_error("sourcemeter", &self.fault)?;
        self.output_enabled = on;
        Ok(())
    }

    fn measure_voltage(&mut self) -> HwResult<f64> {
        fault_error("sourcemeter", &self.fault)?;
        if let Some(reading) = self.voltage_script.pop_front() {
            return Ok(reading);
        }
        Ok(if self.output_enabled { self.voltage } else { 0.0 })
    }

    fn measure_current(&mut self) -> HwResult<f64> {
        fault_error("sourcemeter", &self.fault)?;
        if let Some(reading) = self.current_script.pop_front() {
            return Ok(reading);
        }
        Ok(if self.output_enabled { self.current } else { 0.0 })
    }
}

/// Thermal chamber that closes on its target first-order.
///
/// Every temperature read moves the air `approach` of the way to the
/// target, so a stabilization wait converges over a handful of polls
/// instead of instantly.
#[derive(Debug)]
pub struct SimChamber {
    current: f64,
    target: f64,
    /// Fraction of the remaining distance closed per read, in (0, 1].
    pub approach: f64,
    pub fault: Option<String>,
}

impl SimChamber {
    pub fn new(ambient: f64) -> Self {
        Self {
            current: ambient,
            target: ambient,
            approach: 0.5,
            fault: None,
        }
    }

    pub fn target(&self) -> f64 {
        self.target
    }
}

impl Chamber for SimChamber {
    fn set_target_temperature(&mut self, celsius: f64) -> HwResult<()> {
        fault_error("thermal chamber", &self.fault)?;
        trace!("chamber target {} degC", celsius);
        self.target = celsius;
        Ok(())
    }

    fn current_temperature(&mut self) -> HwResult<f64> {
        fault_error("thermal chamber", &self.fault)?;
        self.current += (self.target - self.current) * self.approach;
        Ok(self.current)
    }
}
