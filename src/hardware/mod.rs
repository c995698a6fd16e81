//! Bench instrument contracts.
//!
//! These traits are the seams between the sequence player and whatever
//! is actually on the bench. Implementations can be swapped freely:
//!
//! - `I2cDevice`: a USB-I2C bridge to the device under test, or an
//!   in-memory simulator
//! - `Multimeter` / `Sourcemeter`: GPIB instruments, or scripted fakes
//! - `Chamber`: a thermal chamber controller, or a first-order model
//!
//! # Design Philosophy
//!
//! The traits are designed to be:
//! - **Narrow**: only the operations sequences actually dispatch
//! - **Mockable**: every method is cheap to script in tests
//! - **Transport-free**: no GPIB or serial types leak through; any
//!   transport failure surfaces as a [`HardwareError`]
//!
//! All waits are polled so that a run can observe cancellation; see
//! [`Chamber::wait_for_stable`] for the pattern.

pub mod context;
pub mod sim;

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::cancel::CancellationToken;

pub use context::{TestContext, TestContextBuilder};
pub use sim::{SimChamber, SimI2cDevice, SimMultimeter, SimSourcemeter, WireLog};

/// Failures crossing the instrument boundary.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HardwareError {
    /// The action needs an instrument that was never attached.
    #[error("{device} is not attached to this test context")]
    NotInitialized { device: &'static str },

    /// The instrument is attached but disabled for this session.
    #[error("{device} is attached but not enabled for this session")]
    NotEnabled { device: &'static str },

    /// The transport reported a failure (NAK, GPIB error, timeout).
    #[error("{device}: {detail}")]
    Connection { device: &'static str, detail: String },
}

pub type HwResult<T> = Result<T, HardwareError>;

/// Register-level access to the device under test.
///
/// One transaction per call; the caller owns retry policy and mirror
/// bookkeeping.
pub trait I2cDevice: Send {
    /// Write one byte to a register address.
    fn write(&mut self, address: u16, value: u8) -> HwResult<()>;

    /// Read one byte from a register address.
    fn read(&mut self, address: u16) -> HwResult<u8>;
}

/// Instrument input routing, front panel posts or rear terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Front,
    Rear,
}

impl Terminal {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "front" => Some(Terminal::Front),
            "rear" => Some(Terminal::Rear),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Terminal::Front => "front",
            Terminal::Rear => "rear",
        }
    }
}

impl std::fmt::Display for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Electrical quantity an instrument sources or measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Voltage,
    Current,
}

impl Quantity {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "voltage" => Some(Quantity::Voltage),
            "current" => Some(Quantity::Current),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Quantity::Voltage => "voltage",
            Quantity::Current => "current",
        }
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digital multimeter: measure only.
pub trait Multimeter: Send {
    fn measure_voltage(&mut self) -> HwResult<f64>;
    fn measure_current(&mut self) -> HwResult<f64>;
    fn set_terminal(&mut self, terminal: Terminal) -> HwResult<()>;
}

/// Source-measure unit: drives the part and reads back.
pub trait Sourcemeter: Send {
    /// Program the voltage source level, in volts.
    fn set_voltage(&mut self, volts: f64) -> HwResult<()>;
    /// Program the current source level, in amps.
    fn set_current(&mut self, amps: f64) -> HwResult<()>;
    /// Program the compliance (protection) current limit, in amps.
    fn set_protection_current(&mut self, amps: f64) -> HwResult<()>;
    fn set_terminal(&mut self, terminal: Terminal) -> HwResult<()>;
    /// Switch the output relay on or off.
    fn enable_output(&mut self, on: bool) -> HwResult<()>;
    fn measure_voltage(&mut self) -> HwResult<f64>;
    fn measure_current(&mut self) -> HwResult<f64>;
}

/// Outcome of a chamber stabilization wait.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StabilityWait {
    /// Temperature entered the tolerance band; last reading attached.
    Stable(f64),
    /// Deadline passed first; last reading attached.
    TimedOut(f64),
    /// The run was cancelled mid-wait.
    Cancelled,
}

/// Thermal chamber holding the device under test.
pub trait Chamber: Send {
    /// Command a new target temperature, in degrees C.
    fn set_target_temperature(&mut self, celsius: f64) -> HwResult<()>;

    /// Read the chamber's current air temperature, in degrees C.
    fn current_temperature(&mut self) -> HwResult<f64>;

    /// Poll [`current_temperature`] until it is within `tolerance` of
    /// `target`, the deadline passes, or the run is cancelled.
    ///
    /// The default implementation reads once per `poll` interval, so
    /// cancellation latency is bounded by the poll period. A real
    /// chamber with its own stability query may override this.
    ///
    /// [`current_temperature`]: Chamber::current_temperature
    fn wait_for_stable(
        &mut self,
        target: f64,
        tolerance: f64,
        timeout: Duration,
        poll: Duration,
        cancel: &CancellationToken,
    ) -> HwResult<StabilityWait> {
        let deadline = Instant::now() + timeout;
        loop {
            let reading = self.current_temperature()?;
            if (reading - target).abs() <= tolerance {
                return Ok(StabilityWait::Stable(reading));
            }
            if Instant::now() >= deadline {
                return Ok(StabilityWait::TimedOut(reading));
            }
            if cancel.sleep_interruptibly(poll) {
                return Ok(StabilityWait::Cancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_parse() {
        assert_eq!(Terminal::parse("front"), Some(Terminal::Front));
        assert_eq!(Terminal::parse(" REAR "), Some(Terminal::Rear));
        assert_eq!(Terminal::parse("side"), None);
    }

    #[test]
    fn test_quantity_parse() {
        assert_eq!(Quantity::parse("voltage"), Some(Quantity::Voltage));
        assert_eq!(Quantity::parse("Current"), Some(Quantity::Current));
        assert_eq!(Quantity::parse("power"), None);
    }

    #[test]
    fn test_hardware_error_display() {
        let e = HardwareError::NotInitialized { device: "multimeter" };
        assert!(e.to_string().contains("multimeter"));
        assert!(e.to_string().contains("not attached"));

        let e = HardwareError::Connection {
            device: "i2c bridge",
            detail: "NAK on address 0x0002".to_string(),
        };
        assert!(e.to_string().contains("NAK"));
    }
}
