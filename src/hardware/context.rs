//! The test context: every instrument a run may touch, in one place.
//!
//! A [`TestContext`] is handed to the sequence player instead of any
//! global bench state. Each instrument slot is optional (a register
//! poke session has no chamber) and can be disabled without detaching,
//! mirroring the "enabled for this session" switches on the bench
//! console. Actions asking for an absent or disabled instrument fail
//! with a precise [`HardwareError`] instead of touching hardware.
//!
//! The context also records instrument set-points as they are driven
//! (source levels, terminals, chamber target). The player snapshots
//! these into every measurement's conditions.

use std::collections::BTreeMap;

use log::debug;

use super::{Chamber, HardwareError, HwResult, I2cDevice, Multimeter, Sourcemeter};
use crate::events::Value;

/// Instrument slot identifiers, used for enable switches and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instrument {
    I2c,
    Multimeter,
    Sourcemeter,
    Chamber,
}

impl Instrument {
    pub fn name(&self) -> &'static str {
        match self {
            Instrument::I2c => "i2c bridge",
            Instrument::Multimeter => "multimeter",
            Instrument::Sourcemeter => "sourcemeter",
            Instrument::Chamber => "thermal chamber",
        }
    }
}

/// Instruments and session state for one bench run.
pub struct TestContext {
    i2c: Option<Box<dyn I2cDevice>>,
    multimeter: Option<Box<dyn Multimeter>>,
    sourcemeter: Option<Box<dyn Sourcemeter>>,
    chamber: Option<Box<dyn Chamber>>,
    i2c_enabled: bool,
    multimeter_enabled: bool,
    sourcemeter_enabled: bool,
    chamber_enabled: bool,
    setpoints: BTreeMap<String, Value>,
}

impl TestContext {
    pub fn builder() -> TestContextBuilder {
        TestContextBuilder::default()
    }

    /// Flip an instrument's session switch. Attaching via the builder
    /// enables the instrument; this masks it without detaching.
    pub fn set_enabled(&mut self, instrument: Instrument, enabled: bool) {
        debug!(
            "{} {} for this session",
            instrument.name(),
            if enabled { "enabled" } else { "disabled" }
        );
        match instrument {
            Instrument::I2c => self.i2c_enabled = enabled,
            Instrument::Multimeter => self.multimeter_enabled = enabled,
            Instrument::Sourcemeter => self.sourcemeter_enabled = enabled,
            Instrument::Chamber => self.chamber_enabled = enabled,
        }
    }

    // The handles spell out the boxed objects' 'static bound; the
    // default would tie it to the &mut self borrow, which invariance
    // cannot shorten.
    pub fn i2c(&mut self) -> HwResult<&mut (dyn I2cDevice + 'static)> {
        slot(&mut self.i2c, self.i2c_enabled, Instrument::I2c)
    }

    pub fn multimeter(&mut self) -> HwResult<&mut (dyn Multimeter + 'static)> {
        slot(
            &mut self.multimeter,
            self.multimeter_enabled,
            Instrument::Multimeter,
        )
    }

    pub fn sourcemeter(&mut self) -> HwResult<&mut (dyn Sourcemeter + 'static)> {
        slot(
            &mut self.sourcemeter,
            self.sourcemeter_enabled,
            Instrument::Sourcemeter,
        )
    }

    pub fn chamber(&mut self) -> HwResult<&mut (dyn Chamber + 'static)> {
        slot(&mut self.chamber, self.chamber_enabled, Instrument::Chamber)
    }

    pub fn has_i2c(&self) -> bool {
        self.i2c.is_some()
    }

    pub fn has_multimeter(&self) -> bool {
        self.multimeter.is_some()
    }

    pub fn has_sourcemeter(&self) -> bool {
        self.sourcemeter.is_some()
    }

    pub fn has_chamber(&self) -> bool {
        self.chamber.is_some()
    }

    /// Note a driven set-point. Later values for the same name replace
    /// earlier ones; the set persists across runs like the bench does.
    pub fn record_setpoint(&mut self, name: &str, value: Value) {
        self.setpoints.insert(name.to_string(), value);
    }

    /// Set-points currently in force, by name.
    pub fn setpoints(&self) -> &BTreeMap<String, Value> {
        &self.setpoints
    }
}

/// Resolve one instrument slot against its session switch.
fn slot<'a, T: ?Sized>(
    device: &'a mut Option<Box<T>>,
    enabled: bool,
    instrument: Instrument,
) -> HwResult<&'a mut T> {
    match device {
        Some(device) if enabled => Ok(device.as_mut()),
        Some(_) => Err(HardwareError::NotEnabled {
            device: instrument.name(),
        }),
        None => Err(HardwareError::NotInitialized {
            device: instrument.name(),
        }),
    }
}

/// Builder collecting whichever instruments this session has.
#[derive(Default)]
pub struct TestContextBuilder {
    i2c: Option<Box<dyn I2cDevice>>,
    multimeter: Option<Box<dyn Multimeter>>,
    sourcemeter: Option<Box<dyn Sourcemeter>>,
    chamber: Option<Box<dyn Chamber>>,
}

impl TestContextBuilder {
    pub fn i2c(mut self, device: impl I2cDevice + 'static) -> Self {
        self.i2c = Some(Box::new(device));
        self
    }

    pub fn multimeter(mut self, device: impl Multimeter + 'static) -> Self {
        self.multimeter = Some(Box::new(device));
        self
    }

    pub fn sourcemeter(mut self, device: impl Sourcemeter + 'static) -> Self {
        self.sourcemeter = Some(Box::new(device));
        self
    }

    pub fn chamber(mut self, device: impl Chamber + 'static) -> Self {
        self.chamber = Some(Box::new(device));
        self
    }

    pub fn build(self) -> TestContext {
        TestContext {
            i2c_enabled: self.i2c.is_some(),
            multimeter_enabled: self.multimeter.is_some(),
            sourcemeter_enabled: self.sourcemeter.is_some(),
            chamber_enabled: self.chamber.is_some(),
            i2c: self.i2c,
            multimeter: self.multimeter,
            sourcemeter: self.sourcemeter,
            chamber: self.chamber,
            setpoints: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::{SimI2cDevice, SimMultimeter};

    #[test]
    fn test_absent_instrument_is_not_initialized() {
        let mut ctx = TestContext::builder().build();
        let err = ctx.multimeter().err().unwrap();
        assert_eq!(
            err,
            HardwareError::NotInitialized {
                device: "multimeter"
            }
        );
    }

    #[test]
    fn test_disabled_instrument_is_not_enabled() {
        let mut ctx = TestContext::builder()
            .multimeter(SimMultimeter::new())
            .build();
        assert!(ctx.multimeter().is_ok());

        ctx.set_enabled(Instrument::Multimeter, false);
        let err = ctx.multimeter().err().unwrap();
        assert_eq!(
            err,
            HardwareError::NotEnabled {
                device: "multimeter"
            }
        );

        ctx.set_enabled(Instrument::Multimeter, true);
        assert!(ctx.multimeter().is_ok());
    }

    #[test]
    fn test_attached_instrument_is_usable() {
        let mut ctx = TestContext::builder().i2c(SimI2cDevice::new()).build();
        ctx.i2c().unwrap().write(0x0000, 0x55).unwrap();
        assert_eq!(ctx.i2c().unwrap().read(0x0000).unwrap(), 0x55);
    }

    #[test]
    fn test_instrument_handle_spans_multiple_calls() {
        let mut ctx = TestContext::builder().i2c(SimI2cDevice::new()).build();
        let dev = ctx.i2c().unwrap();
        dev.write(0x0000, 0x55).unwrap();
        dev.write(0x0001, 0x66).unwrap();
        assert_eq!(dev.read(0x0000).unwrap(), 0x55);
        assert_eq!(dev.read(0x0001).unwrap(), 0x66);
    }

    #[test]
    fn test_setpoints_last_value_wins() {
        let mut ctx = TestContext::builder().build();
        ctx.record_setpoint("smu_voltage", Value::Number(1.0));
        ctx.record_setpoint("smu_voltage", Value::Number(3.3));
        ctx.record_setpoint("dmm_terminal", Value::from("rear"));
        assert_eq!(ctx.setpoints().len(), 2);
        assert_eq!(
            ctx.setpoints().get("smu_voltage"),
            Some(&Value::Number(3.3))
        );
    }
}
