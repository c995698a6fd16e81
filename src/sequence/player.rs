//! Sequence player: walks an item tree and drives the bench.
//!
//! The player is the single writer for a run. It borrows the register
//! map, the instrument context, and an event sink for the duration of
//! [`SequencePlayer::run`], so nothing else can touch the mirrors or
//! the wire mid-run.
//!
//! # Execution model
//!
//! ```text
//!   run(sequence)
//!     item            dispatch, count, report failure
//!     loop item       expand sweep -> push binding -> children -> pop
//!     cancellation    checked before every item and inside waits
//!     hold            arm gate, park until acknowledged or cancelled
//! ```
//!
//! Failures are per action. With `halt_on_error` set the first failure
//! ends the run; otherwise the player records it and moves on. A
//! cancellation request always wins over both policies.

use std::collections::BTreeSet;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;

use crate::cancel::{CancellationToken, HoldGate};
use crate::events::{EventSink, Measurement, RunOutcome, RunSummary, Value};
use crate::hardware::{HardwareError, Quantity, StabilityWait, TestContext};
use crate::regmap::{RegisterError, RegisterMap, ValueSource, WriteOp, WritePlan};

use super::file::Sequence;
use super::item::{Action, ActionItem, LoopItem, ParamValue, SequenceItem};
use super::scope::{LoopFrame, ScopeStack};
use super::sweep::ValidationError;

/// Why a single action failed.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Sweep(#[from] ValidationError),

    #[error("no enclosing loop binds '{name}'")]
    UnresolvedVariable { name: String },

    #[error("'{text}' is not usable as a number here")]
    InvalidNumericInput { text: String },

    #[error("value 0x{value:X} does not fit field '{field}' ({length} bits)")]
    ValueExceedsWidth {
        field: String,
        value: u64,
        length: u32,
    },

    #[error("field '{field}' is {access}, refusing to write it")]
    FieldNotWritable { field: String, access: String },

    #[error("value 0x{value:X} does not fit in one byte")]
    ValueNotByte { value: u64 },

    #[error("0x{address:X} is outside the 16-bit address space")]
    AddressRange { address: u64 },

    #[error("chamber did not reach {target} C within {timeout_s} s (last reading {last} C)")]
    StabilizationTimeout {
        target: f64,
        last: f64,
        timeout_s: f64,
    },

    /// The transport failed part-way through a multi-byte plan. The
    /// mirror already reflects the `confirmed` prefix.
    #[error("write to 0x{address:04X} failed after {confirmed} of {planned} bytes: {source}")]
    PartialWrite {
        address: u16,
        confirmed: usize,
        planned: usize,
        source: HardwareError,
    },

    #[error("cancelled by operator request")]
    Cancelled,
}

/// Per-run policy knobs.
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    /// Stop at the first failed action instead of recording and
    /// continuing.
    pub halt_on_error: bool,
    /// Sample identifier stamped on every measurement.
    pub sample_id: String,
    /// Poll interval for chamber stabilization waits.
    pub chamber_poll: Duration,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            halt_on_error: true,
            sample_id: "sample-0".to_string(),
            chamber_poll: Duration::from_secs(2),
        }
    }
}

/// Control flow after an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Move on to the next item.
    Continue,
    /// A failure ended the run under the halt policy.
    Halted,
    /// A cancellation request ended the run.
    Aborted,
}

/// Executes sequences against a register map and instrument context.
pub struct SequencePlayer<'a> {
    map: &'a mut RegisterMap,
    context: &'a mut TestContext,
    sink: &'a mut dyn EventSink,
    options: PlayerOptions,
    cancel: CancellationToken,
    hold: HoldGate,
    scopes: ScopeStack,
    actions_run: usize,
    failures: usize,
}

impl<'a> SequencePlayer<'a> {
    pub fn new(
        map: &'a mut RegisterMap,
        context: &'a mut TestContext,
        sink: &'a mut dyn EventSink,
        options: PlayerOptions,
    ) -> Self {
        Self {
            map,
            context,
            sink,
            options,
            cancel: CancellationToken::new(),
            hold: HoldGate::new(),
            scopes: ScopeStack::new(),
            actions_run: 0,
            failures: 0,
        }
    }

    /// Handle for requesting cancellation from another thread.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Handle for acknowledging hold items from another thread.
    pub fn hold_gate(&self) -> HoldGate {
        self.hold.clone()
    }

    /// Execute a sequence to completion and report how it ended.
    ///
    /// The player is reusable: counters, loop scopes, and any stale
    /// cancellation request are cleared at the start of each run.
    pub fn run(&mut self, sequence: &Sequence) -> RunSummary {
        self.cancel.reset();
        self.scopes.clear();
        self.actions_run = 0;
        self.failures = 0;

        info!(
            "run start: {} ({} actions)",
            sequence.name.as_deref().unwrap_or("unnamed sequence"),
            sequence.items.iter().map(|i| i.action_count()).sum::<usize>()
        );
        let flow = self.execute_items(&sequence.items);

        let summary = match flow {
            Flow::Aborted => RunSummary {
                outcome: RunOutcome::Aborted,
                message: "cancelled by operator request".to_string(),
                actions_run: self.actions_run,
                failures: self.failures,
            },
            Flow::Halted => RunSummary {
                outcome: RunOutcome::Failed,
                message: "halted at first failure".to_string(),
                actions_run: self.actions_run,
                failures: self.failures,
            },
            Flow::Continue if self.failures > 0 => RunSummary {
                outcome: RunOutcome::Failed,
                message: format!("finished with {} failed actions", self.failures),
                actions_run: self.actions_run,
                failures: self.failures,
            },
            Flow::Continue => RunSummary {
                outcome: RunOutcome::Completed,
                message: "all actions completed".to_string(),
                actions_run: self.actions_run,
                failures: self.failures,
            },
        };
        info!("run end: {}", summary);
        self.sink.on_finished(&summary);
        summary
    }

    fn execute_items(&mut self, items: &[SequenceItem]) -> Flow {
        for item in items {
            if self.cancel.is_cancelled() {
                return Flow::Aborted;
            }
            let flow = match item {
                SequenceItem::Simple(action) => self.run_action_item(action),
                SequenceItem::Loop(repeat) => self.run_loop(repeat),
            };
            if flow != Flow::Continue {
                return flow;
            }
        }
        Flow::Continue
    }

    fn run_action_item(&mut self, item: &ActionItem) -> Flow {
        self.actions_run += 1;
        debug!(
            "item {} '{}' ({})",
            item.item_id,
            item.display_name,
            item.action.kind_name()
        );
        match self.perform(&item.action) {
            Ok(()) => Flow::Continue,
            Err(ActionError::Cancelled) => Flow::Aborted,
            Err(error) => self.record_failure(item.item_id, &item.display_name, &error),
        }
    }

    fn run_loop(&mut self, item: &LoopItem) -> Flow {
        let points = match item.sweep.expand() {
            Ok(points) => points,
            // Loaded sequences validate sweeps up front, so this only
            // trips for trees built in code.
            Err(error) => {
                self.failures += 1;
                let report = ActionError::from(error);
                return self.record_failure_flow(item.item_id, &item.display_name, &report);
            }
        };

        debug!(
            "loop {} '{}' over {} points",
            item.item_id,
            item.display_name,
            points.len()
        );
        for (iteration, point) in points.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Flow::Aborted;
            }
            if let Some(variable) = &item.variable {
                debug!("  {} = {} (iteration {})", variable, point, iteration + 1);
            }
            self.scopes.push(LoopFrame {
                item_id: item.item_id,
                variable: item.variable.clone(),
                value: point,
                iteration,
            });
            let flow = self.execute_items(&item.children);
            self.scopes.pop();
            if flow != Flow::Continue {
                return flow;
            }
        }
        Flow::Continue
    }

    fn record_failure(&mut self, item_id: u32, display_name: &str, error: &ActionError) -> Flow {
        self.failures += 1;
        self.record_failure_flow(item_id, display_name, error)
    }

    fn record_failure_flow(
        &mut self,
        item_id: u32,
        display_name: &str,
        error: &ActionError,
    ) -> Flow {
        let line = format!("item {} '{}' failed: {}", item_id, display_name, error);
        warn!("{}", line);
        self.sink.on_log(&line);
        if self.options.halt_on_error {
            Flow::Halted
        } else {
            Flow::Continue
        }
    }

    // --- action dispatch --------------------------------------------------

    fn perform(&mut self, action: &Action) -> Result<(), ActionError> {
        match action {
            Action::RegisterWrite { field, value } => {
                let field_id = self.resolve(field)?.to_string();
                let raw = self.resolve_register_value(value)?;
                self.write_field(&field_id, raw)
            }
            Action::AddressWrite { address, value } => {
                let address = self.resolve_address(address)?;
                let raw = self.resolve_register_value(value)?;
                if raw > u8::MAX as u64 {
                    return Err(ActionError::ValueNotByte { value: raw });
                }
                let plan = self.map.plan_address_write(address, raw as u8)?;
                self.apply_plan(&plan)
            }
            Action::RegisterRead { field, variable } => {
                let field_id = self.resolve(field)?.to_string();
                let value = self.read_field(&field_id)?;
                let name = variable.clone().unwrap_or_else(|| field_id.clone());
                self.record_measurement(name, Value::Number(value as f64));
                Ok(())
            }
            Action::AddressRead { address, variable } => {
                let address = self.resolve_address(address)?;
                let value = self.read_address(address)?;
                let name = variable
                    .clone()
                    .unwrap_or_else(|| format!("reg_0x{:04X}", address));
                self.record_measurement(name, Value::Number(value as f64));
                Ok(())
            }
            Action::Delay { seconds } => {
                let seconds = self.resolve_duration(seconds)?;
                debug!("delay {:?}", seconds);
                if self.cancel.sleep_interruptibly(seconds) {
                    return Err(ActionError::Cancelled);
                }
                Ok(())
            }
            Action::DmmMeasure { quantity, variable } => {
                let dmm = self.context.multimeter()?;
                let reading = match quantity {
                    Quantity::Voltage => dmm.measure_voltage()?,
                    Quantity::Current => dmm.measure_current()?,
                };
                let name = variable
                    .clone()
                    .unwrap_or_else(|| format!("dmm_{}", quantity.as_str()));
                self.record_measurement(name, Value::Number(reading));
                Ok(())
            }
            Action::DmmSetTerminal { terminal } => {
                self.context.multimeter()?.set_terminal(*terminal)?;
                self.context
                    .record_setpoint("dmm_terminal", Value::from(terminal.as_str()));
                Ok(())
            }
            Action::SmuSetLevel { quantity, level } => {
                let level = self.resolve_number(level)?;
                let smu = self.context.sourcemeter()?;
                match quantity {
                    Quantity::Voltage => smu.set_voltage(level)?,
                    Quantity::Current => smu.set_current(level)?,
                }
                self.context
                    .record_setpoint(&format!("smu_{}", quantity.as_str()), Value::Number(level));
                Ok(())
            }
            Action::SmuMeasure { quantity, variable } => {
                let smu = self.context.sourcemeter()?;
                let reading = match quantity {
                    Quantity::Voltage => smu.measure_voltage()?,
                    Quantity::Current => smu.measure_current()?,
                };
                let name = variable
                    .clone()
                    .unwrap_or_else(|| format!("smu_{}", quantity.as_str()));
                self.record_measurement(name, Value::Number(reading));
                Ok(())
            }
            Action::SmuEnableOutput { on } => {
                self.context.sourcemeter()?.enable_output(*on)?;
                self.context
                    .record_setpoint("smu_output", Value::from(if *on { "on" } else { "off" }));
                Ok(())
            }
            Action::SmuConfigureAndEnable {
                source,
                level,
                protection_current,
            } => {
                let level = self.resolve_number(level)?;
                let protection = self.resolve_number(protection_current)?;
                // Compliance goes in before the level so the limit is
                // armed by the time the output comes up.
                let smu = self.context.sourcemeter()?;
                smu.set_protection_current(protection)?;
                match source {
                    Quantity::Voltage => smu.set_voltage(level)?,
                    Quantity::Current => smu.set_current(level)?,
                }
                smu.enable_output(true)?;
                self.context
                    .record_setpoint("smu_protection_current", Value::Number(protection));
                self.context
                    .record_setpoint(&format!("smu_{}", source.as_str()), Value::Number(level));
                self.context.record_setpoint("smu_output", Value::from("on"));
                Ok(())
            }
            Action::SmuSetTerminal { terminal } => {
                self.context.sourcemeter()?.set_terminal(*terminal)?;
                self.context
                    .record_setpoint("smu_terminal", Value::from(terminal.as_str()));
                Ok(())
            }
            Action::SmuSetProtectionCurrent { amps } => {
                let amps = self.resolve_number(amps)?;
                self.context.sourcemeter()?.set_protection_current(amps)?;
                self.context
                    .record_setpoint("smu_protection_current", Value::Number(amps));
                Ok(())
            }
            Action::ChamberSetTemperature { celsius } => {
                let celsius = self.resolve_number(celsius)?;
                self.context.chamber()?.set_target_temperature(celsius)?;
                self.context
                    .record_setpoint("chamber_temperature", Value::Number(celsius));
                Ok(())
            }
            Action::ChamberWaitStable {
                target,
                tolerance,
                timeout_s,
            } => {
                let target = self.resolve_number(target)?;
                let tolerance = self.resolve_number(tolerance)?;
                let timeout_s = self.resolve_number(timeout_s)?;
                let timeout = duration_from_seconds(timeout_s)?;
                let poll = self.options.chamber_poll;
                let cancel = self.cancel.clone();
                let outcome = self
                    .context
                    .chamber()?
                    .wait_for_stable(target, tolerance, timeout, poll, &cancel)?;
                match outcome {
                    StabilityWait::Stable(reading) => {
                        self.sink.on_log(&format!(
                            "chamber stable at {:.2} C (target {} C)",
                            reading, target
                        ));
                        Ok(())
                    }
                    StabilityWait::TimedOut(last) => Err(ActionError::StabilizationTimeout {
                        target,
                        last,
                        timeout_s,
                    }),
                    StabilityWait::Cancelled => Err(ActionError::Cancelled),
                }
            }
            Action::Hold { prompt } => {
                info!("hold: {}", prompt);
                self.sink.on_log(prompt);
                self.hold.arm();
                let cancel = self.cancel.clone();
                if self.hold.wait(&cancel) {
                    Ok(())
                } else {
                    Err(ActionError::Cancelled)
                }
            }
        }
    }

    // --- register plumbing ------------------------------------------------

    fn write_field(&mut self, field_id: &str, value: u64) -> Result<(), ActionError> {
        let field = self.map.field(field_id)?;
        if !field.access.is_writable() {
            return Err(ActionError::FieldNotWritable {
                field: field_id.to_string(),
                access: field.access.to_string(),
            });
        }
        if !field.fits(value) {
            return Err(ActionError::ValueExceedsWidth {
                field: field_id.to_string(),
                value,
                length: field.length,
            });
        }
        let plan = self.map.plan_field_write(field_id, value)?;
        self.apply_plan(&plan)
    }

    /// Push a plan to the wire, then fold the bytes that made it into
    /// the current mirror. On a mid-plan transport failure only the
    /// successful prefix is confirmed, so the mirror keeps matching
    /// the device.
    fn apply_plan(&mut self, plan: &WritePlan) -> Result<(), ActionError> {
        if plan.is_empty() {
            debug!("write plan empty, device already holds the value");
            return Ok(());
        }
        let mut confirmed = 0usize;
        let mut failure: Option<(u16, HardwareError)> = None;
        {
            let dev = self.context.i2c()?;
            for op in &plan.ops {
                debug!("i2c write {}", op);
                match dev.write(op.address, op.value) {
                    Ok(()) => confirmed += 1,
                    Err(source) => {
                        failure = Some((op.address, source));
                        break;
                    }
                }
            }
        }
        self.map.confirm(&plan.ops[..confirmed]);
        match failure {
            Some((address, source)) => Err(ActionError::PartialWrite {
                address,
                confirmed,
                planned: plan.len(),
                source,
            }),
            None => Ok(()),
        }
    }

    /// Read every byte a field touches, refresh the mirror, and
    /// reassemble the field value from it.
    fn read_field(&mut self, field_id: &str) -> Result<u64, ActionError> {
        let addresses: BTreeSet<u16> = self.map.field(field_id)?.addresses().collect();
        let mut ops = Vec::with_capacity(addresses.len());
        {
            let dev = self.context.i2c()?;
            for address in addresses {
                let value = dev.read(address)?;
                debug!("i2c read 0x{:04X} => 0x{:02X}", address, value);
                ops.push(WriteOp { address, value });
            }
        }
        self.map.confirm(&ops);
        Ok(self.map.field_value(field_id, ValueSource::Current)?)
    }

    fn read_address(&mut self, address: u16) -> Result<u8, ActionError> {
        if !self.map.is_mapped(address) {
            return Err(RegisterError::AddressNotMapped(address).into());
        }
        let value = self.context.i2c()?.read(address)?;
        debug!("i2c read 0x{:04X} => 0x{:02X}", address, value);
        self.map.confirm(&[WriteOp { address, value }]);
        Ok(value)
    }

    // --- parameter resolution ---------------------------------------------

    fn resolve(&self, param: &ParamValue) -> Result<Value, ActionError> {
        match param {
            ParamValue::Literal(value) => Ok(value.clone()),
            ParamValue::LoopRef(name) => self
                .scopes
                .resolve(name)
                .cloned()
                .ok_or_else(|| ActionError::UnresolvedVariable { name: name.clone() }),
        }
    }

    fn resolve_number(&self, param: &ParamValue) -> Result<f64, ActionError> {
        let value = self.resolve(param)?;
        value
            .to_number()
            .ok_or_else(|| ActionError::InvalidNumericInput {
                text: value.to_string(),
            })
    }

    fn resolve_register_value(&self, param: &ParamValue) -> Result<u64, ActionError> {
        let value = self.resolve(param)?;
        value
            .to_register_value()
            .ok_or_else(|| ActionError::InvalidNumericInput {
                text: value.to_string(),
            })
    }

    fn resolve_address(&self, param: &ParamValue) -> Result<u16, ActionError> {
        let raw = self.resolve_register_value(param)?;
        if raw > u16::MAX as u64 {
            return Err(ActionError::AddressRange { address: raw });
        }
        Ok(raw as u16)
    }

    fn resolve_duration(&self, param: &ParamValue) -> Result<Duration, ActionError> {
        duration_from_seconds(self.resolve_number(param)?)
    }

    fn record_measurement(&mut self, variable_name: String, value: Value) {
        let mut conditions = self.context.setpoints().clone();
        // Loop bindings overwrite a setpoint of the same name.
        conditions.extend(self.scopes.bindings());
        let measurement = Measurement {
            variable_name,
            value,
            sample_id: self.options.sample_id.clone(),
            conditions,
        };
        debug!("measured {}", measurement);
        self.sink.on_measurement(&measurement);
    }
}

fn duration_from_seconds(seconds: f64) -> Result<Duration, ActionError> {
    // try_from_secs_f64 rejects negatives, non-finite values, and
    // spans longer than a Duration can hold.
    Duration::try_from_secs_f64(seconds).map_err(|_| ActionError::InvalidNumericInput {
        text: seconds.to_string(),
    })
}
