//! Sweep strategies: how a loop turns into concrete iterations.
//!
//! A sweep is expanded to its full value list before the first
//! iteration runs, so an invalid sweep fails the loop up front rather
//! than after half its children have touched hardware.

use thiserror::Error;

use crate::events::Value;

/// How a loop generates its iteration values.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepSpec {
    /// Arithmetic progression from `start` towards `stop`, inclusive
    /// of every point it lands on. Direction follows the sign of
    /// `step`, so 85 down to 25 with step -20 is valid.
    NumericRange { start: f64, stop: f64, step: f64 },
    /// Explicit values, iterated in authored order (duplicates kept).
    ValueList { values: Vec<Value> },
    /// Plain repetition; the bound value is the 1-based iteration.
    FixedCount { count: u32 },
}

/// An authoring mistake caught before any iteration runs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("numeric range step must not be zero")]
    ZeroStep,
    #[error("numeric range from {start} to {stop} never terminates with step {step}")]
    StepDirection { start: f64, stop: f64, step: f64 },
    #[error("numeric range from {start} to {stop} with step {step} is not finite")]
    NonFiniteRange { start: f64, stop: f64, step: f64 },
    #[error("value list sweep has no values")]
    EmptyValueList,
    #[error("value list entry {index} ({value}) is not a finite number")]
    NonFiniteValue { index: usize, value: f64 },
    #[error("fixed count sweep must run at least once")]
    ZeroCount,
}

impl SweepSpec {
    /// Check the sweep without expanding it.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match *self {
            SweepSpec::NumericRange { start, stop, step } => {
                // NaN and infinity defeat the direction check below and
                // the point count in expand(), so they go first.
                if !start.is_finite() || !stop.is_finite() || !step.is_finite() {
                    return Err(ValidationError::NonFiniteRange { start, stop, step });
                }
                if step == 0.0 {
                    return Err(ValidationError::ZeroStep);
                }
                // Step must point from start towards stop.
                if (stop - start) * step < 0.0 {
                    return Err(ValidationError::StepDirection { start, stop, step });
                }
                Ok(())
            }
            SweepSpec::ValueList { ref values } => {
                if values.is_empty() {
                    return Err(ValidationError::EmptyValueList);
                }
                for (index, value) in values.iter().enumerate() {
                    if let Value::Number(number) = value {
                        if !number.is_finite() {
                            return Err(ValidationError::NonFiniteValue {
                                index,
                                value: *number,
                            });
                        }
                    }
                }
                Ok(())
            }
            SweepSpec::FixedCount { count } => {
                if count == 0 {
                    return Err(ValidationError::ZeroCount);
                }
                Ok(())
            }
        }
    }

    /// Expand to the concrete iteration values, in order.
    ///
    /// Range points are computed as `start + i * step` rather than by
    /// repeated addition, so long sweeps do not accumulate float
    /// error. The count is `floor((stop - start) / step) + 1`.
    pub fn expand(&self) -> Result<Vec<Value>, ValidationError> {
        self.validate()?;
        match *self {
            SweepSpec::NumericRange { start, stop, step } => {
                // Inclusive range: floor(span) + 1 points without the
                // add, which a huge span could overflow.
                let last = ((stop - start) / step).floor() as usize;
                Ok((0..=last)
                    .map(|i| Value::Number(start + step * i as f64))
                    .collect())
            }
            SweepSpec::ValueList { ref values } => Ok(values.clone()),
            SweepSpec::FixedCount { count } => Ok((1..=count)
                .map(|i| Value::Number(f64::from(i)))
                .collect()),
        }
    }

    /// Short strategy label for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            SweepSpec::NumericRange { .. } => "numeric-range",
            SweepSpec::ValueList { .. } => "value-list",
            SweepSpec::FixedCount { .. } => "fixed-count",
        }
    }
}
