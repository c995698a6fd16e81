//! Run events: values, measurements, and completion summaries.
//!
//! The sequence player is headless. Everything a frontend shows while
//! a run progresses flows through the [`EventSink`] trait: free-text
//! progress lines, [`Measurement`] records, and one final
//! [`RunSummary`]. Sinks are synchronous and called from the worker
//! thread driving the run, so implementations should hand data off
//! quickly rather than block.

use std::collections::BTreeMap;
use std::fmt;

use crate::regmap::parse_auto;

/// Scalar flowing through a run: sweep points, action parameters,
/// measurement results, recorded conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    /// The numeric payload, without any text coercion.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    /// Interpret as a number, accepting numeric text ("3.3") and
    /// 0x-prefixed hex text ("0x1F").
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(text) => {
                let trimmed = text.trim();
                if let Ok(n) = trimmed.parse::<f64>() {
                    Some(n)
                } else {
                    parse_auto(trimmed).map(|v| v as f64)
                }
            }
        }
    }

    /// Interpret as an unsigned register value.
    ///
    /// Numbers must be non-negative integers; text may be decimal or
    /// 0x-prefixed hex. Anything else is `None`.
    pub fn to_register_value(&self) -> Option<u64> {
        match self {
            Value::Number(n) => {
                if n.is_finite() && *n >= 0.0 && n.fract() == 0.0 && *n <= u64::MAX as f64 {
                    Some(*n as u64)
                } else {
                    None
                }
            }
            Value::Text(text) => parse_auto(text),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Whole numbers print without a trailing ".0" so register
            // values and iteration counts read naturally in logs.
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(text) => f.write_str(text),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

/// One measured quantity, tagged with everything needed to place it in
/// a report: which sample, and the conditions in force when it was
/// taken (instrument set-points plus active loop bindings).
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Column name in the eventual report.
    pub variable_name: String,
    pub value: Value,
    /// Identifier of the device under test.
    pub sample_id: String,
    /// Conditions snapshot at the moment of measurement.
    pub conditions: BTreeMap<String, Value>,
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.variable_name, self.value)?;
        if !self.conditions.is_empty() {
            write!(f, " [")?;
            for (index, (name, value)) in self.conditions.iter().enumerate() {
                if index > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}={}", name, value)?;
            }
            write!(f, "]")?;
        }
        write!(f, " (sample {})", self.sample_id)
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every action executed without failure.
    Completed,
    /// The run finished or halted with at least one failed action.
    Failed,
    /// A cancellation request stopped the run early.
    Aborted,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => f.write_str("completed"),
            RunOutcome::Failed => f.write_str("failed"),
            RunOutcome::Aborted => f.write_str("aborted"),
        }
    }
}

/// Final accounting for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    /// One-line human description of how the run ended.
    pub message: String,
    /// Simple actions dispatched, including failed ones.
    pub actions_run: usize,
    pub failures: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({} actions, {} failures)",
            self.outcome, self.message, self.actions_run, self.failures
        )
    }
}

/// Consumer of run progress.
///
/// The player owns a `&mut dyn EventSink` for the duration of a run
/// and calls it inline; `Send` lets the whole run move to a worker
/// thread together with its sink.
pub trait EventSink: Send {
    /// Free-text progress line (action failures, holds, delays).
    fn on_log(&mut self, message: &str);

    /// A value-yielding action produced a result.
    fn on_measurement(&mut self, measurement: &Measurement);

    /// The run reached a terminal state. Called exactly once per run.
    fn on_finished(&mut self, summary: &RunSummary);
}

/// Sink that records everything, for tests and report assembly.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub logs: Vec<String>,
    pub measurements: Vec<Measurement>,
    pub finished: Option<RunSummary>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Numeric values recorded under `variable_name`, in order.
    pub fn numbers_for(&self, variable_name: &str) -> Vec<f64> {
        self.measurements
            .iter()
            .filter(|m| m.variable_name == variable_name)
            .filter_map(|m| m.value.as_number())
            .collect()
    }
}

impl EventSink for MemorySink {
    fn on_log(&mut self, message: &str) {
        self.logs.push(message.to_string());
    }

    fn on_measurement(&mut self, measurement: &Measurement) {
        self.measurements.push(measurement.clone());
    }

    fn on_finished(&mut self, summary: &RunSummary) {
        self.finished = Some(summary.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_to_number_accepts_text_forms() {
        assert_eq!(Value::Number(3.5).to_number(), Some(3.5));
        assert_eq!(Value::from("3.5").to_number(), Some(3.5));
        assert_eq!(Value::from("0x10").to_number(), Some(16.0));
        assert_eq!(Value::from("ten").to_number(), None);
    }

    #[test]
    fn test_value_to_register_value() {
        assert_eq!(Value::Number(85.0).to_register_value(), Some(85));
        assert_eq!(Value::from("0x55").to_register_value(), Some(0x55));
        assert_eq!(Value::from("85").to_register_value(), Some(85));
        assert_eq!(Value::Number(1.5).to_register_value(), None);
        assert_eq!(Value::Number(-1.0).to_register_value(), None);
        assert_eq!(Value::from("0xZZ").to_register_value(), None);
    }

    #[test]
    fn test_value_display_trims_whole_numbers() {
        assert_eq!(Value::Number(25.0).to_string(), "25");
        assert_eq!(Value::Number(3.3).to_string(), "3.3");
        assert_eq!(Value::from("rear").to_string(), "rear");
    }

    #[test]
    fn test_measurement_display() {
        let mut conditions = BTreeMap::new();
        conditions.insert("TEMP".to_string(), Value::Number(25.0));
        conditions.insert("smu_voltage".to_string(), Value::Number(3.3));
        let m = Measurement {
            variable_name: "VDD_READ".to_string(),
            value: Value::Number(1.8),
            sample_id: "S42".to_string(),
            conditions,
        };
        let line = m.to_string();
        assert!(line.contains("VDD_READ = 1.8"));
        assert!(line.contains("TEMP=25"));
        assert!(line.contains("sample S42"));
    }

    #[test]
    fn test_memory_sink_records_in_order() {
        let mut sink = MemorySink::new();
        sink.on_log("first");
        sink.on_measurement(&Measurement {
            variable_name: "V".to_string(),
            value: Value::Number(1.0),
            sample_id: "S1".to_string(),
            conditions: BTreeMap::new(),
        });
        sink.on_measurement(&Measurement {
            variable_name: "V".to_string(),
            value: Value::Number(2.0),
            sample_id: "S1".to_string(),
            conditions: BTreeMap::new(),
        });
        sink.on_finished(&RunSummary {
            outcome: RunOutcome::Completed,
            message: "done".to_string(),
            actions_run: 2,
            failures: 0,
        });
        assert_eq!(sink.logs, vec!["first"]);
        assert_eq!(sink.numbers_for("V"), vec![1.0, 2.0]);
        assert!(sink.finished.as_ref().unwrap().outcome.is_success());
    }
}
