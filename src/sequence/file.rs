//! Sequence files: loading authored sequences from TOML.
//!
//! A sequence file is a tree of items. Every item carries a `kind`;
//! `"loop"` items take a sweep table and children, anything else is a
//! simple action with its parameters inline. A parameter written as
//! `"{NAME}"` refers to an enclosing loop variable.
//!
//! # Example Sequence
//!
//! ```toml
//! name = "vdd sweep across temperature"
//!
//! [[items]]
//! kind = "loop"
//! variable = "TEMP"
//! sweep = { type = "numeric-range", start = 25, stop = 85, step = 20 }
//!
//!     [[items.children]]
//!     kind = "chamber-set-temperature"
//!     celsius = "{TEMP}"
//!
//!     [[items.children]]
//!     kind = "chamber-check-temperature-stable"
//!     target = "{TEMP}"
//!
//!     [[items.children]]
//!     kind = "register-write-by-name"
//!     field = "CTRL_REG"
//!     value = "0x55"
//!
//!     [[items.children]]
//!     kind = "smu-measure-current"
//!     variable = "IDD"
//! ```
//!
//! Loading fails closed: an unknown `kind`, a missing parameter, or a
//! malformed placeholder rejects the file rather than skipping the
//! item. Item ids are assigned in document order during loading.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::events::Value;
use crate::hardware::{Quantity, Terminal};

use super::item::{Action, ParamValue, SequenceItem};
use super::sweep::{SweepSpec, ValidationError};

/// Stability defaults applied when the author leaves them out.
const DEFAULT_STABILITY_TOLERANCE_C: f64 = 1.0;
const DEFAULT_STABILITY_TIMEOUT_S: f64 = 600.0;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{([A-Za-z_][A-Za-z0-9_]*)\}$").unwrap());

/// A loaded, validated sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub name: Option<String>,
    pub items: Vec<SequenceItem>,
}

impl Sequence {
    /// Parse and validate a sequence from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, SequenceFileError> {
        let raw: RawSequence = toml::from_str(text)?;
        let mut next_id = 1u32;
        let mut items = Vec::with_capacity(raw.items.len());
        for (index, raw_item) in raw.items.iter().enumerate() {
            let path = format!("items[{}]", index);
            items.push(compile_item(raw_item, &path, &mut next_id)?);
        }
        Ok(Sequence {
            name: raw.name,
            items,
        })
    }

    /// Read and parse a sequence file from disk.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read sequence file {}: {}", path.display(), e))?;
        Self::from_toml_str(&text)
            .map_err(|e| anyhow::anyhow!("in sequence file {}: {}", path.display(), e))
    }
}

/// Why a sequence file was rejected.
#[derive(Debug, Error)]
pub enum SequenceFileError {
    #[error("sequence file is not valid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Unknown kinds fail the load; they are never skipped.
    #[error("{path}: unknown action kind '{kind}'")]
    UnknownActionKind { path: String, kind: String },

    #[error("{path} ({kind}): missing required parameter '{param}'")]
    MissingParameter {
        path: String,
        kind: &'static str,
        param: &'static str,
    },

    /// Braces appeared but the text is not exactly one `{NAME}`.
    #[error("{path} ({kind}): parameter '{param}' is '{text}', expected a literal or '{{NAME}}'")]
    MalformedPlaceholder {
        path: String,
        kind: &'static str,
        param: &'static str,
        text: String,
    },

    #[error("{path} ({kind}): terminal must be 'front' or 'rear', got '{text}'")]
    InvalidTerminal {
        path: String,
        kind: &'static str,
        text: String,
    },

    #[error("{path} ({kind}): source must be 'voltage' or 'current', got '{text}'")]
    InvalidQuantity {
        path: String,
        kind: &'static str,
        text: String,
    },

    #[error("{path}: loop items need a sweep table")]
    MissingSweep { path: String },

    #[error("{path}: loop sweep is invalid: {source}")]
    InvalidSweep {
        path: String,
        #[source]
        source: ValidationError,
    },

    #[error("{path} ({kind}): only loop items may carry children")]
    UnexpectedChildren { path: String, kind: String },

    #[error("{path} ({kind}): only loop items may carry a sweep")]
    UnexpectedSweep { path: String, kind: String },
}

// --- raw file shape -------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct RawSequence {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    items: Vec<RawItem>,
}

/// One item as authored. Parameters for every action kind live here as
/// optionals; per-kind validation decides which must be present.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawItem {
    kind: String,
    #[serde(default)]
    display_name: Option<String>,

    // Loop fields.
    #[serde(default)]
    sweep: Option<RawSweep>,
    #[serde(default)]
    children: Vec<RawItem>,

    // Action parameters. `variable` doubles as the loop variable name
    // and the measurement report column.
    #[serde(default)]
    variable: Option<String>,
    #[serde(default)]
    field: Option<RawValue>,
    #[serde(default)]
    address: Option<RawValue>,
    #[serde(default)]
    value: Option<RawValue>,
    #[serde(default)]
    seconds: Option<RawValue>,
    #[serde(default)]
    level: Option<RawValue>,
    #[serde(default)]
    protection_current: Option<RawValue>,
    #[serde(default)]
    celsius: Option<RawValue>,
    #[serde(default)]
    target: Option<RawValue>,
    #[serde(default)]
    tolerance: Option<RawValue>,
    #[serde(default)]
    timeout_s: Option<RawValue>,
    #[serde(default)]
    terminal: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    on: Option<bool>,
    #[serde(default)]
    prompt: Option<String>,
}

/// A parameter as TOML allows it: integer, float, or string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum RawSweep {
    NumericRange { start: f64, stop: f64, step: f64 },
    ValueList { values: Vec<RawValue> },
    FixedCount { count: u32 },
}

// --- compilation ----------------------------------------------------------

fn compile_item(
    raw: &RawItem,
    path: &str,
    next_id: &mut u32,
) -> Result<SequenceItem, SequenceFileError> {
    let item_id = *next_id;
    *next_id += 1;

    if raw.kind == "loop" {
        let sweep = match &raw.sweep {
            Some(raw_sweep) => compile_sweep(raw_sweep),
            None => {
                return Err(SequenceFileError::MissingSweep {
                    path: path.to_string(),
                })
            }
        };
        sweep
            .validate()
            .map_err(|source| SequenceFileError::InvalidSweep {
                path: path.to_string(),
                source,
            })?;

        let mut children = Vec::with_capacity(raw.children.len());
        for (index, child) in raw.children.iter().enumerate() {
            let child_path = format!("{}.children[{}]", path, index);
            children.push(compile_item(child, &child_path, next_id)?);
        }

        let display_name = raw.display_name.clone().unwrap_or_else(|| {
            match &raw.variable {
                Some(name) => format!("loop {}", name),
                None => "loop".to_string(),
            }
        });
        return Ok(SequenceItem::Loop(super::item::LoopItem {
            item_id,
            display_name,
            variable: raw.variable.clone(),
            sweep,
            children,
        }));
    }

    if !raw.children.is_empty() {
        return Err(SequenceFileError::UnexpectedChildren {
            path: path.to_string(),
            kind: raw.kind.clone(),
        });
    }
    if raw.sweep.is_some() {
        return Err(SequenceFileError::UnexpectedSweep {
            path: path.to_string(),
            kind: raw.kind.clone(),
        });
    }

    let action = compile_action(raw, path)?;
    let display_name = raw
        .display_name
        .clone()
        .unwrap_or_else(|| action.kind_name().to_string());
    Ok(SequenceItem::Simple(super::item::ActionItem {
        item_id,
        display_name,
        action,
    }))
}

fn compile_sweep(raw: &RawSweep) -> SweepSpec {
    match raw {
        RawSweep::NumericRange { start, stop, step } => SweepSpec::NumericRange {
            start: *start,
            stop: *stop,
            step: *step,
        },
        RawSweep::ValueList { values } => SweepSpec::ValueList {
            values: values.iter().map(raw_to_value).collect(),
        },
        RawSweep::FixedCount { count } => SweepSpec::FixedCount { count: *count },
    }
}

/// Sweep list entries are always literals; `{NAME}` has no meaning in
/// a loop's own value list.
fn raw_to_value(raw: &RawValue) -> Value {
    match raw {
        RawValue::Int(i) => Value::Number(*i as f64),
        RawValue::Float(f) => Value::Number(*f),
        RawValue::Text(text) => Value::Text(text.clone()),
    }
}

fn compile_action(raw: &RawItem, path: &str) -> Result<Action, SequenceFileError> {
    let kind = raw.kind.as_str();
    match kind {
        "register-write-by-name" => Ok(Action::RegisterWrite {
            field: param(&raw.field, path, "register-write-by-name", "field")?,
            value: param(&raw.value, path, "register-write-by-name", "value")?,
        }),
        "register-write-by-address" => Ok(Action::AddressWrite {
            address: param(&raw.address, path, "register-write-by-address", "address")?,
            value: param(&raw.value, path, "register-write-by-address", "value")?,
        }),
        "register-read-by-name" => Ok(Action::RegisterRead {
            field: param(&raw.field, path, "register-read-by-name", "field")?,
            variable: raw.variable.clone(),
        }),
        "register-read-by-address" => Ok(Action::AddressRead {
            address: param(&raw.address, path, "register-read-by-address", "address")?,
            variable: raw.variable.clone(),
        }),
        "delay-seconds" => Ok(Action::Delay {
            seconds: param(&raw.seconds, path, "delay-seconds", "seconds")?,
        }),
        "dmm-measure-voltage" => Ok(Action::DmmMeasure {
            quantity: Quantity::Voltage,
            variable: raw.variable.clone(),
        }),
        "dmm-measure-current" => Ok(Action::DmmMeasure {
            quantity: Quantity::Current,
            variable: raw.variable.clone(),
        }),
        "dmm-set-terminal" => Ok(Action::DmmSetTerminal {
            terminal: terminal_param(raw, path, "dmm-set-terminal")?,
        }),
        "smu-set-voltage" => Ok(Action::SmuSetLevel {
            quantity: Quantity::Voltage,
            level: param(&raw.level, path, "smu-set-voltage", "level")?,
        }),
        "smu-set-current" => Ok(Action::SmuSetLevel {
            quantity: Quantity::Current,
            level: param(&raw.level, path, "smu-set-current", "level")?,
        }),
        "smu-measure-voltage" => Ok(Action::SmuMeasure {
            quantity: Quantity::Voltage,
            variable: raw.variable.clone(),
        }),
        "smu-measure-current" => Ok(Action::SmuMeasure {
            quantity: Quantity::Current,
            variable: raw.variable.clone(),
        }),
        "smu-enable-output" => match raw.on {
            Some(on) => Ok(Action::SmuEnableOutput { on }),
            None => Err(SequenceFileError::MissingParameter {
                path: path.to_string(),
                kind: "smu-enable-output",
                param: "on",
            }),
        },
        "smu-configure-and-enable" => {
            let source_text = raw.source.as_deref().ok_or_else(|| {
                SequenceFileError::MissingParameter {
                    path: path.to_string(),
                    kind: "smu-configure-and-enable",
                    param: "source",
                }
            })?;
            let source = Quantity::parse(source_text).ok_or_else(|| {
                SequenceFileError::InvalidQuantity {
                    path: path.to_string(),
                    kind: "smu-configure-and-enable",
                    text: source_text.to_string(),
                }
            })?;
            Ok(Action::SmuConfigureAndEnable {
                source,
                level: param(&raw.level, path, "smu-configure-and-enable", "level")?,
                protection_current: param(
                    &raw.protection_current,
                    path,
                    "smu-configure-and-enable",
                    "protection_current",
                )?,
            })
        }
        "smu-set-terminal" => Ok(Action::SmuSetTerminal {
            terminal: terminal_param(raw, path, "smu-set-terminal")?,
        }),
        "smu-set-protection-current" => Ok(Action::SmuSetProtectionCurrent {
            amps: param(
                &raw.protection_current,
                path,
                "smu-set-protection-current",
                "protection_current",
            )?,
        }),
        "chamber-set-temperature" => Ok(Action::ChamberSetTemperature {
            celsius: param(&raw.celsius, path, "chamber-set-temperature", "celsius")?,
        }),
        "chamber-check-temperature-stable" => Ok(Action::ChamberWaitStable {
            target: param(
                &raw.target,
                path,
                "chamber-check-temperature-stable",
                "target",
            )?,
            tolerance: opt_param(
                &raw.tolerance,
                path,
                "chamber-check-temperature-stable",
                "tolerance",
                DEFAULT_STABILITY_TOLERANCE_C,
            )?,
            timeout_s: opt_param(
                &raw.timeout_s,
                path,
                "chamber-check-temperature-stable",
                "timeout_s",
                DEFAULT_STABILITY_TIMEOUT_S,
            )?,
        }),
        "hold" => Ok(Action::Hold {
            prompt: raw
                .prompt
                .clone()
                .unwrap_or_else(|| "operator acknowledgement required".to_string()),
        }),
        _ => Err(SequenceFileError::UnknownActionKind {
            path: path.to_string(),
            kind: raw.kind.clone(),
        }),
    }
}

/// Convert a required raw parameter, resolving placeholder syntax.
fn param(
    raw: &Option<RawValue>,
    path: &str,
    kind: &'static str,
    name: &'static str,
) -> Result<ParamValue, SequenceFileError> {
    match raw {
        Some(value) => convert_param(value, path, kind, name),
        None => Err(SequenceFileError::MissingParameter {
            path: path.to_string(),
            kind,
            param: name,
        }),
    }
}

/// Convert an optional raw parameter, falling back to a default.
fn opt_param(
    raw: &Option<RawValue>,
    path: &str,
    kind: &'static str,
    name: &'static str,
    default: f64,
) -> Result<ParamValue, SequenceFileError> {
    match raw {
        Some(value) => convert_param(value, path, kind, name),
        None => Ok(ParamValue::Literal(Value::Number(default))),
    }
}

fn convert_param(
    raw: &RawValue,
    path: &str,
    kind: &'static str,
    name: &'static str,
) -> Result<ParamValue, SequenceFileError> {
    match raw {
        RawValue::Int(i) => Ok(ParamValue::Literal(Value::Number(*i as f64))),
        RawValue::Float(f) => Ok(ParamValue::Literal(Value::Number(*f))),
        RawValue::Text(text) => {
            if let Some(captures) = PLACEHOLDER.captures(text) {
                if let Some(variable) = captures.get(1) {
                    return Ok(ParamValue::LoopRef(variable.as_str().to_string()));
                }
            }
            // Any brace that survived the placeholder check marks a
            // mangled reference, not a literal.
            if text.contains('{') || text.contains('}') {
                return Err(SequenceFileError::MalformedPlaceholder {
                    path: path.to_string(),
                    kind,
                    param: name,
                    text: text.clone(),
                });
            }
            Ok(ParamValue::Literal(Value::Text(text.clone())))
        }
    }
}

fn terminal_param(
    raw: &RawItem,
    path: &str,
    kind: &'static str,
) -> Result<Terminal, SequenceFileError> {
    let text = raw
        .terminal
        .as_deref()
        .ok_or_else(|| SequenceFileError::MissingParameter {
            path: path.to_string(),
            kind,
            param: "terminal",
        })?;
    Terminal::parse(text).ok_or_else(|| SequenceFileError::InvalidTerminal {
        path: path.to_string(),
        kind,
        text: text.to_string(),
    })
}
