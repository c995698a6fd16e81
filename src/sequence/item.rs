//! The sequence tree: loops over actions.
//!
//! A sequence is an ordered list of items. Each item is either a
//! simple action (one bench operation) or a loop that runs its
//! children once per sweep point:
//!
//! ```text
//! loop TEMP over 25..85 step 20
//! ├── chamber-set-temperature {TEMP}
//! ├── chamber-check-temperature-stable
//! └── loop VDD over [1.62, 1.8, 1.98]
//!     ├── smu-set-voltage {VDD}
//!     └── register-read-by-name VDD_READ
//! ```
//!
//! Loops nest without limit. Parameters written as `{NAME}` in the
//! sequence file become [`ParamValue::LoopRef`] at load time and are
//! resolved against enclosing loop bindings during execution, never by
//! string substitution.

use crate::events::Value;
use crate::hardware::{Quantity, Terminal};

use super::sweep::SweepSpec;

/// An action parameter: fixed at authoring time, or a reference to an
/// enclosing loop's variable resolved when the action runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Literal(Value),
    LoopRef(String),
}

impl ParamValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        ParamValue::Literal(value.into())
    }

    pub fn loop_ref(name: impl Into<String>) -> Self {
        ParamValue::LoopRef(name.into())
    }
}

/// Everything a simple item can do. The set is closed: dispatch is an
/// exhaustive match, and unknown kinds are rejected at load time.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write a logical field by name through the plan/confirm protocol.
    RegisterWrite { field: ParamValue, value: ParamValue },
    /// Write one raw byte to a mapped address.
    AddressWrite { address: ParamValue, value: ParamValue },
    /// Read a logical field back from the device and record it.
    RegisterRead {
        field: ParamValue,
        /// Report column; defaults to the field name.
        variable: Option<String>,
    },
    /// Read one raw byte from the device and record it.
    AddressRead {
        address: ParamValue,
        variable: Option<String>,
    },
    /// Pause for a number of seconds, interruptible by cancellation.
    Delay { seconds: ParamValue },
    /// Take a multimeter reading and record it.
    DmmMeasure {
        quantity: Quantity,
        variable: Option<String>,
    },
    DmmSetTerminal { terminal: Terminal },
    /// Program the SMU source level for one quantity.
    SmuSetLevel { quantity: Quantity, level: ParamValue },
    /// Take an SMU readback measurement and record it.
    SmuMeasure {
        quantity: Quantity,
        variable: Option<String>,
    },
    SmuEnableOutput { on: bool },
    /// Program level and compliance, then switch the output on.
    SmuConfigureAndEnable {
        source: Quantity,
        level: ParamValue,
        protection_current: ParamValue,
    },
    SmuSetTerminal { terminal: Terminal },
    SmuSetProtectionCurrent { amps: ParamValue },
    /// Command a chamber target temperature (does not wait).
    ChamberSetTemperature { celsius: ParamValue },
    /// Poll the chamber until within tolerance of target or timeout.
    ChamberWaitStable {
        target: ParamValue,
        tolerance: ParamValue,
        timeout_s: ParamValue,
    },
    /// Park until the operator acknowledges.
    Hold { prompt: String },
}

impl Action {
    /// The stable kind string used by sequence files and logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Action::RegisterWrite { .. } => "register-write-by-name",
            Action::AddressWrite { .. } => "register-write-by-address",
            Action::RegisterRead { .. } => "register-read-by-name",
            Action::AddressRead { .. } => "register-read-by-address",
            Action::Delay { .. } => "delay-seconds",
            Action::DmmMeasure {
                quantity: Quantity::Voltage,
                ..
            } => "dmm-measure-voltage",
            Action::DmmMeasure {
                quantity: Quantity::Current,
                ..
            } => "dmm-measure-current",
            Action::DmmSetTerminal { .. } => "dmm-set-terminal",
            Action::SmuSetLevel {
                quantity: Quantity::Voltage,
                ..
            } => "smu-set-voltage",
            Action::SmuSetLevel {
                quantity: Quantity::Current,
                ..
            } => "smu-set-current",
            Action::SmuMeasure {
                quantity: Quantity::Voltage,
                ..
            } => "smu-measure-voltage",
            Action::SmuMeasure {
                quantity: Quantity::Current,
                ..
            } => "smu-measure-current",
            Action::SmuEnableOutput { .. } => "smu-enable-output",
            Action::SmuConfigureAndEnable { .. } => "smu-configure-and-enable",
            Action::SmuSetTerminal { .. } => "smu-set-terminal",
            Action::SmuSetProtectionCurrent { .. } => "smu-set-protection-current",
            Action::ChamberSetTemperature { .. } => "chamber-set-temperature",
            Action::ChamberWaitStable { .. } => "chamber-check-temperature-stable",
            Action::Hold { .. } => "hold",
        }
    }
}

/// A leaf of the sequence tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionItem {
    /// Unique within one sequence; assigned by the loader.
    pub item_id: u32,
    /// Label shown in logs and progress views.
    pub display_name: String,
    pub action: Action,
}

/// An interior node: a sweep applied to a child list.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopItem {
    pub item_id: u32,
    pub display_name: String,
    /// Name children may reference as `{NAME}`; optional for loops
    /// that only repeat.
    pub variable: Option<String>,
    pub sweep: SweepSpec,
    pub children: Vec<SequenceItem>,
}

/// One node of the sequence tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceItem {
    Simple(ActionItem),
    Loop(LoopItem),
}

impl SequenceItem {
    /// Leaf with the kind string as its display name.
    pub fn simple(item_id: u32, action: Action) -> Self {
        let display_name = action.kind_name().to_string();
        SequenceItem::Simple(ActionItem {
            item_id,
            display_name,
            action,
        })
    }

    /// Leaf with an explicit display name.
    pub fn simple_named(item_id: u32, display_name: impl Into<String>, action: Action) -> Self {
        SequenceItem::Simple(ActionItem {
            item_id,
            display_name: display_name.into(),
            action,
        })
    }

    /// Loop node binding `variable` over `sweep`.
    pub fn repeat(
        item_id: u32,
        variable: Option<&str>,
        sweep: SweepSpec,
        children: Vec<SequenceItem>,
    ) -> Self {
        let display_name = match variable {
            Some(name) => format!("loop {}", name),
            None => "loop".to_string(),
        };
        SequenceItem::Loop(LoopItem {
            item_id,
            display_name,
            variable: variable.map(str::to_string),
            sweep,
            children,
        })
    }

    pub fn item_id(&self) -> u32 {
        match self {
            SequenceItem::Simple(item) => item.item_id,
            SequenceItem::Loop(item) => item.item_id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            SequenceItem::Simple(item) => &item.display_name,
            SequenceItem::Loop(item) => &item.display_name,
        }
    }

    /// Simple actions in this subtree, before sweep expansion.
    pub fn action_count(&self) -> usize {
        match self {
            SequenceItem::Simple(_) => 1,
            SequenceItem::Loop(item) => item.children.iter().map(SequenceItem::action_count).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        let action = Action::DmmMeasure {
            quantity: Quantity::Voltage,
            variable: None,
        };
        assert_eq!(action.kind_name(), "dmm-measure-voltage");

        let action = Action::SmuSetLevel {
            quantity: Quantity::Current,
            level: ParamValue::literal(0.01),
        };
        assert_eq!(action.kind_name(), "smu-set-current");

        let action = Action::ChamberWaitStable {
            target: ParamValue::literal(85.0),
            tolerance: ParamValue::literal(1.0),
            timeout_s: ParamValue::literal(600.0),
        };
        assert_eq!(action.kind_name(), "chamber-check-temperature-stable");
    }

    #[test]
    fn test_simple_defaults_display_name_to_kind() {
        let item = SequenceItem::simple(
            1,
            Action::Delay {
                seconds: ParamValue::literal(0.1),
            },
        );
        assert_eq!(item.display_name(), "delay-seconds");
        assert_eq!(item.item_id(), 1);
    }

    #[test]
    fn test_action_count_ignores_sweep_multiplicity() {
        let tree = SequenceItem::repeat(
            1,
            Some("X"),
            SweepSpec::FixedCount { count: 10 },
            vec![
                SequenceItem::simple(
                    2,
                    Action::Delay {
                        seconds: ParamValue::literal(0.1),
                    },
                ),
                SequenceItem::repeat(
                    3,
                    None,
                    SweepSpec::FixedCount { count: 3 },
                    vec![SequenceItem::simple(
                        4,
                        Action::Hold {
                            prompt: "check probe".to_string(),
                        },
                    )],
                ),
            ],
        );
        assert_eq!(tree.action_count(), 2);
    }
}
