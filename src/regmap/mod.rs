//! Register map engine: logical fields over 8-bit register addresses.
//!
//! Evaluation benches talk to a chip through small registers, but the
//! quantities engineers care about rarely fit one byte. This module
//! models named logical fields that may span several addresses or
//! share one, and keeps two byte mirrors (reset-state and current) in
//! sync with the device through a plan/confirm write protocol.
//!
//! # Example
//!
//! ```
//! use evalbench::regmap::{MapDescription, RegisterMap, ValueSource};
//!
//! let desc = MapDescription::from_toml_str(r#"
//!     [map]
//!     min_address = "0x0000"
//!     max_address = "0x00FF"
//!
//!     [[field]]
//!     id = "CTRL_REG"
//!     length = 8
//!     reset = "0xAB"
//!     access = "read-write"
//!     regions = [{ address = "0x0000", bit_offset = 0, bit_width = 8 }]
//! "#).unwrap();
//!
//! let mut map = RegisterMap::load(&desc).unwrap();
//! assert_eq!(map.field_value("CTRL_REG", ValueSource::Initial).unwrap(), 0xAB);
//!
//! // Plan, write on the wire, then confirm what succeeded.
//! let plan = map.plan_field_write("CTRL_REG", 0x55).unwrap();
//! map.confirm(&plan.ops);
//! assert_eq!(map.field_value("CTRL_REG", ValueSource::Current).unwrap(), 0x55);
//! ```

pub mod description;
pub mod field;
pub mod map;
pub mod overrides;

pub use description::{parse_auto, parse_hex, FieldDecl, MapDescription, MapMetadata, RegionDecl};
pub use field::{AccessMode, LogicalField, RegionMapping};
pub use map::{
    LayoutSlot, LoadError, LoadReport, RegisterError, RegisterMap, ValueSource, WriteOp, WritePlan,
};
pub use overrides::{
    parse_override_file, parse_overrides, OverrideEntry, OverrideError, OverrideStats,
};
