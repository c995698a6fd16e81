//! Shared scenario fixtures for tests and dry runs.
//!
//! This module carries a small built-in register map and sequence so
//! integration tests and the CLI's `--dry-run` mode exercise the same
//! well-understood scenario:
//!
//! - `CTRL_REG`: one full read-write byte at 0x0000, reset 0xAB.
//! - `ENABLE_BIT`: a single bit at the top of 0x0001.
//! - `MULTI_BYTE_FIELD`: 12 bits split across 0x0002 (bits 11..4) and
//!   the high nibble of 0x0003 (bits 3..0), reset 0xABC.
//! - `STATUS_FLAGS`: a read-only nibble at 0x0004.
//!
//! [`sim_context`] seeds a simulated bench from a map's reset bytes,
//! so a fresh run observes the same state a powered-on chip would
//! present.

use anyhow::Context;

use crate::hardware::sim::{SimChamber, SimI2cDevice, SimMultimeter, SimSourcemeter, WireLog};
use crate::hardware::TestContext;
use crate::regmap::{MapDescription, RegisterMap, ValueSource};
use crate::sequence::Sequence;

/// Built-in register map used by tests and dry runs.
pub const SAMPLE_MAP: &str = r#"
[map]
name = "sample chip"
min_address = "0x0000"
max_address = "0x00FF"

[[field]]
id = "CTRL_REG"
length = 8
reset = "0xAB"
access = "read-write"
description = "main control byte"
regions = [{ address = "0x0000", bit_offset = 0, bit_width = 8 }]

[[field]]
id = "ENABLE_BIT"
length = 1
reset = "0x1"
access = "read-write"
regions = [{ address = "0x0001", bit_offset = 7, bit_width = 1 }]

[[field]]
id = "MULTI_BYTE_FIELD"
length = 12
reset = "0xABC"
access = "read-write"
description = "wide setting split across two addresses"
regions = [
    { address = "0x0002", bit_offset = 0, bit_width = 8 },
    { address = "0x0003", bit_offset = 4, bit_width = 4 },
]

[[field]]
id = "STATUS_FLAGS"
length = 4
reset = "0x0"
access = "read-only"
regions = [{ address = "0x0004", bit_offset = 0, bit_width = 4 }]
"#;

/// Built-in sequence used by tests and dry runs. Sweeps a field write
/// with SMU readback, then reads the field back.
pub const SAMPLE_SEQUENCE: &str = r#"
name = "sample bring-up"

[[items]]
kind = "smu-configure-and-enable"
source = "voltage"
level = 1.8
protection_current = 0.1

[[items]]
kind = "register-write-by-name"
field = "CTRL_REG"
value = "0x55"

[[items]]
kind = "loop"
variable = "STEP"
sweep = { type = "numeric-range", start = 1, stop = 3, step = 1 }

    [[items.children]]
    kind = "register-write-by-name"
    field = "MULTI_BYTE_FIELD"
    value = "{STEP}"

    [[items.children]]
    kind = "smu-measure-current"
    variable = "IDD"

[[items]]
kind = "register-read-by-name"
field = "MULTI_BYTE_FIELD"
"#;

/// Load the built-in sample map.
pub fn sample_map() -> anyhow::Result<RegisterMap> {
    let desc = MapDescription::from_toml_str(SAMPLE_MAP)
        .context("built-in sample map does not parse")?;
    RegisterMap::load(&desc)
        .map_err(|report| anyhow::anyhow!("built-in sample map does not load: {}", report))
}

/// Load the built-in sample sequence.
pub fn sample_sequence() -> anyhow::Result<Sequence> {
    Sequence::from_toml_str(SAMPLE_SEQUENCE)
        .map_err(|e| anyhow::anyhow!("built-in sample sequence does not load: {}", e))
}

/// Reset-state bytes for seeding a simulated device from a map.
pub fn reset_bytes(map: &RegisterMap) -> Vec<(u16, u8)> {
    map.addresses()
        .map(|address| (address, map.byte(address, ValueSource::Initial).unwrap_or(0)))
        .collect()
}

/// A fully stocked simulated bench whose register file matches the
/// map's reset state, plus a handle on its I2C write log.
pub fn sim_context(map: &RegisterMap) -> (TestContext, WireLog) {
    let i2c = SimI2cDevice::with_registers(reset_bytes(map));
    let wire = i2c.write_log();
    let context = TestContext::builder()
        .i2c(i2c)
        .multimeter(SimMultimeter::new())
        .sourcemeter(SimSourcemeter::new())
        .chamber(SimChamber::new(25.0))
        .build();
    (context, wire)
}
