//! Register map engine: compiled field model, value mirrors, and the
//! plan/confirm write protocol.
//!
//! # Loading
//!
//! [`RegisterMap::load`] compiles a [`MapDescription`] into an
//! immutable field model plus two mutable byte mirrors:
//!
//! - `initial`: every mapped address reconstructed from field reset
//!   values (the OR of each field's masked region contribution).
//! - `current`: the engine's belief about the device, seeded from
//!   `initial` and updated only by confirmed writes and overrides.
//!
//! Loading is atomic: every semantic problem in the description (bad
//! hex, out-of-range regions, width mismatches, bit overlaps) is
//! collected into one [`LoadReport`] and no partial map is produced.
//!
//! # Plan / confirm
//!
//! Writes are split in two so transport failures cannot desynchronize
//! the mirror:
//!
//! ```text
//! plan_field_write("CTRL", 0x55) ──> WritePlan [0x0000 <= 0x55]
//!         │                                  │ caller performs I2C writes
//!         └── mirror untouched               ▼
//! confirm(&ops_that_succeeded)    ──> current mirror updated
//! ```
//!
//! Plans carry only bytes that would actually change, so re-writing a
//! field to its present value is a no-op on the bus.

use std::collections::BTreeMap;
use std::fmt;

use log::{trace, warn};
use smallvec::SmallVec;
use thiserror::Error;

use super::description::{parse_hex, MapDescription};
use super::field::{AccessMode, LogicalField, RegionMapping};

/// Which mirror a value query reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    /// Reset-state reconstruction, fixed at load time.
    Initial,
    /// Live mirror of the device, advanced by confirmed writes.
    Current,
}

/// A single byte write the caller should perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOp {
    pub address: u16,
    pub value: u8,
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X} <= 0x{:02X}", self.address, self.value)
    }
}

/// Ordered byte writes realizing one logical write, lowest address
/// first. Empty when the device already holds the requested value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WritePlan {
    pub ops: Vec<WriteOp>,
}

impl WritePlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// One field's claim on part of an address, for per-address views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutSlot {
    pub field_id: String,
    /// Lowest claimed bit within the byte.
    pub local_lsb: u8,
    /// Highest claimed bit within the byte.
    pub local_msb: u8,
}

/// A semantic problem found while compiling a map description.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("map metadata: {what} '{text}' is not a valid hex address")]
    BadMetadataHex { what: &'static str, text: String },
    #[error("map metadata: min address 0x{min:04X} is above max address 0x{max:04X}")]
    WindowInverted { min: u16, max: u16 },
    #[error("field '{field}' is declared more than once")]
    DuplicateField { field: String },
    #[error("field '{field}': length must be greater than zero")]
    ZeroLength { field: String },
    #[error("field '{field}': length {length} exceeds the 64-bit value model")]
    UnsupportedLength { field: String, length: u32 },
    #[error("field '{field}': unknown access mode '{text}'")]
    BadAccess { field: String, text: String },
    #[error("field '{field}': {what} '{text}' is not valid hex")]
    BadHex {
        field: String,
        what: &'static str,
        text: String,
    },
    #[error("field '{field}': declares no regions")]
    NoRegions { field: String },
    #[error("field '{field}': region address 0x{address:X} is outside 0x{min:04X}..=0x{max:04X}")]
    AddressOutOfRange {
        field: String,
        address: u64,
        min: u16,
        max: u16,
    },
    #[error("field '{field}': region at 0x{address:04X} has bit offset {bit_offset}, expected 0..=7")]
    BitOffsetOutOfRange {
        field: String,
        address: u16,
        bit_offset: u8,
    },
    #[error("field '{field}': region at 0x{address:04X} has bit width {bit_width}, expected 1..=8")]
    BitWidthOutOfRange {
        field: String,
        address: u16,
        bit_width: u8,
    },
    #[error(
        "field '{field}': region at 0x{address:04X} runs past bit 7 \
         (offset {bit_offset} + width {bit_width})"
    )]
    RegionPastByte {
        field: String,
        address: u16,
        bit_offset: u8,
        bit_width: u8,
    },
    #[error("field '{field}': regions cover {covered} bits but length is {length}")]
    LengthMismatch {
        field: String,
        covered: u32,
        length: u32,
    },
    #[error("field '{field}': reset value 0x{value:X} is wider than {length} bits")]
    ResetExceedsWidth {
        field: String,
        value: u64,
        length: u32,
    },
    #[error("address 0x{address:04X} bit {bit}: claimed by both '{first}' and '{second}'")]
    BitOverlap {
        address: u16,
        bit: u8,
        first: String,
        second: String,
    },
}

/// Everything wrong with a map description, reported in one pass.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub errors: Vec<LoadError>,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "map description rejected with {} error(s):",
            self.errors.len()
        )?;
        for error in &self.errors {
            writeln!(f, "  - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for LoadReport {}

/// Runtime lookup failures against a loaded map.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("no field named '{0}' in the register map")]
    FieldNotFound(String),
    #[error("address 0x{0:04X} is not mapped by any field")]
    AddressNotMapped(u16),
}

/// Compiled register map plus its value mirrors.
#[derive(Debug, Clone)]
pub struct RegisterMap {
    name: Option<String>,
    min_address: u16,
    max_address: u16,
    fields: BTreeMap<String, LogicalField>,
    /// Per-address field claims, sorted by local LSB.
    layout: BTreeMap<u16, Vec<LayoutSlot>>,
    initial_values: BTreeMap<u16, u8>,
    current_values: BTreeMap<u16, u8>,
}

impl RegisterMap {
    /// Compile a description into a usable map.
    ///
    /// All semantic errors in the description are accumulated; on any
    /// error the whole load fails and the report lists every problem.
    pub fn load(desc: &MapDescription) -> Result<Self, LoadReport> {
        let mut errors: Vec<LoadError> = Vec::new();

        let min = parse_metadata_address(&desc.map.min_address, "min address", &mut errors);
        let max = parse_metadata_address(&desc.map.max_address, "max address", &mut errors);
        let window = match (min, max) {
            (Some(lo), Some(hi)) if lo > hi => {
                errors.push(LoadError::WindowInverted { min: lo, max: hi });
                None
            }
            (Some(lo), Some(hi)) => Some((lo, hi)),
            _ => None,
        };

        let mut fields: BTreeMap<String, LogicalField> = BTreeMap::new();
        for decl in &desc.fields {
            if fields.contains_key(&decl.id) {
                errors.push(LoadError::DuplicateField {
                    field: decl.id.clone(),
                });
                continue;
            }
            if let Some(field) = compile_field(decl, window, &mut errors) {
                fields.insert(field.id.clone(), field);
            }
        }

        let mut layout: BTreeMap<u16, Vec<LayoutSlot>> = BTreeMap::new();
        {
            // Per-address bit ownership, used only to detect overlaps.
            let mut claims: BTreeMap<u16, [Option<&str>; 8]> = BTreeMap::new();
            for field in fields.values() {
                for region in &field.regions {
                    let byte_claims = claims.entry(region.address).or_insert([None; 8]);
                    let mut clash: Option<(&str, u8)> = None;
                    let run = region.local_bit_offset..region.local_bit_offset + region.local_bit_width;
                    for bit in run {
                        match byte_claims[bit as usize] {
                            Some(owner) => {
                                if clash.is_none() {
                                    clash = Some((owner, bit));
                                }
                            }
                            None => byte_claims[bit as usize] = Some(field.id.as_str()),
                        }
                    }
                    if let Some((owner, bit)) = clash {
                        errors.push(LoadError::BitOverlap {
                            address: region.address,
                            bit,
                            first: owner.to_string(),
                            second: field.id.clone(),
                        });
                    }
                    layout.entry(region.address).or_default().push(LayoutSlot {
                        field_id: field.id.clone(),
                        local_lsb: region.local_bit_offset,
                        local_msb: region.local_bit_offset + region.local_bit_width - 1,
                    });
                }
            }
        }
        for slots in layout.values_mut() {
            slots.sort_by_key(|slot| slot.local_lsb);
        }

        if !errors.is_empty() {
            return Err(LoadReport { errors });
        }

        let mut initial_values: BTreeMap<u16, u8> = BTreeMap::new();
        for field in fields.values() {
            let masked = field.reset_value & field.value_mask();
            for region in &field.regions {
                *initial_values.entry(region.address).or_insert(0) |= region.insert(0, masked);
            }
        }
        let current_values = initial_values.clone();

        let (min_address, max_address) = window.unwrap_or((0, u16::MAX));
        trace!(
            "register map loaded: {} fields over {} addresses",
            fields.len(),
            initial_values.len()
        );
        Ok(Self {
            name: desc.map.name.clone(),
            min_address,
            max_address,
            fields,
            layout,
            initial_values,
            current_values,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Legal address window declared by the description.
    pub fn address_window(&self) -> (u16, u16) {
        (self.min_address, self.max_address)
    }

    pub fn field(&self, id: &str) -> Result<&LogicalField, RegisterError> {
        self.fields
            .get(id)
            .ok_or_else(|| RegisterError::FieldNotFound(id.to_string()))
    }

    pub fn fields(&self) -> impl Iterator<Item = &LogicalField> {
        self.fields.values()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Addresses covered by at least one field, ascending.
    pub fn addresses(&self) -> impl Iterator<Item = u16> + '_ {
        self.layout.keys().copied()
    }

    pub fn is_mapped(&self, address: u16) -> bool {
        self.layout.contains_key(&address)
    }

    /// Field claims on one address, sorted by local LSB.
    pub fn layout_at(&self, address: u16) -> Option<&[LayoutSlot]> {
        self.layout.get(&address).map(Vec::as_slice)
    }

    /// Raw mirror byte for an address, if the address is mapped.
    pub fn byte(&self, address: u16, source: ValueSource) -> Option<u8> {
        self.mirror(source).get(&address).copied()
    }

    /// Reassemble a field's value from one of the mirrors.
    ///
    /// Regions are concatenated by field position; addresses missing
    /// from the mirror contribute zero bits.
    pub fn field_value(&self, id: &str, source: ValueSource) -> Result<u64, RegisterError> {
        let field = self.field(id)?;
        let bytes = self.mirror(source);
        let mut value = 0u64;
        for region in &field.regions {
            let byte = bytes.get(&region.address).copied().unwrap_or(0);
            value |= region.extract(byte);
        }
        Ok(value & field.value_mask())
    }

    /// Stage a field write against the current mirror.
    ///
    /// `value` is masked to the field's width. Each affected address
    /// is read-modify-written so co-resident fields keep their bits,
    /// and addresses whose byte would not change are omitted. The
    /// mirror itself is not touched; see [`confirm`].
    ///
    /// [`confirm`]: RegisterMap::confirm
    pub fn plan_field_write(&self, id: &str, value: u64) -> Result<WritePlan, RegisterError> {
        let field = self.field(id)?;
        let masked = value & field.value_mask();

        // A field may own several runs of the same byte, so stage per
        // address before diffing against the mirror.
        let mut staged: BTreeMap<u16, u8> = BTreeMap::new();
        for region in &field.regions {
            let base = *staged
                .entry(region.address)
                .or_insert_with(|| self.current_values.get(&region.address).copied().unwrap_or(0));
            staged.insert(region.address, region.insert(base, masked));
        }

        let ops = staged
            .into_iter()
            .filter(|(address, byte)| {
                self.current_values.get(address).copied().unwrap_or(0) != *byte
            })
            .map(|(address, value)| WriteOp { address, value })
            .collect();
        Ok(WritePlan { ops })
    }

    /// Stage a whole-byte write to a mapped address.
    pub fn plan_address_write(&self, address: u16, value: u8) -> Result<WritePlan, RegisterError> {
        if !self.is_mapped(address) {
            return Err(RegisterError::AddressNotMapped(address));
        }
        let current = self.current_values.get(&address).copied().unwrap_or(0);
        let ops = if current == value {
            Vec::new()
        } else {
            vec![WriteOp { address, value }]
        };
        Ok(WritePlan { ops })
    }

    /// Fold completed byte writes into the current mirror.
    ///
    /// Callers pass exactly the ops that succeeded on the wire, which
    /// may be a prefix of a plan if the transport failed part-way.
    /// Idempotent: confirming the same ops again changes nothing.
    pub fn confirm(&mut self, ops: &[WriteOp]) {
        for op in ops {
            match self.current_values.get_mut(&op.address) {
                Some(byte) => {
                    trace!("confirm {}", op);
                    *byte = op.value;
                }
                None => warn!("confirm for unmapped address 0x{:04X} ignored", op.address),
            }
        }
    }

    fn mirror(&self, source: ValueSource) -> &BTreeMap<u16, u8> {
        match source {
            ValueSource::Initial => &self.initial_values,
            ValueSource::Current => &self.current_values,
        }
    }
}

fn parse_metadata_address(
    text: &str,
    what: &'static str,
    errors: &mut Vec<LoadError>,
) -> Option<u16> {
    match parse_hex(text) {
        Some(value) if value <= u16::MAX as u64 => Some(value as u16),
        _ => {
            errors.push(LoadError::BadMetadataHex {
                what,
                text: text.to_string(),
            });
            None
        }
    }
}

/// Validate one field declaration, pushing every problem found.
/// Returns the compiled field only when the declaration was clean.
fn compile_field(
    decl: &super::description::FieldDecl,
    window: Option<(u16, u16)>,
    errors: &mut Vec<LoadError>,
) -> Option<LogicalField> {
    let before = errors.len();
    let field = || decl.id.clone();

    if decl.length == 0 {
        errors.push(LoadError::ZeroLength { field: field() });
    } else if decl.length > 64 {
        errors.push(LoadError::UnsupportedLength {
            field: field(),
            length: decl.length,
        });
    }

    let access = AccessMode::parse(&decl.access).unwrap_or_else(|| {
        errors.push(LoadError::BadAccess {
            field: field(),
            text: decl.access.clone(),
        });
        AccessMode::ReadWrite
    });

    let reset_value = parse_hex(&decl.reset_value).unwrap_or_else(|| {
        errors.push(LoadError::BadHex {
            field: field(),
            what: "reset value",
            text: decl.reset_value.clone(),
        });
        0
    });

    if decl.regions.is_empty() {
        errors.push(LoadError::NoRegions { field: field() });
    }

    let mut slots: Vec<(u16, u8, u8)> = Vec::new();
    for region in &decl.regions {
        let mut usable = true;

        let address = match parse_hex(&region.address) {
            Some(value) if value <= u16::MAX as u64 => value as u16,
            Some(value) => {
                let (min, max) = window.unwrap_or((0, u16::MAX));
                errors.push(LoadError::AddressOutOfRange {
                    field: field(),
                    address: value,
                    min,
                    max,
                });
                usable = false;
                0
            }
            None => {
                errors.push(LoadError::BadHex {
                    field: field(),
                    what: "region address",
                    text: region.address.clone(),
                });
                usable = false;
                0
            }
        };

        if region.bit_offset > 7 {
            errors.push(LoadError::BitOffsetOutOfRange {
                field: field(),
                address,
                bit_offset: region.bit_offset,
            });
            usable = false;
        }
        if region.bit_width == 0 || region.bit_width > 8 {
            errors.push(LoadError::BitWidthOutOfRange {
                field: field(),
                address,
                bit_width: region.bit_width,
            });
            usable = false;
        } else if usable && region.bit_offset + region.bit_width > 8 {
            errors.push(LoadError::RegionPastByte {
                field: field(),
                address,
                bit_offset: region.bit_offset,
                bit_width: region.bit_width,
            });
            usable = false;
        }

        if usable {
            if let Some((min, max)) = window {
                if address < min || address > max {
                    errors.push(LoadError::AddressOutOfRange {
                        field: field(),
                        address: address as u64,
                        min,
                        max,
                    });
                    usable = false;
                }
            }
        }

        if usable {
            slots.push((address, region.bit_offset, region.bit_width));
        }
    }

    // Width and reset checks only make sense once the pieces parsed.
    if slots.len() == decl.regions.len() && !decl.regions.is_empty() {
        let covered: u32 = slots.iter().map(|&(_, _, w)| w as u32).sum();
        if covered != decl.length {
            errors.push(LoadError::LengthMismatch {
                field: field(),
                covered,
                length: decl.length,
            });
        }
    }
    if (1..=64).contains(&decl.length) {
        let mask = if decl.length == 64 {
            u64::MAX
        } else {
            (1u64 << decl.length) - 1
        };
        if reset_value & !mask != 0 {
            errors.push(LoadError::ResetExceedsWidth {
                field: field(),
                value: reset_value,
                length: decl.length,
            });
        }
    }

    if errors.len() > before {
        return None;
    }

    // Field-relative positions go MSB-down: sort by (address, offset),
    // first region takes the topmost bits.
    slots.sort_by_key(|&(address, offset, _)| (address, offset));
    let mut regions: SmallVec<[RegionMapping; 2]> = SmallVec::new();
    let mut remaining = decl.length;
    for &(address, local_bit_offset, local_bit_width) in &slots {
        remaining -= local_bit_width as u32;
        regions.push(RegionMapping {
            address,
            local_bit_offset,
            local_bit_width,
            field_lsb: remaining,
        });
    }
    regions.reverse();

    Some(LogicalField {
        id: decl.id.clone(),
        access,
        length: decl.length,
        reset_value,
        description: decl.description.clone(),
        regions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO_MAP: &str = r#"
        [map]
        name = "demo"
        min_address = "0x0000"
        max_address = "0x00FF"

        [[field]]
        id = "CTRL_REG"
        length = 8
        reset = "0xAB"
        access = "read-write"
        regions = [
            { address = "0x0000", bit_offset = 0, bit_width = 8 },
        ]

        [[field]]
        id = "MULTI_BYTE_FIELD"
        length = 12
        reset = "0xABC"
        access = "read-write"
        regions = [
            { address = "0x0002", bit_offset = 0, bit_width = 8 },
            { address = "0x0003", bit_offset = 4, bit_width = 4 },
        ]

        [[field]]
        id = "LOW_NIBBLE"
        length = 4
        reset = "0x5"
        access = "read-write"
        regions = [
            { address = "0x0003", bit_offset = 0, bit_width = 4 },
        ]
    "#;

    fn demo_map() -> RegisterMap {
        let desc = MapDescription::from_toml_str(DEMO_MAP).unwrap();
        RegisterMap::load(&desc).unwrap()
    }

    #[test]
    fn test_initial_bytes_reconstruct_reset_state() {
        let map = demo_map();
        assert_eq!(map.byte(0x0000, ValueSource::Initial), Some(0xAB));
        assert_eq!(map.byte(0x0002, ValueSource::Initial), Some(0xAB));
        // Top nibble from MULTI_BYTE_FIELD, low nibble from LOW_NIBBLE.
        assert_eq!(map.byte(0x0003, ValueSource::Initial), Some(0xC5));
    }

    #[test]
    fn test_field_values_match_reset_declarations() {
        let map = demo_map();
        assert_eq!(
            map.field_value("CTRL_REG", ValueSource::Initial).unwrap(),
            0xAB
        );
        assert_eq!(
            map.field_value("MULTI_BYTE_FIELD", ValueSource::Initial)
                .unwrap(),
            0xABC
        );
        assert_eq!(
            map.field_value("LOW_NIBBLE", ValueSource::Initial).unwrap(),
            0x5
        );
    }

    #[test]
    fn test_region_positions_assigned_msb_down() {
        let map = demo_map();
        let field = map.field("MULTI_BYTE_FIELD").unwrap();
        // Stored LSB-first: the 0x0003 nibble holds field bits 3..0,
        // the 0x0002 byte holds bits 11..4.
        assert_eq!(field.regions[0].address, 0x0003);
        assert_eq!(field.regions[0].field_lsb, 0);
        assert_eq!(field.regions[1].address, 0x0002);
        assert_eq!(field.regions[1].field_lsb, 4);
    }

    #[test]
    fn test_plan_single_byte_field() {
        let map = demo_map();
        let plan = map.plan_field_write("CTRL_REG", 0x55).unwrap();
        assert_eq!(
            plan.ops,
            vec![WriteOp {
                address: 0x0000,
                value: 0x55
            }]
        );
    }

    #[test]
    fn test_plan_split_field_scatters_value() {
        let map = demo_map();
        let plan = map.plan_field_write("MULTI_BYTE_FIELD", 0x123).unwrap();
        assert_eq!(
            plan.ops,
            vec![
                WriteOp {
                    address: 0x0002,
                    value: 0x12
                },
                WriteOp {
                    address: 0x0003,
                    value: 0x35
                },
            ]
        );
    }

    #[test]
    fn test_plan_skips_unchanged_bytes() {
        let map = demo_map();
        // Same value as reset: nothing to write.
        let plan = map.plan_field_write("CTRL_REG", 0xAB).unwrap();
        assert!(plan.is_empty());

        // Only the low nibble of the split field changes; 0x0002
        // already holds 0xAB and is omitted.
        let plan = map.plan_field_write("MULTI_BYTE_FIELD", 0xABF).unwrap();
        assert_eq!(
            plan.ops,
            vec![WriteOp {
                address: 0x0003,
                value: 0xF5
            }]
        );
    }

    #[test]
    fn test_plan_preserves_neighbour_fields() {
        let mut map = demo_map();
        let plan = map.plan_field_write("LOW_NIBBLE", 0xF).unwrap();
        assert_eq!(
            plan.ops,
            vec![WriteOp {
                address: 0x0003,
                value: 0xCF
            }]
        );
        map.confirm(&plan.ops);
        // The split field's nibble at 0x0003 must be untouched.
        assert_eq!(
            map.field_value("MULTI_BYTE_FIELD", ValueSource::Current)
                .unwrap(),
            0xABC
        );
        assert_eq!(
            map.field_value("LOW_NIBBLE", ValueSource::Current).unwrap(),
            0xF
        );
    }

    #[test]
    fn test_confirm_moves_current_but_not_initial() {
        let mut map = demo_map();
        let plan = map.plan_field_write("CTRL_REG", 0x55).unwrap();
        map.confirm(&plan.ops);
        assert_eq!(
            map.field_value("CTRL_REG", ValueSource::Current).unwrap(),
            0x55
        );
        assert_eq!(
            map.field_value("CTRL_REG", ValueSource::Initial).unwrap(),
            0xAB
        );
        // Idempotent.
        map.confirm(&plan.ops);
        assert_eq!(
            map.field_value("CTRL_REG", ValueSource::Current).unwrap(),
            0x55
        );
    }

    #[test]
    fn test_unconfirmed_plan_leaves_mirror_alone() {
        let map = demo_map();
        let _plan = map.plan_field_write("CTRL_REG", 0x55).unwrap();
        assert_eq!(
            map.field_value("CTRL_REG", ValueSource::Current).unwrap(),
            0xAB
        );
    }

    #[test]
    fn test_partial_confirm_tracks_only_completed_ops() {
        let mut map = demo_map();
        let plan = map.plan_field_write("MULTI_BYTE_FIELD", 0x123).unwrap();
        assert_eq!(plan.len(), 2);
        // Pretend the second byte write failed on the wire.
        map.confirm(&plan.ops[..1]);
        assert_eq!(map.byte(0x0002, ValueSource::Current), Some(0x12));
        assert_eq!(map.byte(0x0003, ValueSource::Current), Some(0xC5));
        // Replanning the same write now only needs the missing byte.
        let retry = map.plan_field_write("MULTI_BYTE_FIELD", 0x123).unwrap();
        assert_eq!(
            retry.ops,
            vec![WriteOp {
                address: 0x0003,
                value: 0x35
            }]
        );
    }

    #[test]
    fn test_plan_address_write() {
        let map = demo_map();
        let plan = map.plan_address_write(0x0000, 0x12).unwrap();
        assert_eq!(
            plan.ops,
            vec![WriteOp {
                address: 0x0000,
                value: 0x12
            }]
        );
        // Unchanged byte plans nothing.
        let plan = map.plan_address_write(0x0000, 0xAB).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_unmapped_address_is_rejected() {
        let map = demo_map();
        let err = map.plan_address_write(0x0010, 0x00).unwrap_err();
        assert_eq!(err, RegisterError::AddressNotMapped(0x0010));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let map = demo_map();
        let err = map.field_value("NOT_A_FIELD", ValueSource::Current).unwrap_err();
        assert_eq!(err, RegisterError::FieldNotFound("NOT_A_FIELD".to_string()));
    }

    #[test]
    fn test_layout_lists_claims_by_local_lsb() {
        let map = demo_map();
        let slots = map.layout_at(0x0003).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].field_id, "LOW_NIBBLE");
        assert_eq!(slots[0].local_lsb, 0);
        assert_eq!(slots[0].local_msb, 3);
        assert_eq!(slots[1].field_id, "MULTI_BYTE_FIELD");
        assert_eq!(slots[1].local_lsb, 4);
        assert_eq!(slots[1].local_msb, 7);
    }

    #[test]
    fn test_load_accumulates_every_error() {
        let text = r#"
            [map]
            min_address = "0x0000"
            max_address = "0x00FF"

            [[field]]
            id = "BAD_HEX"
            length = 8
            reset = "0xZZ"
            access = "read-write"
            regions = [
                { address = "0xQQ", bit_offset = 0, bit_width = 8 },
            ]

            [[field]]
            id = "WRONG_WIDTH"
            length = 10
            reset = "0x00"
            access = "read-write"
            regions = [
                { address = "0x0004", bit_offset = 0, bit_width = 8 },
            ]

            [[field]]
            id = "OVERLAP_A"
            length = 4
            reset = "0x0"
            access = "read-write"
            regions = [
                { address = "0x0005", bit_offset = 0, bit_width = 4 },
            ]

            [[field]]
            id = "OVERLAP_B"
            length = 4
            reset = "0x0"
            access = "read-write"
            regions = [
                { address = "0x0005", bit_offset = 2, bit_width = 4 },
            ]
        "#;
        let desc = MapDescription::from_toml_str(text).unwrap();
        let report = RegisterMap::load(&desc).unwrap_err();
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, LoadError::BadHex { field, what: "reset value", .. } if field == "BAD_HEX")));
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, LoadError::BadHex { field, what: "region address", .. } if field == "BAD_HEX")));
        assert!(report.errors.iter().any(|e| matches!(
            e,
            LoadError::LengthMismatch {
                field,
                covered: 8,
                length: 10
            } if field == "WRONG_WIDTH"
        )));
        assert!(report.errors.iter().any(|e| matches!(
            e,
            LoadError::BitOverlap { address: 0x0005, .. }
        )));
    }

    #[test]
    fn test_load_rejects_region_past_byte_boundary() {
        let text = r#"
            [map]
            min_address = "0x0000"
            max_address = "0x00FF"

            [[field]]
            id = "STRADDLER"
            length = 6
            reset = "0x00"
            access = "read-write"
            regions = [
                { address = "0x0000", bit_offset = 5, bit_width = 6 },
            ]
        "#;
        let desc = MapDescription::from_toml_str(text).unwrap();
        let report = RegisterMap::load(&desc).unwrap_err();
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, LoadError::RegionPastByte { .. })));
    }

    #[test]
    fn test_load_rejects_reset_wider_than_field() {
        let text = r#"
            [map]
            min_address = "0x0000"
            max_address = "0x00FF"

            [[field]]
            id = "NARROW"
            length = 4
            reset = "0x1F"
            access = "read-write"
            regions = [
                { address = "0x0000", bit_offset = 0, bit_width = 4 },
            ]
        "#;
        let desc = MapDescription::from_toml_str(text).unwrap();
        let report = RegisterMap::load(&desc).unwrap_err();
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, LoadError::ResetExceedsWidth { value: 0x1F, length: 4, .. })));
    }

    #[test]
    fn test_load_rejects_address_outside_window() {
        let text = r#"
            [map]
            min_address = "0x0000"
            max_address = "0x000F"

            [[field]]
            id = "FAR_AWAY"
            length = 8
            reset = "0x00"
            access = "read-write"
            regions = [
                { address = "0x0100", bit_offset = 0, bit_width = 8 },
            ]
        "#;
        let desc = MapDescription::from_toml_str(text).unwrap();
        let report = RegisterMap::load(&desc).unwrap_err();
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, LoadError::AddressOutOfRange { address: 0x100, .. })));
    }

    #[test]
    fn test_load_rejects_duplicate_field_ids() {
        let text = r#"
            [map]
            min_address = "0x0000"
            max_address = "0x00FF"

            [[field]]
            id = "TWIN"
            length = 8
            reset = "0x00"
            access = "read-write"
            regions = [{ address = "0x0000", bit_offset = 0, bit_width = 8 }]

            [[field]]
            id = "TWIN"
            length = 8
            reset = "0x00"
            access = "read-write"
            regions = [{ address = "0x0001", bit_offset = 0, bit_width = 8 }]
        "#;
        let desc = MapDescription::from_toml_str(text).unwrap();
        let report = RegisterMap::load(&desc).unwrap_err();
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, LoadError::DuplicateField { field } if field == "TWIN")));
    }

    #[test]
    fn test_same_field_twice_in_one_byte() {
        // A field split into two runs of the same address: sorted by
        // bit offset, the lower run takes the upper field bits.
        let text = r#"
            [map]
            min_address = "0x0000"
            max_address = "0x00FF"

            [[field]]
            id = "SPLIT_BYTE"
            length = 4
            reset = "0x9"
            access = "read-write"
            regions = [
                { address = "0x0000", bit_offset = 0, bit_width = 2 },
                { address = "0x0000", bit_offset = 4, bit_width = 2 },
            ]
        "#;
        let desc = MapDescription::from_toml_str(text).unwrap();
        let map = RegisterMap::load(&desc).unwrap();
        // reset 0x9 = 0b1001: bits 3..2 = 0b10 at offset 0, bits 1..0
        // = 0b01 at offset 4.
        assert_eq!(map.byte(0x0000, ValueSource::Initial), Some(0x12));
        assert_eq!(
            map.field_value("SPLIT_BYTE", ValueSource::Initial).unwrap(),
            0x9
        );
        let plan = map.plan_field_write("SPLIT_BYTE", 0x6).unwrap();
        assert_eq!(
            plan.ops,
            vec![WriteOp {
                address: 0x0000,
                value: 0x21
            }]
        );
    }
}
