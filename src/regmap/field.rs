//! Logical field definitions and bit-region arithmetic.
//!
//! A logical field is the unit the rest of the crate talks about
//! ("CTRL_REG", "VREF_TRIM"). Physically it lives as one or more bit
//! regions, each confined to a single 8-bit address:
//!
//! ```text
//! MULTI_BYTE_FIELD, length 12, reset 0xABC
//!
//!   address 0x0002            address 0x0003
//!   [7 6 5 4 3 2 1 0]         [7 6 5 4 3 2 1 0]
//!    A A A A B B B B           C C C C . . . .
//!    field bits 11..4          field bits 3..0
//! ```
//!
//! Field-relative positions are assigned MSB-down: regions are sorted
//! by (address, bit offset) and the first region takes the topmost
//! bits. Reads concatenate regions back into one value; writes scatter
//! a value across them.

use std::fmt;

use smallvec::SmallVec;

/// Access class of a logical field, as declared by the map file.
///
/// The engine does not police access on its own; the class is carried
/// for frontends and reports (greying out read-only rows, flagging
/// writes to reserved fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
    WriteOnly,
    /// Reserved or fixed-function bits with no meaningful access.
    NotApplicable,
}

impl AccessMode {
    /// Parse the access strings used by map description files.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "ro" | "read-only" => Some(AccessMode::ReadOnly),
            "rw" | "read-write" => Some(AccessMode::ReadWrite),
            "wo" | "write-only" => Some(AccessMode::WriteOnly),
            "na" | "n/a" | "none" => Some(AccessMode::NotApplicable),
            _ => None,
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, AccessMode::ReadWrite | AccessMode::WriteOnly)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::ReadOnly => write!(f, "RO"),
            AccessMode::ReadWrite => write!(f, "RW"),
            AccessMode::WriteOnly => write!(f, "WO"),
            AccessMode::NotApplicable => write!(f, "N/A"),
        }
    }
}

/// One contiguous run of field bits inside a single 8-bit address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionMapping {
    /// Register address holding this run.
    pub address: u16,
    /// Position of the run's lowest bit within the byte (0-7).
    pub local_bit_offset: u8,
    /// Number of bits in the run (1-8, never crossing the byte).
    pub local_bit_width: u8,
    /// Field-relative position of the run's lowest bit.
    pub field_lsb: u32,
}

impl RegionMapping {
    /// Byte mask covering this run's bits within its address.
    pub fn local_mask(&self) -> u8 {
        let width_mask = if self.local_bit_width >= 8 {
            0xFF
        } else {
            (1u8 << self.local_bit_width) - 1
        };
        width_mask << self.local_bit_offset
    }

    /// Field-relative position of the run's highest bit.
    pub fn field_msb(&self) -> u32 {
        self.field_lsb + self.local_bit_width as u32 - 1
    }

    /// Pull this run's bits out of a register byte, shifted into their
    /// field-relative position.
    pub fn extract(&self, byte: u8) -> u64 {
        let run = (byte & self.local_mask()) >> self.local_bit_offset;
        (run as u64) << self.field_lsb
    }

    /// Read-modify-write this run's bits of `byte` from a field value,
    /// leaving bits owned by other fields untouched.
    pub fn insert(&self, byte: u8, field_value: u64) -> u8 {
        let run = (field_value >> self.field_lsb) as u8;
        let placed = (run << self.local_bit_offset) & self.local_mask();
        (byte & !self.local_mask()) | placed
    }
}

impl fmt::Display for RegionMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:04X}[{}:{}] = bits {}..{}",
            self.address,
            self.local_bit_offset + self.local_bit_width - 1,
            self.local_bit_offset,
            self.field_msb(),
            self.field_lsb,
        )
    }
}

/// A named register field spanning one or more bit regions.
///
/// Regions are stored in field-relative order, lowest bits first. Most
/// fields fit a single region; two covers nearly every split field in
/// practice, hence the inline capacity.
#[derive(Debug, Clone)]
pub struct LogicalField {
    /// Unique field identifier from the map file.
    pub id: String,
    /// Declared access class.
    pub access: AccessMode,
    /// Total width in bits across all regions.
    pub length: u32,
    /// Power-on value of the whole field.
    pub reset_value: u64,
    /// Free-text description from the map file, if any.
    pub description: Option<String>,
    /// Bit regions, ordered by ascending `field_lsb`.
    pub regions: SmallVec<[RegionMapping; 2]>,
}

impl LogicalField {
    /// Mask selecting the field's `length` low bits of a value.
    pub fn value_mask(&self) -> u64 {
        if self.length >= 64 {
            u64::MAX
        } else {
            (1u64 << self.length) - 1
        }
    }

    /// Whether `value` fits in the field without truncation.
    pub fn fits(&self, value: u64) -> bool {
        value & !self.value_mask() == 0
    }

    /// Addresses touched by this field, in region order.
    pub fn addresses(&self) -> impl Iterator<Item = u16> + '_ {
        self.regions.iter().map(|r| r.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn split_field() -> LogicalField {
        // 12-bit field: high 8 bits in 0x0002, low 4 bits in the top
        // nibble of 0x0003.
        LogicalField {
            id: "MULTI_BYTE_FIELD".to_string(),
            access: AccessMode::ReadWrite,
            length: 12,
            reset_value: 0xABC,
            description: None,
            regions: smallvec![
                RegionMapping {
                    address: 0x0003,
                    local_bit_offset: 4,
                    local_bit_width: 4,
                    field_lsb: 0,
                },
                RegionMapping {
                    address: 0x0002,
                    local_bit_offset: 0,
                    local_bit_width: 8,
                    field_lsb: 4,
                },
            ],
        }
    }

    #[test]
    fn test_access_mode_parse() {
        assert_eq!(AccessMode::parse("read-write"), Some(AccessMode::ReadWrite));
        assert_eq!(AccessMode::parse("RO"), Some(AccessMode::ReadOnly));
        assert_eq!(AccessMode::parse(" wo "), Some(AccessMode::WriteOnly));
        assert_eq!(AccessMode::parse("n/a"), Some(AccessMode::NotApplicable));
        assert_eq!(AccessMode::parse("rwx"), None);
    }

    #[test]
    fn test_local_mask() {
        let region = RegionMapping {
            address: 0,
            local_bit_offset: 4,
            local_bit_width: 4,
            field_lsb: 0,
        };
        assert_eq!(region.local_mask(), 0xF0);

        let full = RegionMapping {
            address: 0,
            local_bit_offset: 0,
            local_bit_width: 8,
            field_lsb: 0,
        };
        assert_eq!(full.local_mask(), 0xFF);
    }

    #[test]
    fn test_extract_places_bits_at_field_position() {
        let field = split_field();
        // 0x0002 holds field bits 11..4, 0x0003's top nibble bits 3..0.
        assert_eq!(field.regions[1].extract(0xAB), 0xAB0);
        assert_eq!(field.regions[0].extract(0xC0), 0x00C);
    }

    #[test]
    fn test_insert_preserves_unowned_bits() {
        let field = split_field();
        // Low nibble of 0x0003 belongs to someone else; writing the
        // field must leave it alone.
        let byte = field.regions[0].insert(0x0F, 0x123);
        assert_eq!(byte, 0x3F);
    }

    #[test]
    fn test_insert_extract_round_trip() {
        let field = split_field();
        let value = 0x5A5u64;
        let mut bytes = [0u8; 2];
        bytes[0] = field.regions[1].insert(0, value);
        bytes[1] = field.regions[0].insert(0, value);
        let back = field.regions[1].extract(bytes[0]) | field.regions[0].extract(bytes[1]);
        assert_eq!(back, value);
    }

    #[test]
    fn test_value_mask_full_width() {
        let mut field = split_field();
        field.length = 64;
        assert_eq!(field.value_mask(), u64::MAX);
        field.length = 1;
        assert_eq!(field.value_mask(), 1);
    }

    #[test]
    fn test_fits() {
        let field = split_field();
        assert!(field.fits(0xFFF));
        assert!(!field.fits(0x1000));
    }
}
