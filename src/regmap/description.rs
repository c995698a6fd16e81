//! Map description files: the on-disk declaration of a register map.
//!
//! A description file is TOML. Numeric register quantities (addresses,
//! reset values) are written as hex strings so they survive editing by
//! people who think in datasheet notation; structural numbers (widths,
//! offsets, lengths) are plain integers.
//!
//! # Example Map File
//!
//! ```toml
//! [map]
//! name = "demo-asic-a0"
//! min_address = "0x0000"
//! max_address = "0x00FF"
//!
//! [[field]]
//! id = "CTRL_REG"
//! length = 8
//! reset = "0xAB"
//! access = "read-write"
//! description = "Main control byte"
//! regions = [
//!     { address = "0x0000", bit_offset = 0, bit_width = 8 },
//! ]
//!
//! [[field]]
//! id = "MULTI_BYTE_FIELD"
//! length = 12
//! reset = "0xABC"
//! access = "read-write"
//! regions = [
//!     { address = "0x0002", bit_offset = 0, bit_width = 8 },
//!     { address = "0x0003", bit_offset = 4, bit_width = 4 },
//! ]
//! ```
//!
//! This module only covers the raw file shape. Semantic validation
//! (hex parsing, range checks, overlap detection) happens when the
//! description is compiled into a [`RegisterMap`], so that one pass
//! can report every problem in the file at once.
//!
//! [`RegisterMap`]: crate::regmap::RegisterMap

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Top-level map description as read from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct MapDescription {
    pub map: MapMetadata,
    #[serde(default, rename = "field")]
    pub fields: Vec<FieldDecl>,
}

/// The `[map]` table: identity and the legal address window.
#[derive(Debug, Clone, Deserialize)]
pub struct MapMetadata {
    #[serde(default)]
    pub name: Option<String>,
    /// Lowest mapped address, hex string.
    pub min_address: String,
    /// Highest mapped address, hex string.
    pub max_address: String,
}

/// One `[[field]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldDecl {
    pub id: String,
    /// Total width in bits; must equal the sum of region widths.
    pub length: u32,
    /// Reset value, hex string.
    #[serde(rename = "reset")]
    pub reset_value: String,
    pub access: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub regions: Vec<RegionDecl>,
}

/// One bit region of a field, confined to a single 8-bit address.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionDecl {
    /// Register address, hex string.
    pub address: String,
    /// Lowest bit of the run within the byte (0-7).
    pub bit_offset: u8,
    /// Bits in the run (1-8).
    pub bit_width: u8,
}

impl MapDescription {
    /// Parse a description from TOML text. This only checks the file
    /// shape; call [`RegisterMap::load`] for semantic validation.
    ///
    /// [`RegisterMap::load`]: crate::regmap::RegisterMap::load
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("malformed map description")
    }

    /// Read and parse a description file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read map description {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("in map description {}", path.display()))
    }
}

/// Parse a hex string with an optional `0x`/`0X` prefix.
///
/// Returns `None` for anything that is not pure hex after the prefix;
/// callers turn that into their own error with the offending text.
pub fn parse_hex(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Parse a number written either as decimal or as `0x`-prefixed hex.
///
/// Bare hex without the prefix is rejected here, unlike [`parse_hex`]:
/// operator-entered values like "10" must read as ten, not sixteen.
pub fn parse_auto(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    if let Some(digits) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(digits, 16).ok()
    } else {
        trimmed.parse::<u64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_accepts_prefix_and_bare() {
        assert_eq!(parse_hex("0xAB"), Some(0xAB));
        assert_eq!(parse_hex("0Xab"), Some(0xAB));
        assert_eq!(parse_hex("AB"), Some(0xAB));
        assert_eq!(parse_hex("  0x0000  "), Some(0));
    }

    #[test]
    fn test_parse_hex_rejects_garbage() {
        assert_eq!(parse_hex(""), None);
        assert_eq!(parse_hex("0x"), None);
        assert_eq!(parse_hex("0xZZ"), None);
        assert_eq!(parse_hex("12 34"), None);
    }

    #[test]
    fn test_parse_auto_decimal_vs_hex() {
        assert_eq!(parse_auto("10"), Some(10));
        assert_eq!(parse_auto("0x10"), Some(16));
        assert_eq!(parse_auto("ab"), None);
        assert_eq!(parse_auto("-3"), None);
    }

    #[test]
    fn test_description_round_trip_from_toml() {
        let text = r#"
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
        "#;
        let desc = MapDescription::from_toml_str(text).unwrap();
        assert_eq!(desc.map.name.as_deref(), Some("demo"));
        assert_eq!(desc.fields.len(), 1);
        assert_eq!(desc.fields[0].id, "CTRL_REG");
        assert_eq!(desc.fields[0].regions[0].bit_width, 8);
    }

    #[test]
    fn test_description_rejects_broken_toml() {
        assert!(MapDescription::from_toml_str("[map").is_err());
    }

    #[test]
    fn test_fields_default_to_empty() {
        let text = r#"
            [map]
            min_address = "0x0000"
            max_address = "0x00FF"
        "#;
        let desc = MapDescription::from_toml_str(text).unwrap();
        assert!(desc.fields.is_empty());
    }
}
