//! Override files: replaying already-performed writes into the mirror.
//!
//! An override file is the log of a previous bench session, one write
//! per line:
//!
//! ```text
//! # comment lines and blanks are ignored
//! 0x0000 0x55
//! 0x0003 0xF5   # trailing comments as well
//! ```
//!
//! Overrides bypass the plan/confirm protocol on purpose: the writes
//! already happened on the device, so the current mirror is updated
//! unconditionally. Lines that fail to parse and addresses the map
//! does not cover are skipped with a warning, never silently zeroed.

use std::path::Path;

use anyhow::Context;
use log::{debug, warn};
use thiserror::Error;

use super::description::parse_hex;
use super::map::RegisterMap;

/// One parsed override line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverrideEntry {
    pub address: u16,
    pub value: u8,
    /// 1-based source line, for diagnostics.
    pub line: usize,
}

/// A line that could not be turned into an entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OverrideError {
    #[error("line {line}: expected '<address> <byte>', got '{text}'")]
    Malformed { line: usize, text: String },
    #[error("line {line}: '{text}' is not valid hex")]
    BadHex { line: usize, text: String },
    #[error("line {line}: address 0x{value:X} does not fit in 16 bits")]
    AddressRange { line: usize, value: u64 },
    #[error("line {line}: byte value 0x{value:X} does not fit in 8 bits")]
    ByteRange { line: usize, value: u64 },
}

/// Counts from applying an override file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverrideStats {
    /// Entries folded into the current mirror.
    pub applied: usize,
    /// Entries naming addresses outside the map.
    pub skipped_unmapped: usize,
}

/// Parse override text, keeping good lines even when bad ones exist.
///
/// Returns every entry that parsed along with an error per rejected
/// line, so a session log with one corrupt line still replays.
pub fn parse_overrides(text: &str) -> (Vec<OverrideEntry>, Vec<OverrideError>) {
    let mut entries = Vec::new();
    let mut errors = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        // Everything after '#' is commentary, whether the line starts
        // with it or annotates a write.
        let data = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let trimmed = data.trim();
        if trimmed.is_empty() {
            continue;
        }

        let mut parts = trimmed.split_whitespace();
        let (address_text, value_text) = match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(v), None) => (a, v),
            _ => {
                errors.push(OverrideError::Malformed {
                    line,
                    text: trimmed.to_string(),
                });
                continue;
            }
        };

        let address = match parse_hex(address_text) {
            Some(value) if value <= u16::MAX as u64 => value as u16,
            Some(value) => {
                errors.push(OverrideError::AddressRange { line, value });
                continue;
            }
            None => {
                errors.push(OverrideError::BadHex {
                    line,
                    text: address_text.to_string(),
                });
                continue;
            }
        };
        let value = match parse_hex(value_text) {
            Some(value) if value <= u8::MAX as u64 => value as u8,
            Some(value) => {
                errors.push(OverrideError::ByteRange { line, value });
                continue;
            }
            None => {
                errors.push(OverrideError::BadHex {
                    line,
                    text: value_text.to_string(),
                });
                continue;
            }
        };

        entries.push(OverrideEntry {
            address,
            value,
            line,
        });
    }

    (entries, errors)
}

/// Read and parse an override file from disk.
pub fn parse_override_file(path: &Path) -> anyhow::Result<(Vec<OverrideEntry>, Vec<OverrideError>)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read override file {}", path.display()))?;
    Ok(parse_overrides(&text))
}

impl RegisterMap {
    /// Replay override entries into the current mirror.
    ///
    /// Later entries for the same address win, matching replay order.
    /// Unmapped addresses are skipped with a warning; the initial
    /// mirror is never touched.
    pub fn apply_overrides(&mut self, entries: &[OverrideEntry]) -> OverrideStats {
        let mut stats = OverrideStats::default();
        for entry in entries {
            if !self.is_mapped(entry.address) {
                warn!(
                    "override line {}: address 0x{:04X} is not mapped, skipped",
                    entry.line, entry.address
                );
                stats.skipped_unmapped += 1;
                continue;
            }
            self.confirm(&[super::map::WriteOp {
                address: entry.address,
                value: entry.value,
            }]);
            stats.applied += 1;
        }
        debug!(
            "overrides applied: {} written, {} unmapped skipped",
            stats.applied, stats.skipped_unmapped
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regmap::description::MapDescription;
    use crate::regmap::map::ValueSource;

    fn tiny_map() -> RegisterMap {
        let text = r#"
            [map]
            min_address = "0x0000"
            max_address = "0x00FF"

            [[field]]
            id = "CTRL_REG"
            length = 8
            reset = "0xAB"
            access = "read-write"
            regions = [{ address = "0x0000", bit_offset = 0, bit_width = 8 }]
        "#;
        RegisterMap::load(&MapDescription::from_toml_str(text).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let (entries, errors) = parse_overrides("# header\n\n0x0000 0x55\n");
        assert!(errors.is_empty());
        assert_eq!(
            entries,
            vec![OverrideEntry {
                address: 0x0000,
                value: 0x55,
                line: 3
            }]
        );
    }

    #[test]
    fn test_parse_ignores_trailing_comments() {
        let (entries, errors) =
            parse_overrides("0x0000 0x55 # calibration write\n0x0001 0x66# no space\n");
        assert!(errors.is_empty());
        assert_eq!(
            entries,
            vec![
                OverrideEntry {
                    address: 0x0000,
                    value: 0x55,
                    line: 1
                },
                OverrideEntry {
                    address: 0x0001,
                    value: 0x66,
                    line: 2
                },
            ]
        );
    }

    #[test]
    fn test_parse_keeps_good_lines_around_bad_ones() {
        let text = "0x0000 0x11\nnot an override\n0x0001 0xZZ\n0x0002 0x22\n0x0003 0x123\n";
        let (entries, errors) = parse_overrides(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].address, 0x0002);
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], OverrideError::Malformed { line: 2, .. }));
        assert!(matches!(errors[1], OverrideError::BadHex { line: 3, .. }));
        assert!(matches!(
            errors[2],
            OverrideError::ByteRange {
                line: 5,
                value: 0x123
            }
        ));
    }

    #[test]
    fn test_apply_updates_current_only() {
        let mut map = tiny_map();
        let (entries, _) = parse_overrides("0x0000 0x55\n");
        let stats = map.apply_overrides(&entries);
        assert_eq!(stats.applied, 1);
        assert_eq!(map.field_value("CTRL_REG", ValueSource::Current).unwrap(), 0x55);
        assert_eq!(map.field_value("CTRL_REG", ValueSource::Initial).unwrap(), 0xAB);
    }

    #[test]
    fn test_apply_skips_unmapped_addresses() {
        let mut map = tiny_map();
        let (entries, _) = parse_overrides("0x0040 0x01\n0x0000 0x22\n");
        let stats = map.apply_overrides(&entries);
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.skipped_unmapped, 1);
        assert_eq!(map.byte(0x0000, ValueSource::Current), Some(0x22));
    }

    #[test]
    fn test_last_entry_for_an_address_wins() {
        let mut map = tiny_map();
        let (entries, _) = parse_overrides("0x0000 0x01\n0x0000 0x02\n");
        map.apply_overrides(&entries);
        assert_eq!(map.byte(0x0000, ValueSource::Current), Some(0x02));
    }
}
