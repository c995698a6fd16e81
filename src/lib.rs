//! evalbench library
//!
//! Core engine for automated chip evaluation: register maps over I2C,
//! bench instrument control, and authored test sequences.

pub mod cancel;
pub mod config;
pub mod events;
pub mod hardware;
pub mod regmap;
pub mod sequence;
pub mod testing;
