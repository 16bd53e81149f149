//! Firmware image formats.

pub mod hex;

// Re-export common types
pub use hex::{HexRecord, RecordType};
