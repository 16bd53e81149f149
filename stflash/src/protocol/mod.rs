//! Protocol implementations.

pub mod wire;

// Re-export common types
pub use wire::{ACK, Command, MAX_FRAME_DATA, NACK, SYNC};
