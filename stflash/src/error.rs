//! Error types for stflash.

use std::io;
use thiserror::Error;

/// Result type for stflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for stflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No response from the target within the receive timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Target explicitly rejected a command stage with NACK.
    #[error("Command {command:#04x} rejected by target (NACK)")]
    Nack {
        /// Opcode of the rejected command (or the sync byte).
        command: u8,
    },

    /// Target answered with something that is neither ACK nor NACK.
    #[error("Command {command:#04x}: unexpected response byte {byte:#04x}")]
    UnexpectedByte {
        /// Opcode of the command in flight.
        command: u8,
        /// The byte actually received.
        byte: u8,
    },

    /// Opcode absent from the target's supported-command set.
    #[error("Command {command:#04x} not supported by this bootloader")]
    Unsupported {
        /// The gated opcode.
        command: u8,
    },

    /// Payload or response exceeds a protocol-defined capacity.
    #[error("Buffer too small: {requested} bytes requested, at most {max} fit")]
    BufferTooSmall {
        /// Number of bytes requested.
        requested: usize,
        /// Maximum the protocol (or a fixed buffer) allows.
        max: usize,
    },

    /// Intel HEX line failed to decode or its checksum did not match.
    #[error("Malformed HEX record: {0}")]
    MalformedRecord(String),

    /// Intel HEX record type outside the supported set.
    #[error("Unknown HEX record type {0:#04x}")]
    UnknownRecordType(u8),

    /// Session used in the wrong phase, or required state is missing.
    #[error("Session error: {0}")]
    Session(String),

    /// Protocol violation not covered by a more specific variant.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Upload aborted; names the failing line of the image.
    #[error("Upload failed at line {line}: {source} (line was: {content:?})")]
    Upload {
        /// 1-based line number within the image.
        line: usize,
        /// The text of the failing line.
        content: String,
        /// The underlying failure.
        source: Box<Error>,
    },
}
