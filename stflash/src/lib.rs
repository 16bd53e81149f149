//! # stflash
//!
//! A library for flashing STM32 microcontrollers through the built-in
//! USART serial bootloader.
//!
//! The crate speaks the bootloader's command/acknowledge protocol over
//! an exclusively-owned serial port:
//!
//! - session handshake and capability discovery ([`BootSession`])
//! - memory read, write, erase and jump-to-application commands
//! - Intel HEX image parsing ([`HexRecord`]) and upload sequencing
//!   ([`upload_hex`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::io::BufRead as _;
//!
//! use stflash::{BootSession, SerialConfig, upload_hex};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SerialConfig::new("/dev/ttyUSB0", 115_200);
//!     let mut session = BootSession::open(&config)?;
//!     session.connect()?;
//!
//!     let image = std::io::BufReader::new(std::fs::File::open("firmware.hex")?);
//!     upload_hex(&mut session, image.lines(), |_, _| {})?;
//!     session.go_entry()?;
//!     Ok(())
//! }
//! ```

pub mod dump;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod session;
pub mod upload;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export the common surface at the crate root.
pub use dump::hexdump;
pub use error::{Error, Result};
pub use image::{HexRecord, RecordType};
pub use port::{NativePort, Parity, Port, SerialConfig, list_ports};
pub use protocol::{ACK, Command, MAX_FRAME_DATA, NACK, SYNC};
pub use session::{BootSession, CommandSet, Phase};
pub use upload::{UploadSummary, upload_hex};
