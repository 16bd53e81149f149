//! STM32 USART bootloader wire format.
//!
//! This module builds the byte frames of the STM32 serial bootloader
//! protocol (AN3155). It is pure: no I/O happens here, the session layer
//! transmits the frames and enforces the ACK discipline.
//!
//! ## Frame formats
//!
//! ```text
//! Command frame:        +--------+---------+
//!                       | opcode | ~opcode |
//!                       +--------+---------+
//!
//! Address frame:        +--------+--------+-------+------+-----+
//!                       | 31..24 | 23..16 | 15..8 | 7..0 | XOR |
//!                       +--------+--------+-------+------+-----+
//!
//! Payload frame:        +-------+-----------+-----+
//!                       | len-1 | data ...  | XOR |
//!                       +-------+-----------+-----+
//! ```
//!
//! Every XOR checksum covers every byte of its frame before the checksum
//! position. Addresses are transmitted MSB-first.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// Synchronization byte sent to start a session (lets the target
/// auto-detect the baud rate).
pub const SYNC: u8 = 0x7F;

/// Positive acknowledge returned by the target after each command stage.
pub const ACK: u8 = 0x79;

/// Negative acknowledge.
pub const NACK: u8 = 0x1F;

/// Maximum data bytes in a single read/write frame.
pub const MAX_FRAME_DATA: usize = 256;

/// Maximum page numbers in a single erase frame.
///
/// The erase payload is `[count-1, hi, lo, ..., checksum]` and must fit a
/// 256-byte frame: 1 count byte + 2 bytes per page + 1 checksum byte.
pub const MAX_ERASE_PAGES: usize = 127;

/// Raw erase payload for a full-chip erase.
///
/// The sentinel count 0xFF with its complement 0x00 is the protocol's
/// mass-erase convention; it is passed through verbatim, not derived from
/// a page list.
pub const MASS_ERASE_FRAME: [u8; 2] = [0xFF, 0x00];

/// Bootloader command opcodes.
///
/// These are the command codes from the STM32 USART bootloader protocol.
/// Only a subset is driven by [`crate::session::BootSession`]; the rest
/// are listed so that a reported supported-command set can be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Get the bootloader version and the supported commands.
    Get = 0x00,
    /// Get the bootloader version and read protection status.
    GetVersion = 0x01,
    /// Get the chip ID.
    GetId = 0x02,
    /// Read up to 256 bytes of memory.
    ReadMemory = 0x11,
    /// Jump to application code.
    Go = 0x21,
    /// Write up to 256 bytes to RAM or flash.
    WriteMemory = 0x31,
    /// Erase flash pages (or the whole flash with the sentinel).
    Erase = 0x43,
}

impl Command {
    /// Get the opcode byte.
    pub fn opcode(self) -> u8 {
        self as u8
    }

    /// Get the bitwise complement of the opcode (~opcode).
    ///
    /// Sent together with the opcode so the target can detect single-bit
    /// corruption of the command byte.
    pub fn complement(self) -> u8 {
        !(self as u8)
    }
}

/// Build a two-byte `[opcode, ~opcode]` command frame.
pub fn command_frame(cmd: Command) -> [u8; 2] {
    [cmd.opcode(), cmd.complement()]
}

/// Build a five-byte address frame: four address bytes MSB-first followed
/// by the XOR of those four bytes.
pub fn address_frame(address: u32) -> [u8; 5] {
    let mut frame = [0u8; 5];
    BigEndian::write_u32(&mut frame[..4], address);
    frame[4] = frame[0] ^ frame[1] ^ frame[2] ^ frame[3];
    frame
}

/// Build the two-byte length frame `[len-1, ~(len-1)]` used by Read Memory.
///
/// `len` must be in `1..=256`.
pub fn length_frame(len: usize) -> Result<[u8; 2]> {
    check_frame_len(len)?;
    #[allow(clippy::cast_possible_truncation)] // len <= 256 checked above
    let size = (len - 1) as u8;
    Ok([size, !size])
}

/// Build a write payload frame: `[len-1, data..., checksum]` where the
/// checksum is the XOR of the size byte and every data byte.
///
/// `data` must hold `1..=256` bytes; splitting larger images into
/// frame-sized writes is the caller's job.
pub fn write_frame(data: &[u8]) -> Result<Vec<u8>> {
    check_frame_len(data.len())?;
    #[allow(clippy::cast_possible_truncation)] // len <= 256 checked above
    let size = (data.len() - 1) as u8;

    let mut frame = Vec::with_capacity(data.len() + 2);
    frame.push(size);
    frame.extend_from_slice(data);
    frame.push(data.iter().fold(size, |acc, b| acc ^ b));
    Ok(frame)
}

/// Build a page-erase payload frame: `[count-1, hi, lo, ..., checksum]`
/// with the checksum the XOR of every preceding byte.
///
/// Page numbers are transmitted MSB-first, two bytes each. At most
/// [`MAX_ERASE_PAGES`] pages fit in one frame.
pub fn erase_frame(pages: &[u16]) -> Result<Vec<u8>> {
    if pages.is_empty() {
        return Err(Error::Protocol("erase requires at least one page".into()));
    }
    if pages.len() > MAX_ERASE_PAGES {
        return Err(Error::BufferTooSmall {
            requested: pages.len(),
            max: MAX_ERASE_PAGES,
        });
    }

    #[allow(clippy::cast_possible_truncation)] // <= 127 checked above
    let count = (pages.len() - 1) as u8;

    let mut frame = Vec::with_capacity(2 + 2 * pages.len());
    frame.push(count);
    for page in pages {
        frame.push((page >> 8) as u8);
        frame.push((page & 0xFF) as u8);
    }
    let checksum = frame.iter().fold(0u8, |acc, b| acc ^ b);
    frame.push(checksum);
    Ok(frame)
}

fn check_frame_len(len: usize) -> Result<()> {
    if len == 0 {
        return Err(Error::Protocol("empty frame payload".into()));
    }
    if len > MAX_FRAME_DATA {
        return Err(Error::BufferTooSmall {
            requested: len,
            max: MAX_FRAME_DATA,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_complement() {
        assert_eq!(Command::Get.complement(), 0xFF);
        assert_eq!(Command::ReadMemory.complement(), 0xEE);
        assert_eq!(Command::Go.complement(), 0xDE);
        assert_eq!(Command::WriteMemory.complement(), 0xCE);
        assert_eq!(Command::Erase.complement(), 0xBC);
    }

    #[test]
    fn test_command_frame() {
        assert_eq!(command_frame(Command::Get), [0x00, 0xFF]);
        assert_eq!(command_frame(Command::WriteMemory), [0x31, 0xCE]);
    }

    #[test]
    fn test_address_frame_layout() {
        let frame = address_frame(0x0800_1234);
        assert_eq!(&frame[..4], &[0x08, 0x00, 0x12, 0x34]);
        assert_eq!(frame[4], 0x08 ^ 0x00 ^ 0x12 ^ 0x34);
    }

    #[test]
    fn test_address_frame_checksum_roundtrip() {
        // The checksum equals the XOR of the four big-endian bytes, and
        // decoding the frame recovers the address exactly.
        for address in [0u32, 0x0800_0000, 0x2000_0100, 0xFFFF_FFFF, 0x1234_5678] {
            let frame = address_frame(address);
            assert_eq!(frame[4], frame[0] ^ frame[1] ^ frame[2] ^ frame[3]);
            assert_eq!(BigEndian::read_u32(&frame[..4]), address);
        }
    }

    #[test]
    fn test_length_frame() {
        assert_eq!(length_frame(1).unwrap(), [0x00, 0xFF]);
        assert_eq!(length_frame(256).unwrap(), [0xFF, 0x00]);
        assert!(length_frame(0).is_err());
        assert!(length_frame(257).is_err());
    }

    #[test]
    fn test_write_frame_length_and_checksum() {
        // For all payload lengths the size byte is len-1 and the checksum
        // is the XOR of the size byte and every data byte.
        for len in [1usize, 2, 17, 255, 256] {
            let data: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            let frame = write_frame(&data).unwrap();

            assert_eq!(frame.len(), len + 2);
            assert_eq!(frame[0], (len - 1) as u8);
            assert_eq!(&frame[1..=len], &data[..]);

            let expected = data.iter().fold(frame[0], |acc, b| acc ^ b);
            assert_eq!(frame[len + 1], expected);
        }
    }

    #[test]
    fn test_write_frame_rejects_oversize() {
        let data = vec![0u8; MAX_FRAME_DATA + 1];
        assert!(matches!(
            write_frame(&data),
            Err(Error::BufferTooSmall { requested: 257, max: 256 })
        ));
    }

    #[test]
    fn test_erase_frame_single_page() {
        let frame = erase_frame(&[0x0102]).unwrap();
        assert_eq!(frame, vec![0x00, 0x01, 0x02, 0x00 ^ 0x01 ^ 0x02]);
    }

    #[test]
    fn test_erase_frame_multiple_pages() {
        let frame = erase_frame(&[0x0000, 0x0001, 0x0100]).unwrap();
        // count-1 = 2, pages MSB-first, checksum XOR of all prior bytes
        assert_eq!(&frame[..7], &[0x02, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00]);
        let checksum = frame[..7].iter().fold(0u8, |acc, b| acc ^ b);
        assert_eq!(frame[7], checksum);
    }

    #[test]
    fn test_erase_frame_bounds() {
        assert!(erase_frame(&[]).is_err());
        let too_many = vec![0u16; MAX_ERASE_PAGES + 1];
        assert!(erase_frame(&too_many).is_err());
        let max = vec![0u16; MAX_ERASE_PAGES];
        // 1 count + 254 page bytes + 1 checksum = 256
        assert_eq!(erase_frame(&max).unwrap().len(), 256);
    }

    #[test]
    fn test_mass_erase_frame_sentinel() {
        assert_eq!(MASS_ERASE_FRAME, [0xFF, 0x00]);
    }
}
