//! Intel HEX record parsing.
//!
//! One textual line decodes into one record:
//!
//! ```text
//! :BBAAAATTdd...ddCC
//!  |  |   |  |     |
//!  |  |   |  |     +-- checksum (two's complement of the byte sum)
//!  |  |   |  +-------- BB data bytes
//!  |  |   +----------- record type
//!  |  +--------------- 16-bit address, big-endian
//!  +------------------ byte count BB
//! ```
//!
//! All field positions are fixed offsets derived from the byte count.
//! Only the four record types needed to replay a firmware image are
//! accepted; everything else is rejected.

use crate::error::{Error, Result};

/// Record types understood by the uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Data bytes at (base + record address).
    Data = 0x00,
    /// End of the image; remaining lines are ignored.
    EndOfFile = 0x01,
    /// Shifts the upper 16 bits of subsequent data addresses.
    ExtendedLinearAddress = 0x04,
    /// 32-bit program entry point.
    StartLinearAddress = 0x05,
}

impl RecordType {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(Self::Data),
            0x01 => Ok(Self::EndOfFile),
            0x04 => Ok(Self::ExtendedLinearAddress),
            0x05 => Ok(Self::StartLinearAddress),
            other => Err(Error::UnknownRecordType(other)),
        }
    }
}

/// One decoded Intel HEX record.
///
/// Records are ephemeral: parsed, dispatched, discarded. The 16-bit
/// address is line-local; the uploader adds the session's extended base
/// address to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// 16-bit address field.
    pub address: u16,
    /// Record type.
    pub record_type: RecordType,
    /// Data bytes (length is the record's byte count).
    pub data: Vec<u8>,
}

impl HexRecord {
    /// Parse one HEX line (without trailing line-ending characters).
    ///
    /// The line must begin with `:`; every field is validated, and a
    /// checksum mismatch is a hard failure.
    pub fn parse(line: &str) -> Result<Self> {
        let Some(digits) = line.strip_prefix(':') else {
            return Err(Error::MalformedRecord(
                "line does not start with ':'".into(),
            ));
        };
        if !digits.is_ascii() {
            return Err(Error::MalformedRecord("non-ASCII character".into()));
        }
        if digits.len() % 2 != 0 {
            return Err(Error::MalformedRecord("odd number of hex digits".into()));
        }

        let mut bytes = Vec::with_capacity(digits.len() / 2);
        for pair in digits.as_bytes().chunks_exact(2) {
            let pair = std::str::from_utf8(pair).map_err(|_| {
                Error::MalformedRecord("non-ASCII character".into())
            })?;
            let byte = u8::from_str_radix(pair, 16)
                .map_err(|_| Error::MalformedRecord(format!("invalid hex digits {pair:?}")))?;
            bytes.push(byte);
        }

        // byte_count + address(2) + type + checksum
        if bytes.len() < 5 {
            return Err(Error::MalformedRecord("record too short".into()));
        }
        let byte_count = bytes[0] as usize;
        if bytes.len() != byte_count + 5 {
            return Err(Error::MalformedRecord(format!(
                "byte count {} does not match line length",
                bytes[0]
            )));
        }

        // Two's-complement sum over everything before the checksum byte.
        let sum = bytes[..bytes.len() - 1]
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        let expected = sum.wrapping_neg();
        let actual = bytes[bytes.len() - 1];
        if expected != actual {
            return Err(Error::MalformedRecord(format!(
                "checksum mismatch: computed {expected:#04x}, line has {actual:#04x}"
            )));
        }

        let record_type = RecordType::from_byte(bytes[3])?;
        let address = u16::from_be_bytes([bytes[1], bytes[2]]);

        Ok(Self {
            address,
            record_type,
            data: bytes[4..4 + byte_count].to_vec(),
        })
    }

    /// Encode the record back to its canonical ASCII line.
    #[allow(clippy::cast_possible_truncation)] // data len is a record byte count
    pub fn encode(&self) -> String {
        use std::fmt::Write as _;

        let mut bytes = Vec::with_capacity(5 + self.data.len());
        bytes.push(self.data.len() as u8);
        bytes.push((self.address >> 8) as u8);
        bytes.push((self.address & 0xFF) as u8);
        bytes.push(self.record_type as u8);
        bytes.extend_from_slice(&self.data);
        let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        bytes.push(sum.wrapping_neg());

        let mut line = String::with_capacity(1 + 2 * bytes.len());
        line.push(':');
        for byte in bytes {
            // Writing to a String cannot fail.
            let _ = write!(line, "{byte:02X}");
        }
        line
    }
}
