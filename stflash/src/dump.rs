//! Hex-dump formatting for memory reads.

use std::fmt::Write as _;

const BYTES_PER_LINE: usize = 16;

/// Format `data` as a hex dump, 16 bytes per line, with each line
/// prefixed by its absolute address (starting at `base`).
///
/// ```
/// let dump = stflash::hexdump(0x0800_0000, &[0xDE, 0xAD, 0xBE, 0xEF]);
/// assert_eq!(dump, "08000000: de ad be ef\n");
/// ```
pub fn hexdump(base: u32, data: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in data.chunks(BYTES_PER_LINE).enumerate() {
        let address = base.wrapping_add((i * BYTES_PER_LINE) as u32);
        // Writing to a String cannot fail.
        let _ = write!(out, "{address:08x}:");
        for byte in chunk {
            let _ = write!(out, " {byte:02x}");
        }
        out.push('\n');
    }
    out
}
