//! Firmware image upload orchestration.
//!
//! Replays an Intel HEX image over an established [`BootSession`], one
//! record at a time, in file order. The first failure of any kind ends
//! the upload; the error carries the 1-based line number and the line's
//! text so the operator can see exactly where the image stopped.

use std::io;

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::image::hex::{HexRecord, RecordType};
use crate::port::Port;
use crate::protocol::wire::MAX_FRAME_DATA;
use crate::session::BootSession;

/// Outcome of a completed upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Number of data records written.
    pub data_records: usize,
    /// Total payload bytes written to target memory.
    pub bytes_written: usize,
    /// Entry address recorded from a start-linear-address record, if any.
    pub entry_address: Option<u32>,
}

enum Dispatch {
    Continue,
    Finished,
}

/// Upload a firmware image line by line.
///
/// `lines` yields the raw lines of the image (trailing line endings are
/// tolerated); blank lines are skipped, and everything after the
/// end-of-file record is ignored. `progress` is invoked after each
/// processed record with the 1-based line number and the running byte
/// count.
///
/// An image that ends without an end-of-file record still counts as a
/// successful upload; a warning is logged.
pub fn upload_hex<P, L, F>(
    session: &mut BootSession<P>,
    lines: L,
    mut progress: F,
) -> Result<UploadSummary>
where
    P: Port,
    L: IntoIterator<Item = io::Result<String>>,
    F: FnMut(usize, usize),
{
    let mut summary = UploadSummary::default();
    for (index, line) in lines.into_iter().enumerate() {
        let line_no = index + 1;
        let raw = line?;
        let line = raw.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            trace!("Skipping blank line {line_no}");
            continue;
        }

        match dispatch_line(session, line, &mut summary) {
            Ok(Dispatch::Finished) => {
                info!(
                    "Upload complete: {} data record(s), {} byte(s)",
                    summary.data_records, summary.bytes_written
                );
                return Ok(summary);
            },
            Ok(Dispatch::Continue) => progress(line_no, summary.bytes_written),
            Err(source) => {
                return Err(Error::Upload {
                    line: line_no,
                    content: line.to_string(),
                    source: Box::new(source),
                });
            },
        }
    }

    warn!("Image ended without an end-of-file record");
    Ok(summary)
}

fn dispatch_line<P: Port>(
    session: &mut BootSession<P>,
    line: &str,
    summary: &mut UploadSummary,
) -> Result<Dispatch> {
    let record = HexRecord::parse(line)?;
    dispatch_record(session, &record, summary)
}

fn dispatch_record<P: Port>(
    session: &mut BootSession<P>,
    record: &HexRecord,
    summary: &mut UploadSummary,
) -> Result<Dispatch> {
    match record.record_type {
        RecordType::Data => {
            let mut address = session.base_address().wrapping_add(u32::from(record.address));
            // Split oversized records at the single-frame payload limit.
            for chunk in record.data.chunks(MAX_FRAME_DATA) {
                session.write_memory(address, chunk)?;
                address = address.wrapping_add(chunk.len() as u32);
                summary.bytes_written += chunk.len();
            }
            summary.data_records += 1;
            Ok(Dispatch::Continue)
        },
        RecordType::EndOfFile => Ok(Dispatch::Finished),
        RecordType::ExtendedLinearAddress => {
            let &[hi, lo] = record.data.as_slice() else {
                return Err(Error::MalformedRecord(
                    "extended linear address record must carry 2 data bytes".into(),
                ));
            };
            let base = ((u32::from(hi) << 8) | u32::from(lo)) << 16;
            session.set_base_address(base);
            debug!("Base address set to {base:#010x}");
            Ok(Dispatch::Continue)
        },
        RecordType::StartLinearAddress => {
            let &[a, b, c, d] = record.data.as_slice() else {
                return Err(Error::MalformedRecord(
                    "start linear address record must carry 4 data bytes".into(),
                ));
            };
            let entry = u32::from_be_bytes([a, b, c, d]);
            session.set_entry_address(entry);
            summary.entry_address = Some(entry);
            debug!("Entry address recorded: {entry:#010x}");
            Ok(Dispatch::Continue)
        },
    }
}
