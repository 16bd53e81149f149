//! Memory commands: dump, read, erase and go.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use console::style;
use stflash::{MAX_FRAME_DATA, hexdump, list_ports as lib_list_ports};

use crate::{Cli, connect};

/// Hex-dump target memory to stdout.
pub fn dump(cli: &Cli, address: u32, count: u32) -> Result<()> {
    let mut session = connect(cli)?;
    let data = read_chunked(&mut session, address, count)?;
    print!("{}", hexdump(address, &data));
    Ok(())
}

/// Read target memory into a file.
pub fn read(cli: &Cli, address: u32, count: u32, out: &Path) -> Result<()> {
    let mut session = connect(cli)?;
    let data = read_chunked(&mut session, address, count)?;
    fs::write(out, &data)
        .with_context(|| format!("failed to write {}", out.display()))?;
    if !cli.quiet {
        eprintln!(
            "{} Read {} byte(s) from {:#010x} into {}",
            style("✓").green(),
            data.len(),
            address,
            style(out.display()).cyan()
        );
    }
    Ok(())
}

/// Erase the whole flash or a list of pages.
pub fn erase(cli: &Cli, all: bool, pages: &[u16]) -> Result<()> {
    if !all && pages.is_empty() {
        bail!("specify --all or --pages (e.g. `stflash erase --pages 0,1,2`)");
    }

    let mut session = connect(cli)?;

    if all {
        session.mass_erase().context("mass erase failed")?;
        if !cli.quiet {
            eprintln!("{} Erased the entire flash", style("✓").green());
        }
    } else {
        session.erase_pages(pages).context("page erase failed")?;
        if !cli.quiet {
            eprintln!("{} Erased {} page(s)", style("✓").green(), pages.len());
        }
    }
    Ok(())
}

/// Jump to application code at the given address.
pub fn go(cli: &Cli, address: u32) -> Result<()> {
    let mut session = connect(cli)?;
    session
        .go(address)
        .with_context(|| format!("go to {address:#010x} failed"))?;
    if !cli.quiet {
        eprintln!(
            "{} Started application at {address:#010x}",
            style("🚀").green()
        );
    }
    Ok(())
}

/// List available serial ports.
pub fn list_ports() -> Result<()> {
    let ports = lib_list_ports()?;
    if ports.is_empty() {
        eprintln!("{}", style("No serial ports found").dim());
    } else {
        for port in ports {
            println!("{port}");
        }
    }
    Ok(())
}

/// Read an arbitrary amount of memory in frame-sized chunks.
fn read_chunked(
    session: &mut stflash::BootSession<stflash::NativePort>,
    address: u32,
    count: u32,
) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(count as usize);
    let mut remaining = count as usize;
    let mut cursor = address;
    while remaining > 0 {
        let len = remaining.min(MAX_FRAME_DATA);
        let chunk = session
            .read_memory(cursor, len)
            .with_context(|| format!("read of {len} byte(s) at {cursor:#010x} failed"))?;
        data.extend_from_slice(&chunk);
        cursor = cursor.wrapping_add(len as u32);
        remaining -= len;
    }
    Ok(data)
}
