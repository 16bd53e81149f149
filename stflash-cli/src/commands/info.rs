//! Info command: show bootloader version and supported commands.

use anyhow::Result;
use console::style;

use crate::{Cli, connect};

/// Connect and print what the bootloader reports about itself.
pub fn info(cli: &Cli) -> Result<()> {
    let session = connect(cli)?;

    let version = session.version().unwrap_or(0);
    println!("Bootloader version: {}.{}", version >> 4, version & 0xF);
    println!("Supported commands:");
    for opcode in session.commands().opcodes() {
        println!(
            "  {:#04x}  {}",
            opcode,
            style(command_name(*opcode)).cyan()
        );
    }

    Ok(())
}

/// Human-readable name for a bootloader opcode.
fn command_name(opcode: u8) -> &'static str {
    match opcode {
        0x00 => "Get",
        0x01 => "Get Version",
        0x02 => "Get ID",
        0x11 => "Read Memory",
        0x21 => "Go",
        0x31 => "Write Memory",
        0x43 => "Erase",
        0x44 => "Extended Erase",
        0x63 => "Write Protect",
        0x73 => "Write Unprotect",
        0x82 => "Readout Protect",
        0x92 => "Readout Unprotect",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names() {
        assert_eq!(command_name(0x00), "Get");
        assert_eq!(command_name(0x31), "Write Memory");
        assert_eq!(command_name(0x44), "Extended Erase");
        assert_eq!(command_name(0xAB), "Unknown");
    }
}
