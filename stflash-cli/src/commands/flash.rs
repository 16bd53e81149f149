//! Flash command: upload an Intel HEX image.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use stflash::upload_hex;

use crate::{Cli, connect};

/// Upload a HEX image, optionally mass-erasing first and jumping to the
/// image's entry point afterwards.
pub fn flash(cli: &Cli, image: &Path, mass_erase: bool, go: bool) -> Result<()> {
    // Read the image before touching the serial port, so a bad path
    // fails without disturbing the target.
    let content = fs::read_to_string(image)
        .with_context(|| format!("failed to read image {}", image.display()))?;
    let total_lines = content.lines().count();

    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({} lines)",
            style("📦").cyan(),
            style(image.display()).cyan(),
            total_lines
        );
    }

    let mut session = connect(cli)?;

    if mass_erase {
        if !cli.quiet {
            eprintln!("{} Erasing flash...", style("🗑").red());
        }
        session.mass_erase().context("mass erase failed")?;
    }

    let pb = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(total_lines as u64);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let lines = content.lines().map(|l| Ok::<_, io::Error>(l.to_string()));
    let summary = upload_hex(&mut session, lines, |line, bytes| {
        pb.set_position(line as u64);
        pb.set_message(format!("{bytes} bytes"));
    })?;

    pb.finish_with_message(format!("{} bytes written", summary.bytes_written));

    if !cli.quiet {
        eprintln!(
            "{} Wrote {} data record(s), {} byte(s)",
            style("✓").green(),
            summary.data_records,
            summary.bytes_written
        );
    }

    if go {
        session
            .go_entry()
            .context("image has no entry point record; use `stflash go <address>`")?;
        if !cli.quiet {
            if let Some(entry) = summary.entry_address {
                eprintln!(
                    "{} Started application at {:#010x}",
                    style("🚀").green(),
                    entry
                );
            }
        }
    }

    if !cli.quiet {
        eprintln!("\n{} Flash completed", style("🎉").green().bold());
    }

    Ok(())
}
