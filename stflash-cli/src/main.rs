//! stflash CLI - Command-line tool for flashing STM32 chips over the
//! built-in USART serial bootloader.
//!
//! ## Features
//!
//! - Upload Intel HEX firmware images
//! - Read, dump and erase target memory
//! - Jump to application code
//! - Shell completion generation
//! - Environment variable support

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use console::style;
use env_logger::Env;
use log::debug;
use stflash::{BootSession, NativePort, Parity, SerialConfig};

mod commands;

/// stflash - flash STM32 chips through the USART serial bootloader.
///
/// Environment variables:
///   STFLASH_PORT - Default serial port
///   STFLASH_BAUD - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "stflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (e.g. /dev/ttyUSB0, COM3).
    #[arg(short, long, global = true, env = "STFLASH_PORT")]
    port: Option<String>,

    /// Baud rate (the bootloader auto-detects it from the sync byte).
    #[arg(
        short,
        long,
        global = true,
        default_value = "115200",
        env = "STFLASH_BAUD"
    )]
    baud: u32,

    /// Serial parity. The bootloader USART expects even parity; some
    /// USB bridges only do none.
    #[arg(long, global = true, default_value = "even")]
    parity: CliParity,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Serial parity options.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliParity {
    /// Even parity (bootloader default).
    Even,
    /// Odd parity.
    Odd,
    /// No parity.
    None,
}

impl From<CliParity> for Parity {
    fn from(parity: CliParity) -> Self {
        match parity {
            CliParity::Even => Parity::Even,
            CliParity::Odd => Parity::Odd,
            CliParity::None => Parity::None,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload an Intel HEX firmware image.
    Flash {
        /// Path to the HEX image.
        image: PathBuf,

        /// Erase the whole flash before writing.
        #[arg(long)]
        mass_erase: bool,

        /// Jump to the image's entry point after writing.
        #[arg(long)]
        go: bool,
    },

    /// Connect and show bootloader version and supported commands.
    Info,

    /// Hex-dump target memory to stdout.
    Dump {
        /// Start address (0x prefix supported).
        #[arg(value_parser = parse_int::parse::<u32>)]
        address: u32,

        /// Number of bytes to read.
        #[arg(default_value = "256", value_parser = parse_int::parse::<u32>)]
        count: u32,
    },

    /// Read target memory into a file.
    Read {
        /// Start address (0x prefix supported).
        #[arg(value_parser = parse_int::parse::<u32>)]
        address: u32,

        /// Number of bytes to read.
        #[arg(value_parser = parse_int::parse::<u32>)]
        count: u32,

        /// Output file.
        out: PathBuf,
    },

    /// Erase flash memory.
    Erase {
        /// Erase the entire flash.
        #[arg(long, conflicts_with = "pages")]
        all: bool,

        /// Erase specific pages (comma-separated page numbers).
        #[arg(long, value_delimiter = ',', value_parser = parse_int::parse::<u16>)]
        pages: Vec<u16>,
    },

    /// Jump to application code at the given address.
    Go {
        /// Start address (0x prefix supported).
        #[arg(value_parser = parse_int::parse::<u32>)]
        address: u32,
    },

    /// List available serial ports.
    ListPorts,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .init();

    debug!("stflash v{}", env!("CARGO_PKG_VERSION"));

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Flash {
            image,
            mass_erase,
            go,
        } => commands::flash(cli, image, *mass_erase, *go),
        Commands::Info => commands::info(cli),
        Commands::Dump { address, count } => commands::dump(cli, *address, *count),
        Commands::Read {
            address,
            count,
            out,
        } => commands::read(cli, *address, *count, out),
        Commands::Erase { all, pages } => commands::erase(cli, *all, pages),
        Commands::Go { address } => commands::go(cli, *address),
        Commands::ListPorts => commands::list_ports(),
        Commands::Completions { shell } => {
            cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Open the serial port and run the bootloader handshake.
fn connect(cli: &Cli) -> Result<BootSession<NativePort>> {
    let port = cli.port.as_deref().context(
        "no serial port specified; use --port or set STFLASH_PORT",
    )?;

    let config = SerialConfig::new(port, cli.baud).with_parity(cli.parity.into());
    let mut session = BootSession::open(&config)
        .with_context(|| format!("failed to open serial port {port}"))?;

    if !cli.quiet {
        eprintln!(
            "{} Connecting to bootloader on {} ({} baud)",
            style("⏳").yellow(),
            style(port).cyan(),
            cli.baud
        );
    }
    session
        .connect()
        .context("bootloader handshake failed (is the chip in bootloader mode?)")?;
    if !cli.quiet {
        let version = session.version().unwrap_or(0);
        eprintln!(
            "{} Connected: bootloader v{}.{}, {} commands",
            style("✓").green(),
            version >> 4,
            version & 0xF,
            session.commands().len()
        );
    }
    Ok(session)
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
