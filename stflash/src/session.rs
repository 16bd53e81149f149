//! Bootloader session: handshake, capability gating, and the command set.
//!
//! A [`BootSession`] owns the serial channel for the lifetime of one
//! handshake-to-relinquish session and drives the command/acknowledge
//! protocol over it. Every command is a blocking request followed by a
//! blocking, timeout-bounded wait for an acknowledge byte; there is no
//! retry anywhere in this layer, and the first transport failure moves
//! the session into a faulted phase that refuses further commands.
//!
//! ## Phase machine
//!
//! ```text
//! Idle --connect()--> Ready --go()--> Relinquished
//!                       |
//!                       +--transport/ACK/timeout failure--> Faulted
//! ```

use std::io::ErrorKind;
use std::time::Duration;

use log::{debug, info, trace};

use crate::error::{Error, Result};
use crate::port::{NativePort, Port, SerialConfig};
use crate::protocol::wire::{self, ACK, Command, MASS_ERASE_FRAME, NACK, SYNC};

/// Timeout for draining stale bytes before the handshake.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);

/// Timeout for the ACK after the sync byte (the target may still be
/// auto-detecting the baud rate).
const SYNC_ACK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Timeout for ordinary command-stage ACKs and data bytes.
const ACK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Timeout for the ACK that confirms an erase (a full-chip erase takes
/// several seconds on large parts).
const ERASE_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of opcodes a Get reply may carry.
pub const MAX_SUPPORTED_COMMANDS: usize = 15;

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No handshake performed yet.
    Idle,
    /// Handshake complete; commands may be issued.
    Ready,
    /// A command failed on the wire; no further commands are attempted
    /// without a fresh handshake on a fresh session.
    Faulted,
    /// The target jumped to application code and left the bootloader.
    Relinquished,
}

/// The set of command opcodes the connected target reports as supported.
///
/// Populated exactly once during the handshake and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct CommandSet {
    opcodes: Vec<u8>,
}

impl CommandSet {
    fn from_opcodes(opcodes: &[u8]) -> Self {
        Self {
            opcodes: opcodes.to_vec(),
        }
    }

    /// Whether the target reported support for `cmd`.
    pub fn contains(&self, cmd: Command) -> bool {
        self.opcodes.contains(&cmd.opcode())
    }

    /// The reported opcodes, in the order the target listed them.
    pub fn opcodes(&self) -> &[u8] {
        &self.opcodes
    }

    /// Number of reported opcodes.
    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    /// Whether the set is empty (nothing discovered yet).
    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }
}

/// One bootloader session over an exclusively-owned serial channel.
///
/// Generic over the port type `P` so the protocol can be tested against
/// a scripted in-memory port.
pub struct BootSession<P: Port> {
    port: P,
    phase: Phase,
    commands: CommandSet,
    version: Option<u8>,
    base_address: u32,
    entry_address: Option<u32>,
}

impl<P: Port> BootSession<P> {
    /// Create a session over an already-opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            phase: Phase::Idle,
            commands: CommandSet::default(),
            version: None,
            base_address: 0,
            entry_address: None,
        }
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the session and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Bootloader version byte reported by Get (e.g. `0x31` for v3.1).
    pub fn version(&self) -> Option<u8> {
        self.version
    }

    /// Commands the target reported as supported.
    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    /// Extended linear base address accumulated from the image.
    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    /// Program entry address recorded from the image, if any.
    pub fn entry_address(&self) -> Option<u32> {
        self.entry_address
    }

    // Mutated only by HEX records during an upload.
    pub(crate) fn set_base_address(&mut self, base: u32) {
        self.base_address = base;
    }

    pub(crate) fn set_entry_address(&mut self, entry: u32) {
        self.entry_address = Some(entry);
    }

    /// Establish the session: drain stale input, send the sync byte,
    /// await ACK, then discover capabilities with Get.
    ///
    /// The handshake's overall success is exactly the Get command's
    /// success. It is not retried here; a caller may retry on a fresh
    /// attempt since a failed handshake leaves the session idle.
    pub fn connect(&mut self) -> Result<()> {
        if self.phase != Phase::Idle {
            return Err(Error::Session(format!(
                "connect requires a fresh session (phase is {:?})",
                self.phase
            )));
        }

        info!("Connecting to bootloader on {}", self.port.name());
        self.drain_input();

        self.send(&[SYNC])?;
        self.expect_ack(SYNC, SYNC_ACK_TIMEOUT)?;
        debug!("Sync byte acknowledged");

        self.run_get()?;
        self.phase = Phase::Ready;
        info!(
            "Bootloader ready: version {:#04x}, {} commands supported",
            self.version.unwrap_or(0),
            self.commands.len()
        );
        Ok(())
    }

    /// Re-run capability discovery on an established session.
    ///
    /// Get is the one command not gated on the supported-command set,
    /// by protocol convention: it is how that set gets discovered.
    pub fn get(&mut self) -> Result<()> {
        self.require_ready()?;
        self.faulting(Self::run_get)
    }

    /// Read `len` bytes of target memory starting at `address`.
    ///
    /// `len` must be in `1..=256` (one protocol frame).
    pub fn read_memory(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.require_ready()?;
        self.require_supported(Command::ReadMemory)?;
        // Validate the length before touching the transport.
        let length_frame = wire::length_frame(len)?;

        self.faulting(|s| {
            s.send_command(Command::ReadMemory)?;
            s.send_with_ack(
                &wire::address_frame(address),
                Command::ReadMemory.opcode(),
                ACK_TIMEOUT,
            )?;
            s.send_with_ack(&length_frame, Command::ReadMemory.opcode(), ACK_TIMEOUT)?;

            // The target streams the raw bytes with no trailing checksum.
            let mut data = vec![0u8; len];
            s.read_exact_timeout(&mut data, ACK_TIMEOUT, "read memory data")?;
            trace!("Read {len} bytes from {address:#010x}");
            Ok(data)
        })
    }

    /// Write `data` to target memory starting at `address`.
    ///
    /// `data` must fit one protocol frame (`1..=256` bytes); larger
    /// images are split into multiple calls by the upload orchestrator.
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.require_ready()?;
        self.require_supported(Command::WriteMemory)?;
        let payload = wire::write_frame(data)?;

        self.faulting(|s| {
            s.send_command(Command::WriteMemory)?;
            s.send_with_ack(
                &wire::address_frame(address),
                Command::WriteMemory.opcode(),
                ACK_TIMEOUT,
            )?;
            s.send_with_ack(&payload, Command::WriteMemory.opcode(), ACK_TIMEOUT)?;
            debug!("Wrote {} bytes at {address:#010x}", data.len());
            Ok(())
        })
    }

    /// Erase the given flash pages.
    pub fn erase_pages(&mut self, pages: &[u16]) -> Result<()> {
        self.require_ready()?;
        self.require_supported(Command::Erase)?;
        let payload = wire::erase_frame(pages)?;

        self.faulting(|s| {
            s.send_command(Command::Erase)?;
            s.send_with_ack(&payload, Command::Erase.opcode(), ERASE_ACK_TIMEOUT)?;
            info!("Erased {} page(s)", pages.len());
            Ok(())
        })
    }

    /// Erase the entire flash using the protocol's mass-erase sentinel.
    pub fn mass_erase(&mut self) -> Result<()> {
        self.require_ready()?;
        self.require_supported(Command::Erase)?;

        self.faulting(|s| {
            s.send_command(Command::Erase)?;
            s.send_with_ack(&MASS_ERASE_FRAME, Command::Erase.opcode(), ERASE_ACK_TIMEOUT)?;
            info!("Full-chip erase complete");
            Ok(())
        })
    }

    /// Instruct the target to start executing at `address`.
    ///
    /// On success the target has left the bootloader; the session moves
    /// to [`Phase::Relinquished`] and accepts no further commands.
    pub fn go(&mut self, address: u32) -> Result<()> {
        self.require_ready()?;
        self.require_supported(Command::Go)?;

        self.faulting(|s| {
            s.send_command(Command::Go)?;
            s.send_with_ack(&wire::address_frame(address), Command::Go.opcode(), ACK_TIMEOUT)
        })?;

        self.phase = Phase::Relinquished;
        info!("Target jumped to {address:#010x}; session relinquished");
        Ok(())
    }

    /// Jump to the entry address recorded from the uploaded image.
    ///
    /// Fails before any transmission if no start-linear-address record
    /// was seen.
    pub fn go_entry(&mut self) -> Result<()> {
        let entry = self.entry_address.ok_or_else(|| {
            Error::Session("no entry address recorded from the image".into())
        })?;
        self.go(entry)
    }

    /// Read a block of memory and format it as a hex dump.
    ///
    /// Diagnostic convenience; a pure consumer of [`Self::read_memory`]
    /// with no protocol state of its own.
    pub fn dump_memory(&mut self, address: u32, len: usize) -> Result<String> {
        let data = self.read_memory(address, len)?;
        Ok(crate::dump::hexdump(address, &data))
    }

    // ------------------------------------------------------------------
    // Framing engine: send a frame, expect an ACK.
    // ------------------------------------------------------------------

    fn run_get(&mut self) -> Result<()> {
        self.send(&wire::command_frame(Command::Get))?;
        self.expect_ack(Command::Get.opcode(), ACK_TIMEOUT)?;

        let mut count = [0u8; 1];
        self.read_exact_timeout(&mut count, ACK_TIMEOUT, "get reply count")?;
        let n = count[0] as usize;
        if n > MAX_SUPPORTED_COMMANDS {
            return Err(Error::BufferTooSmall {
                requested: n,
                max: MAX_SUPPORTED_COMMANDS,
            });
        }

        // The version byte precedes the n supported opcodes.
        let mut reply = vec![0u8; n + 1];
        self.read_exact_timeout(&mut reply, ACK_TIMEOUT, "get reply body")?;
        self.version = Some(reply[0]);
        self.commands = CommandSet::from_opcodes(&reply[1..]);
        trace!(
            "Get: version {:#04x}, supported opcodes {:02x?}",
            reply[0],
            &reply[1..]
        );
        Ok(())
    }

    fn require_ready(&self) -> Result<()> {
        match self.phase {
            Phase::Ready => Ok(()),
            Phase::Idle => Err(Error::Session("session not connected".into())),
            Phase::Faulted => Err(Error::Session(
                "session faulted; a fresh handshake is required".into(),
            )),
            Phase::Relinquished => Err(Error::Session(
                "target has left the bootloader; session relinquished".into(),
            )),
        }
    }

    fn require_supported(&self, cmd: Command) -> Result<()> {
        if self.commands.contains(cmd) {
            Ok(())
        } else {
            debug!("Command {:#04x} not in supported set", cmd.opcode());
            Err(Error::Unsupported {
                command: cmd.opcode(),
            })
        }
    }

    /// Run a wire operation, moving the session to Faulted on failure.
    fn faulting<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        match op(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.phase = Phase::Faulted;
                Err(err)
            },
        }
    }

    fn send_command(&mut self, cmd: Command) -> Result<()> {
        self.send_with_ack(&wire::command_frame(cmd), cmd.opcode(), ACK_TIMEOUT)
    }

    fn send_with_ack(&mut self, frame: &[u8], command: u8, timeout: Duration) -> Result<()> {
        self.send(frame)?;
        self.expect_ack(command, timeout)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn expect_ack(&mut self, command: u8, timeout: Duration) -> Result<()> {
        let mut byte = [0u8; 1];
        self.read_exact_timeout(&mut byte, timeout, "waiting for ACK")?;
        match byte[0] {
            ACK => Ok(()),
            NACK => Err(Error::Nack { command }),
            other => Err(Error::UnexpectedByte {
                command,
                byte: other,
            }),
        }
    }

    fn read_exact_timeout(&mut self, buf: &mut [u8], timeout: Duration, what: &str) -> Result<()> {
        self.port.set_timeout(timeout)?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => return Err(Error::Timeout(format!("{what}: channel closed"))),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    return Err(Error::Timeout(format!(
                        "{what}: no response within {timeout:?}"
                    )));
                },
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }

    /// Throw away any stale bytes sitting on the channel before the
    /// handshake. Errors here are ignored; the sync exchange decides.
    fn drain_input(&mut self) {
        if let Err(e) = self.port.clear_buffers() {
            trace!("clear_buffers failed (ignoring): {e}");
        }
        if self.port.set_timeout(DRAIN_TIMEOUT).is_err() {
            return;
        }
        let mut scratch = [0u8; 64];
        loop {
            match self.port.read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => trace!("Drained {n} stale byte(s)"),
                Err(_) => break,
            }
        }
    }
}

impl BootSession<NativePort> {
    /// Open the serial port described by `config` and wrap it in a
    /// (not yet connected) session.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        Ok(Self::new(NativePort::open(config)?))
    }
}

#[cfg(test)]
impl<P: Port> BootSession<P> {
    /// Build a Ready session with an injected supported-command set,
    /// skipping the handshake.
    pub(crate) fn ready_with(port: P, opcodes: &[u8]) -> Self {
        let mut session = Self::new(port);
        session.phase = Phase::Ready;
        session.commands = CommandSet::from_opcodes(opcodes);
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockPort;

    #[test]
    fn test_connect_populates_command_set() {
        // ACK(sync), ACK(get), count=3, version, three opcodes
        let port = MockPort::new(&[ACK, ACK, 0x03, 0x31, 0x11, 0x21, 0x31]);
        let mut session = BootSession::new(port);

        session.connect().unwrap();

        assert_eq!(session.phase(), Phase::Ready);
        assert_eq!(session.version(), Some(0x31));
        assert_eq!(session.commands().opcodes(), &[0x11, 0x21, 0x31]);
        assert!(session.commands().contains(Command::ReadMemory));
        assert!(session.commands().contains(Command::Go));
        assert!(session.commands().contains(Command::WriteMemory));
        assert!(!session.commands().contains(Command::Erase));
        // Sync byte then the Get command frame, nothing else.
        assert_eq!(session.port().written, vec![SYNC, 0x00, 0xFF]);
    }

    #[test]
    fn test_connect_rejects_nack() {
        let port = MockPort::new(&[NACK]);
        let mut session = BootSession::new(port);

        assert!(matches!(
            session.connect(),
            Err(Error::Nack { command: SYNC })
        ));
        // Handshake failure leaves the session idle for a retry.
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn test_connect_bounds_get_reply() {
        let port = MockPort::new(&[ACK, ACK, 0xFE]);
        let mut session = BootSession::new(port);

        assert!(matches!(
            session.connect(),
            Err(Error::BufferTooSmall { requested: 0xFE, max: MAX_SUPPORTED_COMMANDS })
        ));
    }

    #[test]
    fn test_unsupported_command_sends_nothing() {
        let mut session = BootSession::ready_with(MockPort::new(&[]), &[0x21]);

        assert!(matches!(
            session.write_memory(0x0800_0000, &[0xAA]),
            Err(Error::Unsupported { command: 0x31 })
        ));
        assert!(matches!(
            session.read_memory(0x0800_0000, 4),
            Err(Error::Unsupported { command: 0x11 })
        ));
        assert!(matches!(
            session.erase_pages(&[0]),
            Err(Error::Unsupported { command: 0x43 })
        ));
        assert!(matches!(
            session.mass_erase(),
            Err(Error::Unsupported { command: 0x43 })
        ));

        // Refusal happens before the transport is touched.
        assert!(session.port().written.is_empty());
        assert_eq!(session.phase(), Phase::Ready);
    }

    #[test]
    fn test_handshake_then_gating_scenario() {
        // Get reports a single supported opcode: Go.
        let port = MockPort::new(&[ACK, ACK, 0x01, 0x31, 0x21, ACK, ACK]);
        let mut session = BootSession::new(port);
        session.connect().unwrap();
        assert_eq!(session.commands().opcodes(), &[0x21]);

        // Write Memory is refused without any transmission.
        let written_before = session.port().written.len();
        assert!(matches!(
            session.write_memory(0x0800_0000, &[1, 2]),
            Err(Error::Unsupported { command: 0x31 })
        ));
        assert_eq!(session.port().written.len(), written_before);

        // Go produces the correct two-byte opcode frame and succeeds.
        session.go(0x0800_0000).unwrap();
        let written = &session.port().written[written_before..];
        assert_eq!(&written[..2], &[0x21, 0xDE]);
        assert_eq!(&written[2..], &[0x08, 0x00, 0x00, 0x00, 0x08]);
        assert_eq!(session.phase(), Phase::Relinquished);
    }

    #[test]
    fn test_write_memory_frame_sequence() {
        let mut session = BootSession::ready_with(MockPort::new(&[ACK, ACK, ACK]), &[0x31]);

        session.write_memory(0x0800_0000, &[0x01, 0x02, 0x03, 0x04]).unwrap();

        let written = &session.port().written;
        // Command frame, address frame, payload frame.
        assert_eq!(&written[..2], &[0x31, 0xCE]);
        assert_eq!(&written[2..7], &[0x08, 0x00, 0x00, 0x00, 0x08]);
        assert_eq!(
            &written[7..],
            &[0x03, 0x01, 0x02, 0x03, 0x04, 0x03 ^ 0x01 ^ 0x02 ^ 0x03 ^ 0x04]
        );
    }

    #[test]
    fn test_read_memory_frame_sequence() {
        let mut session = BootSession::ready_with(
            MockPort::new(&[ACK, ACK, ACK, 0xDE, 0xAD, 0xBE, 0xEF]),
            &[0x11],
        );

        let data = session.read_memory(0x2000_0100, 4).unwrap();
        assert_eq!(data, vec![0xDE, 0xAD, 0xBE, 0xEF]);

        let written = &session.port().written;
        assert_eq!(&written[..2], &[0x11, 0xEE]);
        assert_eq!(&written[2..7], &[0x20, 0x00, 0x01, 0x00, 0x21]);
        assert_eq!(&written[7..], &[0x03, 0xFC]);
    }

    #[test]
    fn test_read_memory_rejects_bad_length_without_traffic() {
        let mut session = BootSession::ready_with(MockPort::new(&[]), &[0x11]);
        assert!(session.read_memory(0, 0).is_err());
        assert!(session.read_memory(0, 257).is_err());
        assert!(session.port().written.is_empty());
        assert_eq!(session.phase(), Phase::Ready);
    }

    #[test]
    fn test_erase_pages_frame_sequence() {
        let mut session = BootSession::ready_with(MockPort::new(&[ACK, ACK]), &[0x43]);

        session.erase_pages(&[0x0001, 0x0002]).unwrap();

        let written = &session.port().written;
        assert_eq!(&written[..2], &[0x43, 0xBC]);
        assert_eq!(&written[2..], &[0x01, 0x00, 0x01, 0x00, 0x02, 0x01 ^ 0x01 ^ 0x02]);
    }

    #[test]
    fn test_mass_erase_sends_sentinel() {
        let mut session = BootSession::ready_with(MockPort::new(&[ACK, ACK]), &[0x43]);

        session.mass_erase().unwrap();

        assert_eq!(session.port().written, vec![0x43, 0xBC, 0xFF, 0x00]);
    }

    #[test]
    fn test_nack_faults_session() {
        let mut session = BootSession::ready_with(MockPort::new(&[NACK]), &[0x31]);

        assert!(matches!(
            session.write_memory(0x0800_0000, &[0xAA]),
            Err(Error::Nack { command: 0x31 })
        ));
        assert_eq!(session.phase(), Phase::Faulted);
    }

    #[test]
    fn test_unexpected_byte_faults_session() {
        let mut session = BootSession::ready_with(MockPort::new(&[0x42]), &[0x21]);

        assert!(matches!(
            session.go(0),
            Err(Error::UnexpectedByte { command: 0x21, byte: 0x42 })
        ));
        assert_eq!(session.phase(), Phase::Faulted);
    }

    #[test]
    fn test_timeout_faults_session_without_state_mutation() {
        // The port never answers: every command times out.
        let mut session =
            BootSession::ready_with(MockPort::new(&[]), &[0x11, 0x21, 0x31, 0x43]);

        assert!(matches!(
            session.write_memory(0x0800_0000, &[0xAA]),
            Err(Error::Timeout(_))
        ));
        assert_eq!(session.phase(), Phase::Faulted);
        assert_eq!(session.base_address(), 0);
        assert_eq!(session.entry_address(), None);

        // Once faulted, nothing else is attempted on the wire.
        let written_before = session.port().written.len();
        assert!(matches!(session.read_memory(0, 4), Err(Error::Session(_))));
        assert!(matches!(session.go(0), Err(Error::Session(_))));
        assert_eq!(session.port().written.len(), written_before);
    }

    #[test]
    fn test_go_entry_unset_fails_without_traffic() {
        let mut session = BootSession::ready_with(MockPort::new(&[]), &[0x21]);

        assert!(matches!(session.go_entry(), Err(Error::Session(_))));
        assert!(session.port().written.is_empty());
        assert_eq!(session.phase(), Phase::Ready);
    }

    #[test]
    fn test_relinquished_session_refuses_commands() {
        let mut session = BootSession::ready_with(MockPort::new(&[ACK, ACK]), &[0x21]);
        session.go(0x0800_0000).unwrap();

        assert!(matches!(session.go(0x0800_0000), Err(Error::Session(_))));
        assert!(matches!(session.connect(), Err(Error::Session(_))));
    }

    #[test]
    fn test_dump_memory_formats_read() {
        let mut session = BootSession::ready_with(
            MockPort::new(&[ACK, ACK, ACK, 0x00, 0x11, 0x22, 0x33]),
            &[0x11],
        );

        let dump = session.dump_memory(0x0800_0000, 4).unwrap();
        assert!(dump.contains("08000000:"));
        assert!(dump.contains("00 11 22 33"));
    }
}
