//! Scripted in-memory port for protocol tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

/// A [`Port`] that replays a scripted byte sequence and captures
/// everything written to it.
///
/// Scripted bytes become readable only after the first write, mirroring
/// a target that only speaks when spoken to; until then (and once the
/// script runs dry) reads fail with `TimedOut`.
pub(crate) struct MockPort {
    script: VecDeque<u8>,
    pub(crate) written: Vec<u8>,
    started: bool,
    timeout: Duration,
    baud_rate: u32,
}

impl MockPort {
    pub(crate) fn new(script: &[u8]) -> Self {
        Self {
            script: script.iter().copied().collect(),
            written: Vec::new(),
            started: false,
            timeout: Duration::from_millis(1000),
            baud_rate: 115_200,
        }
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.started || self.script.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no scripted data"));
        }
        let n = buf.len().min(self.script.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.script.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.started = true;
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
