//! The serial-port backend: blocking and timed single-byte I/O over a real
//! 2400/8N1 link, with open-with-retry and close-on-error.
//!
//! Grounded in `serial2::SerialPort`'s `u32` `IntoSettings`, which already
//! configures raw mode, 8 data bits, no parity, one stop bit and no flow
//! control for a given baud rate — the same termios fields the original
//! implementation sets by hand in `EBUS::setupPort`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;

use crate::error::{Error, Result};
use crate::symbol::Symbol;

/// The only baud rate this engine's timing constants (the 51 ms auto-SYN
/// timeout in particular) are calibrated for.
pub const BAUD_RATE: u32 = 2400;

/// Delay between reopen attempts while the device is unavailable.
const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Poll interval used to implement an unbounded [`SerialPort::read`] on top
/// of `serial2`'s timeout-based `read()`. `i32::MAX` milliseconds is as close
/// to "block forever" as the underlying `poll(2)` timeout allows.
const BLOCKING_POLL: Duration = Duration::from_millis(i32::MAX as u64);

/// The byte-level contract the framer needs from a transport: a timed read
/// and a write, each closing the link on I/O failure.
///
/// Mirrors the teacher's split between a concrete connection and the trait
/// the rest of the stack is generic over, so the framer can be exercised
/// against an in-memory double instead of a real device.
pub trait Port {
    fn read_with_timeout(&mut self, timeout: Duration) -> Result<Option<Symbol>>;
    fn write(&mut self, symbol: Symbol) -> Result<()>;
}

/// A 2400-baud serial link to an eBUS adapter.
///
/// `None` in `inner` means the port is currently closed after an I/O error;
/// the next `read`/`write` call reopens it.
pub struct SerialPort {
    path: PathBuf,
    inner: Option<serial2::SerialPort>,
}

impl SerialPort {
    /// Open the device, retrying with a ~1 s pause until it succeeds.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let mut port = Self {
            path: path.as_ref().to_path_buf(),
            inner: None,
        };
        port.reopen();
        port
    }

    /// Block until the device can be (re)opened.
    fn reopen(&mut self) {
        loop {
            match serial2::SerialPort::open(&self.path, BAUD_RATE) {
                Ok(port) => {
                    self.inner = Some(port);
                    return;
                }
                Err(e) => {
                    warn!("failed to open {}: {e}, retrying", self.path.display());
                    std::thread::sleep(REOPEN_DELAY);
                }
            }
        }
    }

    fn close(&mut self) {
        self.inner = None;
    }

    fn port(&mut self) -> &mut serial2::SerialPort {
        if self.inner.is_none() {
            self.reopen();
        }
        self.inner
            .as_mut()
            .expect("reopen always succeeds before returning")
    }

    /// Block until one byte is available.
    fn read_blocking(&mut self) -> Result<Symbol> {
        let port = self.port();
        port.set_read_timeout(BLOCKING_POLL)?;
        let mut buf = [0u8; 1];
        port.read(&mut buf)?;
        Ok(buf[0])
    }

    /// Block until one byte is available; on device error, close the port so
    /// the next call reopens it.
    pub fn read(&mut self) -> Result<Symbol> {
        self.read_blocking().inspect_err(|_| self.close())
    }

    /// Read one byte within `timeout`, or `None` if none arrives in time.
    pub fn read_with_timeout(&mut self, timeout: Duration) -> Result<Option<Symbol>> {
        let result = (|| {
            let port = self.port();
            port.set_read_timeout(timeout)?;
            let mut buf = [0u8; 1];
            match port.read(&mut buf) {
                Ok(_) => Ok(Some(buf[0])),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
                Err(e) => Err(Error::Io(e)),
            }
        })();
        if result.is_err() {
            self.close();
        }
        result
    }

    /// Write exactly one byte.
    pub fn write(&mut self, symbol: Symbol) -> Result<()> {
        let result = (|| -> Result<()> {
            let port = self.port();
            port.write_all(&[symbol])?;
            Ok(())
        })();
        if result.is_err() {
            self.close();
        }
        result
    }
}

impl Port for SerialPort {
    fn read_with_timeout(&mut self, timeout: Duration) -> Result<Option<Symbol>> {
        SerialPort::read_with_timeout(self, timeout)
    }

    fn write(&mut self, symbol: Symbol) -> Result<()> {
        SerialPort::write(self, symbol)
    }
}
