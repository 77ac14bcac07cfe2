//! Four-byte handshake with the external driver.
//!
//! ```text
//!   driver                          engine
//!     │ ◀──────── hello (4) ──────────  │   once, before the loop
//!     │ ───────── go (4) ─────────────▶ │   per round
//!     │ ◀──────── child pid (4) ──────  │
//!     │ ◀──────── wait status (4) ────  │
//! ```
//!
//! Pid and status are raw native-endian `int`s, the shape existing drivers
//! read. The contents of hello and go are ignored.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{FromRawFd, RawFd};

use super::config::ForkServerConfig;
use super::split::Pid;

/// Size of every handshake message.
pub const HANDSHAKE_LEN: usize = 4;

/// Engine-side ends of the driver's control and status descriptors.
pub struct DriverLink<R = File, W = File> {
    control: R,
    status: W,
}

impl DriverLink<File, File> {
    /// Take ownership of the descriptors named by `config`.
    ///
    /// Returns `None` if either is not open, i.e. nobody launched us as a
    /// fork server.
    pub fn open(config: &ForkServerConfig) -> Option<Self> {
        if !fd_is_open(config.control_fd) || !fd_is_open(config.status_fd) {
            log::debug!(
                "[ForkServer] descriptors {}/{} not open",
                config.control_fd,
                config.status_fd
            );
            return None;
        }

        // SAFETY: both descriptors are open and were handed to this process
        // by the driver for its exclusive use.
        let (control, status) = unsafe {
            (
                File::from_raw_fd(config.control_fd),
                File::from_raw_fd(config.status_fd),
            )
        };
        Some(Self::new(control, status))
    }
}

impl<R: Read, W: Write> DriverLink<R, W> {
    pub fn new(control: R, status: W) -> Self {
        Self { control, status }
    }

    /// Announce that the engine is alive.
    pub fn send_hello(&mut self) -> io::Result<()> {
        self.send([0u8; HANDSHAKE_LEN])
    }

    /// Block until the driver asks for the next round.
    pub fn await_go(&mut self) -> io::Result<()> {
        let mut token = [0u8; HANDSHAKE_LEN];
        self.control.read_exact(&mut token)
    }

    pub fn report_child(&mut self, pid: Pid) -> io::Result<()> {
        self.send(pid.to_ne_bytes())
    }

    pub fn report_status(&mut self, status: i32) -> io::Result<()> {
        self.send(status.to_ne_bytes())
    }

    pub fn into_inner(self) -> (R, W) {
        (self.control, self.status)
    }

    /// One write, all four bytes, or an error.
    fn send(&mut self, token: [u8; HANDSHAKE_LEN]) -> io::Result<()> {
        match self.status.write(&token)? {
            HANDSHAKE_LEN => Ok(()),
            n => Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short handshake write ({} of {} bytes)", n, HANDSHAKE_LEN),
            )),
        }
    }
}

fn fd_is_open(fd: RawFd) -> bool {
    fd >= 0 && unsafe { libc::fcntl(fd, libc::F_GETFD) } != -1
}
