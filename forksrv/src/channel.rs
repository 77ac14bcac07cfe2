//! Per-round request channel between one forked child and the engine.
//!
//! A fresh pipe is created for every fork round. The child keeps the write
//! end (optionally pinned to a well-known descriptor number so the target
//! side can find it without negotiation) and the engine keeps the read end.
//! The child exiting, cleanly or not, closes the write end; the reader then
//! sees end-of-file and the round's drain phase is over.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::error::WireError;
use crate::request::{REQUEST_WIRE_LEN, TranslationRequest};

/// Child-side end of the request channel.
#[derive(Debug)]
pub enum RequestSender {
    Connected(File),
    /// No engine is listening (standalone run or the engine itself)
    Disconnected,
}

impl RequestSender {
    pub fn disconnected() -> Self {
        RequestSender::Disconnected
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, RequestSender::Connected(_))
    }

    /// Send a request without waiting for it to be served.
    ///
    /// Returns `false` if the channel is closed or the record could not be
    /// written in one piece. Callers are expected to ignore failures: a lost
    /// request only means the next child starts with a colder cache.
    pub fn submit(&self, request: &TranslationRequest) -> bool {
        let RequestSender::Connected(file) = self else {
            return false;
        };

        let buf = request.encode();
        let mut writer: &File = file;
        match writer.write(&buf) {
            Ok(REQUEST_WIRE_LEN) => {
                log::trace!("[TslChannel] sent {}", hex::encode(buf));
                true
            }
            Ok(n) => {
                log::debug!("[TslChannel] short write ({} of {} bytes)", n, REQUEST_WIRE_LEN);
                false
            }
            Err(e) => {
                log::debug!("[TslChannel] submit failed: {}", e);
                false
            }
        }
    }
}

/// Engine-side end of the request channel.
pub struct RequestReceiver<R = File> {
    reader: R,
}

impl<R: Read> RequestReceiver<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Block until the next record arrives.
    ///
    /// `None` means the channel is finished: the writer closed it, or the
    /// stream ended in the middle of a record. Neither is an error.
    pub fn recv(&mut self) -> Option<Result<TranslationRequest, WireError>> {
        let mut buf = [0u8; REQUEST_WIRE_LEN];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => Some(TranslationRequest::decode(&buf)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => None,
            Err(e) => {
                log::debug!("[TslChannel] read ended: {}", e);
                None
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> Iterator for RequestReceiver<R> {
    type Item = Result<TranslationRequest, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

/// Create the channel for one fork round.
///
/// With `pin = Some(fd)` the write end is moved onto descriptor `fd`,
/// replacing whatever was there.
pub fn open(pin: Option<RawFd>) -> io::Result<(RequestSender, RequestReceiver<File>)> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: pipe(2) succeeded, both descriptors are fresh and unowned.
    let (read_end, write_end) =
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    let write_end = match pin {
        Some(fd) if fd == read_end.as_raw_fd() => {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("request descriptor {} collides with the pipe read end", fd),
            ));
        }
        Some(fd) => pin_descriptor(write_end, fd)?,
        None => write_end,
    };

    Ok((
        RequestSender::Connected(File::from(write_end)),
        RequestReceiver::new(File::from(read_end)),
    ))
}

fn pin_descriptor(owned: OwnedFd, target: RawFd) -> io::Result<OwnedFd> {
    if owned.as_raw_fd() == target {
        return Ok(owned);
    }

    if unsafe { libc::dup2(owned.as_raw_fd(), target) } < 0 {
        return Err(io::Error::last_os_error());
    }
    drop(owned);

    // SAFETY: dup2 succeeded, so `target` is open and now refers to our pipe.
    Ok(unsafe { OwnedFd::from_raw_fd(target) })
}
