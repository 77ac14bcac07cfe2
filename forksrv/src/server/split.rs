//! Duplicate-and-split primitive behind each fork round.
//!
//! The coordinator only needs two continuations out of a split: the parent
//! learns the child's pid, the child receives the write end of the request
//! channel. [`OsFork`] does this with `fork(2)`, which also hands the child a
//! copy-on-write image of the warm cache. Platforms without `fork` could
//! spawn a fresh image instead, at the cost of re-sending the cache state.

use std::io;

use crate::channel::RequestSender;

pub type Pid = libc::pid_t;

/// Which continuation a split returned into.
#[derive(Debug)]
pub enum Split {
    Parent { child: Pid },
    Child(RequestSender),
}

pub trait Splitter {
    /// Split into parent and child.
    ///
    /// `child_end` must end up only in the child: the parent side has to
    /// drop it, or the drain loop never sees end-of-file.
    fn split(&mut self, child_end: RequestSender) -> io::Result<Split>;

    /// Block until `child` terminates and return its raw wait status.
    fn wait(&mut self, child: Pid) -> io::Result<i32>;
}

/// `fork(2)` / `waitpid(2)`.
///
/// Forking is only safe while the engine runs a single thread; threads of a
/// threaded translation engine do not exist in the child.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFork;

impl Splitter for OsFork {
    fn split(&mut self, child_end: RequestSender) -> io::Result<Split> {
        match unsafe { libc::fork() } {
            -1 => Err(io::Error::last_os_error()),
            0 => Ok(Split::Child(child_end)),
            child => {
                drop(child_end);
                Ok(Split::Parent { child })
            }
        }
    }

    fn wait(&mut self, child: Pid) -> io::Result<i32> {
        let mut status = 0;
        loop {
            if unsafe { libc::waitpid(child, &mut status, 0) } >= 0 {
                return Ok(status);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}
