use std::os::fd::RawFd;

/// Control descriptor the driver installs before starting the engine.
pub const FORKSRV_FD: RawFd = 198;

/// Descriptor numbers of the driver handshake and the request channel.
///
/// The protocol fixes their relative layout: status is one above control,
/// and the request channel one below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkServerConfig {
    /// Engine reads "go" tokens here
    pub control_fd: RawFd,
    /// Engine writes hello, child pids and exit statuses here
    pub status_fd: RawFd,
    /// Where each round's channel write end is installed for the child.
    /// `None` leaves it on whatever descriptor `pipe(2)` returned.
    pub request_fd: Option<RawFd>,
}

impl ForkServerConfig {
    pub fn with_control_fd(control_fd: RawFd) -> Self {
        Self {
            control_fd,
            status_fd: control_fd + 1,
            request_fd: Some(control_fd - 1),
        }
    }

    /// Do not pin the request channel to a fixed descriptor.
    pub fn unpinned(mut self) -> Self {
        self.request_fd = None;
        self
    }
}

impl Default for ForkServerConfig {
    fn default() -> Self {
        Self::with_control_fd(FORKSRV_FD)
    }
}
