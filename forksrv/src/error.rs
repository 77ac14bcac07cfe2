use std::io;

use thiserror::Error;

/// Fatal conditions of the fork server loop.
///
/// Every variant ends the engine process. The driver on the other side of the
/// status descriptor only sees the exit code, so each cause gets its own.
#[derive(Debug, Error)]
pub enum ForkServerError {
    #[error("driver closed the control channel")]
    DriverGone,
    #[error("failed to set up the request channel: {0}")]
    Channel(#[source] io::Error),
    #[error("fork failed: {0}")]
    Fork(#[source] io::Error),
    #[error("failed to report child pid {pid} to the driver: {source}")]
    ReportPid {
        pid: i32,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for child {pid}: {source}")]
    Wait {
        pid: i32,
        #[source]
        source: io::Error,
    },
    #[error("failed to report exit status {status:#x} to the driver: {source}")]
    ReportStatus {
        status: i32,
        #[source]
        source: io::Error,
    },
}

impl ForkServerError {
    /// Process exit code the driver expects for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ForkServerError::DriverGone => 2,
            ForkServerError::Channel(_) => 3,
            ForkServerError::Fork(_) => 4,
            ForkServerError::ReportPid { .. } => 5,
            ForkServerError::Wait { .. } => 6,
            ForkServerError::ReportStatus { .. } => 7,
        }
    }
}

/// Failure reported by the translation engine for a single code region.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("no code mapped at {0:#x}")]
    Unmapped(u64),
    #[error("translation of {pc:#x} failed: {reason}")]
    Failed { pc: u64, reason: String },
}

/// A request record that could not be decoded.
#[derive(Debug, Error)]
#[error("malformed translation request: {0}")]
pub struct WireError(#[from] pub bincode::Error);
