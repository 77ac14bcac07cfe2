//! Fork server: driver handshake, fork rounds and the process role.

pub mod config;
pub mod coordinator;
pub mod handshake;
pub mod role;
pub mod split;

pub use config::{ForkServerConfig, FORKSRV_FD};
pub use coordinator::ForkServer;
pub use handshake::{DriverLink, HANDSHAKE_LEN};
pub use role::ProcessRole;
pub use split::{OsFork, Pid, Split, Splitter};
