use std::fmt;

use super::split::Pid;

/// Which side of the fork server this process is on.
///
/// An engine alternates between idle and driving a child every round; only
/// `ForkedChild` is terminal. It is set once at the fork point and a process
/// that becomes one stays one for the rest of its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessRole {
    #[default]
    EngineIdle,
    EngineDriving {
        child: Pid,
    },
    ForkedChild,
}

impl ProcessRole {
    pub fn is_forked_child(&self) -> bool {
        matches!(self, ProcessRole::ForkedChild)
    }

    pub fn is_engine(&self) -> bool {
        !self.is_forked_child()
    }

    /// Child currently being driven, if any.
    pub fn child(&self) -> Option<Pid> {
        match self {
            ProcessRole::EngineDriving { child } => Some(*child),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::EngineIdle => write!(f, "engine (idle)"),
            ProcessRole::EngineDriving { child } => write!(f, "engine (driving {})", child),
            ProcessRole::ForkedChild => write!(f, "forked child"),
        }
    }
}
