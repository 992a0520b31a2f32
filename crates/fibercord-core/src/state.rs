//! Fiber state types

use core::fmt;
use std::time::Instant;

use crate::id::FiberId;

/// Why a fiber is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    /// Yielded without requeue; resumes on an explicit wakeup or a cancel.
    Parked,

    /// Sleeping until the deadline, or forever when there is none.
    Sleeping { deadline: Option<Instant> },

    /// Blocked in `join` on the target.
    Joining { target: FiberId },

    /// Blocked in `wait_dead` on the target.
    WaitingDead { target: FiberId },

    /// Blocked in a synchronous `start` of the callee.
    Calling { callee: FiberId },

    /// Waiting for another cord to finish.
    CordJoin,

    /// Waiting for client fibers to die during shutdown.
    Shutdown,
}

/// State of a fiber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Created, never scheduled
    New,

    /// In the ready queue
    Ready,

    /// Currently executing on the cord thread
    Running,

    /// Off the ready queue until something wakes it
    Suspended(SuspendReason),

    /// Entry function returned; record retained only for joinable fibers
    Dead,
}

impl FiberState {
    #[inline]
    pub const fn is_dead(&self) -> bool {
        matches!(self, FiberState::Dead)
    }

    #[inline]
    pub const fn is_suspended(&self) -> bool {
        matches!(self, FiberState::Suspended(_))
    }

    /// A wakeup moves the fiber onto the ready queue only from these states.
    #[inline]
    pub const fn is_wakeable(&self) -> bool {
        matches!(self, FiberState::New | FiberState::Suspended(_))
    }

    /// Short lowercase label for monitoring output.
    pub const fn label(&self) -> &'static str {
        match self {
            FiberState::New => "new",
            FiberState::Ready => "ready",
            FiberState::Running => "running",
            FiberState::Suspended(_) => "suspended",
            FiberState::Dead => "dead",
        }
    }
}

impl fmt::Display for FiberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiberState::Suspended(SuspendReason::Joining { target }) => {
                write!(f, "suspended (joining {})", target)
            }
            FiberState::Suspended(SuspendReason::WaitingDead { target }) => {
                write!(f, "suspended (waiting for {} to die)", target)
            }
            FiberState::Suspended(SuspendReason::Calling { callee }) => {
                write!(f, "suspended (calling {})", callee)
            }
            FiberState::Suspended(reason) => write!(f, "suspended ({:?})", reason),
            other => f.write_str(other.label()),
        }
    }
}
