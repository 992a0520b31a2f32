//! Fiber identifier type

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ids up to and including this value are reserved for the runtime.
pub const FIBER_ID_MAX_RESERVED: u64 = 100;

/// Id of the scheduler context of every cord.
pub const SCHED_FIBER_ID: u64 = 1;

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(FIBER_ID_MAX_RESERVED + 1);

/// Unique identifier for a fiber
///
/// Ids come from one process-wide counter and are never handed out twice,
/// so a stale id can never resolve to a fiber created later, on this cord
/// or any other.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FiberId(u64);

impl FiberId {
    /// The scheduler itself; never names a real fiber.
    pub const SCHED: FiberId = FiberId(SCHED_FIBER_ID);

    /// Allocate the next id.
    #[inline]
    pub fn next() -> Self {
        FiberId(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw value, e.g. one read back from a log or a monitoring query.
    #[inline]
    pub const fn from_raw(id: u64) -> Self {
        FiberId(id)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether the id lies in the reserved range.
    #[inline]
    pub const fn is_reserved(self) -> bool {
        self.0 <= FIBER_ID_MAX_RESERVED
    }
}

impl From<FiberId> for u64 {
    #[inline]
    fn from(id: FiberId) -> Self {
        id.0
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberId({})", self.0)
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
