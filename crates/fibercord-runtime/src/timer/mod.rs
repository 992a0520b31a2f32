//! Cord-local timers
//!
//! Every sleeping or deadline-bounded fiber owns at most one pending timer.
//! The fiber records the handle it armed; the scheduler only wakes a fiber
//! for an expired timer whose handle still matches that record, so a timer
//! outliving the wait that armed it (early wakeup, recycle) fires into
//! nothing.
//!
//! ```text
//!   sleep / wait_dead ──insert──► dyn TimerBackend ◄──cancel── resume / recycle
//!                                        │
//!                           poll_expired (scheduler loop)
//!                                        ▼
//!                          (fid, handle) ──► wakeup if handle matches
//! ```

mod heap;

pub use heap::{HeapTimerBackend, HeapTimerStats};

use fibercord_core::FiberId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Unique timer handle, used for cancellation and stale-fire detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TimerHandle(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Pending one-shot timer.
#[derive(Debug, Clone)]
pub struct TimerEntry {
    pub handle: TimerHandle,
    pub deadline: Instant,
    /// Fiber to wake on expiry.
    pub fid: FiberId,
}

impl TimerEntry {
    pub fn at(fid: FiberId, deadline: Instant) -> Self {
        Self {
            handle: TimerHandle::new(),
            deadline,
            fid,
        }
    }
}

/// Expired timer handed back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiredTimer {
    pub fid: FiberId,
    pub handle: TimerHandle,
}

/// Timer storage used by a cord's event loop.
///
/// Single-threaded: a backend lives inside one cord and is only touched by
/// its scheduler.
pub trait TimerBackend {
    fn insert(&mut self, entry: TimerEntry) -> TimerHandle;

    /// Cancel a timer. Returns false if it was unknown or already fired.
    fn cancel(&mut self, handle: TimerHandle) -> bool;

    /// Remove and return every timer due at `now`, earliest first.
    fn poll_expired(&mut self, now: Instant) -> Vec<ExpiredTimer>;

    /// Earliest pending deadline, if any.
    fn next_deadline(&mut self) -> Option<Instant>;

    /// Number of live (not cancelled) timers.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Backend used by new cords.
pub fn create_backend() -> Box<dyn TimerBackend> {
    Box::new(HeapTimerBackend::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timer_handle_uniqueness() {
        let handles: Vec<_> = (0..1000).map(|_| TimerHandle::new()).collect();
        let unique: std::collections::HashSet<_> = handles.iter().collect();
        assert_eq!(handles.len(), unique.len());
    }

    #[test]
    fn test_default_backend() {
        let mut backend = create_backend();
        assert_eq!(backend.name(), "binary_heap");
        assert!(backend.is_empty());

        let fid = FiberId::from_raw(500);
        let handle = backend.insert(TimerEntry::at(fid, Instant::now()));
        let expired = backend.poll_expired(Instant::now() + Duration::from_millis(1));
        assert_eq!(expired, vec![ExpiredTimer { fid, handle }]);
    }
}
