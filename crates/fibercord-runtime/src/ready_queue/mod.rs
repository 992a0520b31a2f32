//! Ready queue abstraction for cord scheduling
//!
//! A cord runs one fiber at a time, so the queue is plain cord-local data
//! behind the scheduler's `RefCell`; no locking.
//!
//! # Implementations
//! - `FifoQueue` - strict FIFO with a front slot for synchronous handoff

mod fifo;

pub use fifo::FifoQueue;

use fibercord_core::FiberId;

/// Trait for ready queue implementations
///
/// The scheduler only pushes a fiber when it becomes `Ready`, and a fiber
/// leaves `Ready` only by being popped, so an id is queued at most once.
pub trait ReadyQueue {
    /// Make a fiber runnable after everything already queued.
    fn push(&mut self, id: FiberId);

    /// Make a fiber the very next one to run.
    ///
    /// Used by `start` and by the return from a started fiber to its caller.
    fn push_front(&mut self, id: FiberId);

    /// Next fiber to run.
    fn pop(&mut self) -> Option<FiberId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Queue used by new cords.
pub fn create_ready_queue() -> Box<dyn ReadyQueue> {
    Box::new(FifoQueue::new())
}
