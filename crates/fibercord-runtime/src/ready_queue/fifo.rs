//! FIFO ready queue

use super::ReadyQueue;
use fibercord_core::FiberId;
use std::collections::VecDeque;

const INITIAL_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct FifoQueue {
    queue: VecDeque<FiberId>,
}

impl FifoQueue {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::with_capacity(INITIAL_CAPACITY),
        }
    }
}

impl Default for FifoQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyQueue for FifoQueue {
    #[inline]
    fn push(&mut self, id: FiberId) {
        self.queue.push_back(id);
    }

    #[inline]
    fn push_front(&mut self, id: FiberId) {
        self.queue.push_front(id);
    }

    #[inline]
    fn pop(&mut self) -> Option<FiberId> {
        self.queue.pop_front()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn name(&self) -> &'static str {
        "fifo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fid(n: u64) -> FiberId {
        FiberId::from_raw(n)
    }

    #[test]
    fn test_fifo_order() {
        let mut q = FifoQueue::new();
        q.push(fid(101));
        q.push(fid(102));
        q.push(fid(103));
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), Some(fid(101)));
        assert_eq!(q.pop(), Some(fid(102)));
        assert_eq!(q.pop(), Some(fid(103)));
        assert!(q.is_empty());
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_push_front_runs_next() {
        let mut q = FifoQueue::new();
        q.push(fid(101));
        q.push(fid(102));
        q.push_front(fid(200));
        assert_eq!(q.pop(), Some(fid(200)));
        assert_eq!(q.pop(), Some(fid(101)));
    }
}
