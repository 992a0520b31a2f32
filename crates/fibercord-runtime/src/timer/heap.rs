//! BinaryHeap-based timer backend
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Cancel: O(1) (lazy)
//! - Poll expired: O(k log n) where k = number of expired timers
//! - Next deadline: O(1) amortized
//!
//! # Cancellation Strategy
//!
//! Cancelled handles leave the `pending` set and their heap entries are
//! dropped when they reach the top. Once dead entries outnumber live ones
//! the heap is rebuilt, so far-off deadlines that are armed and cancelled
//! over and over cannot pile up.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;

use super::{ExpiredTimer, TimerBackend, TimerEntry, TimerHandle};

/// Dead entries tolerated on top of the live count before a rebuild.
const COMPACT_SLACK: usize = 32;

/// Min-heap ordering by deadline, ties broken by handle.
struct HeapEntry(TimerEntry);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline == other.0.deadline && self.0.handle == other.0.handle
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.0.deadline.cmp(&self.0.deadline) {
            Ordering::Equal => other.0.handle.raw().cmp(&self.0.handle.raw()),
            ord => ord,
        }
    }
}

/// BinaryHeap-based timer backend
pub struct HeapTimerBackend {
    heap: BinaryHeap<HeapEntry>,
    /// Handles still in `heap`, live ones only.
    pending: HashSet<TimerHandle>,
    total_inserted: u64,
    total_fired: u64,
    total_cancelled: u64,
}

impl HeapTimerBackend {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            pending: HashSet::with_capacity(capacity),
            total_inserted: 0,
            total_fired: 0,
            total_cancelled: 0,
        }
    }

    pub fn stats(&self) -> HeapTimerStats {
        HeapTimerStats {
            active: self.pending.len(),
            pending_cancellations: self.heap.len() - self.pending.len(),
            total_inserted: self.total_inserted,
            total_fired: self.total_fired,
            total_cancelled: self.total_cancelled,
        }
    }

    /// Rebuild the heap without cancelled entries once they dominate it.
    fn maybe_compact(&mut self) {
        if self.heap.len() <= 2 * self.pending.len() + COMPACT_SLACK {
            return;
        }
        let pending = &self.pending;
        self.heap.retain(|e| pending.contains(&e.0.handle));
    }

    /// Drop cancelled entries sitting at the top of the heap.
    fn skip_cancelled(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.pending.contains(&top.0.handle) {
                break;
            }
            self.heap.pop();
        }
    }
}

impl Default for HeapTimerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerBackend for HeapTimerBackend {
    fn insert(&mut self, entry: TimerEntry) -> TimerHandle {
        let handle = entry.handle;
        self.pending.insert(handle);
        self.heap.push(HeapEntry(entry));
        self.total_inserted += 1;
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        let removed = self.pending.remove(&handle);
        if removed {
            self.total_cancelled += 1;
            if self.pending.is_empty() {
                self.heap.clear();
            } else {
                self.maybe_compact();
            }
        }
        removed
    }

    fn poll_expired(&mut self, now: Instant) -> Vec<ExpiredTimer> {
        let mut expired = Vec::new();
        loop {
            self.skip_cancelled();
            match self.heap.peek() {
                Some(top) if top.0.deadline <= now => {}
                _ => break,
            }
            let Some(HeapEntry(entry)) = self.heap.pop() else {
                break;
            };
            self.pending.remove(&entry.handle);
            self.total_fired += 1;
            expired.push(ExpiredTimer {
                fid: entry.fid,
                handle: entry.handle,
            });
        }
        expired
    }

    fn next_deadline(&mut self) -> Option<Instant> {
        self.skip_cancelled();
        self.heap.peek().map(|e| e.0.deadline)
    }

    fn len(&self) -> usize {
        self.pending.len()
    }

    fn name(&self) -> &'static str {
        "binary_heap"
    }
}

/// Statistics for HeapTimerBackend
#[derive(Debug, Clone)]
pub struct HeapTimerStats {
    pub active: usize,
    /// Cancelled but not yet removed from the heap
    pub pending_cancellations: usize,
    pub total_inserted: u64,
    pub total_fired: u64,
    pub total_cancelled: u64,
}
