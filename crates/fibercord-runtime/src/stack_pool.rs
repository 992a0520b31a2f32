//! Stack pool
//!
//! Dead fibers with a default-size stack are kept whole (record, stack and
//! context) and handed to the next `create`, which skips the mmap and the
//! fresh context setup. Custom-size stacks and anything past `pool_max` go
//! to the garbage list until `collect_garbage` unmaps them.

use fibercord_core::error::MemoryError;
use fibercord_core::kdebug;

use crate::fiber::FiberRecord;
use crate::memory::Stack;

pub(crate) struct StackPool {
    pool: Vec<FiberRecord>,
    garbage: Vec<FiberRecord>,
    pool_max: usize,
    /// Mapped bytes of every stack this pool has handed out and not yet freed.
    stack_bytes: usize,
}

impl StackPool {
    pub(crate) fn new(pool_max: usize) -> Self {
        Self {
            pool: Vec::new(),
            garbage: Vec::new(),
            pool_max,
            stack_bytes: 0,
        }
    }

    /// Map a fresh stack and account for it.
    pub(crate) fn alloc_stack(&mut self, size: usize) -> Result<Stack, MemoryError> {
        let stack = Stack::new(size)?;
        self.stack_bytes += stack.mapped_bytes();
        Ok(stack)
    }

    /// Most recently recycled default-size fiber, if any.
    #[inline]
    pub(crate) fn pop(&mut self) -> Option<FiberRecord> {
        self.pool.pop()
    }

    /// Take back a recycled fiber.
    pub(crate) fn release(&mut self, rec: FiberRecord) {
        if rec.pooled && self.pool.len() < self.pool_max {
            self.pool.push(rec);
        } else {
            self.garbage.push(rec);
        }
    }

    /// Unmap every stack on the garbage list. Returns how many were freed.
    pub(crate) fn collect_garbage(&mut self) -> usize {
        let freed = self.garbage.len();
        for rec in self.garbage.drain(..) {
            self.stack_bytes -= rec.stack.mapped_bytes();
        }
        if freed > 0 {
            kdebug!("collected {} dead fiber stacks", freed);
        }
        freed
    }

    #[inline]
    pub(crate) fn pooled(&self) -> usize {
        self.pool.len()
    }

    #[inline]
    pub(crate) fn garbage(&self) -> usize {
        self.garbage.len()
    }

    #[inline]
    pub(crate) fn stack_bytes_used(&self) -> usize {
        self.stack_bytes
    }
}
