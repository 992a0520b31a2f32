//! Fiber stacks
//!
//! Each stack is its own anonymous mapping with one PROT_NONE guard page at
//! the low end, so an overflow faults instead of corrupting a neighbour.
//! Platform-specific code maps and unmaps; this module owns the layout.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::page_size;
    } else {
        compile_error!("fibercord stacks require a unix mmap");
    }
}

use std::ptr::NonNull;

use fibercord_core::constants::STACK_ALIGN;
use fibercord_core::error::MemoryError;

/// Execution stack owned by exactly one fiber record.
pub struct Stack {
    /// Start of the mapping (the guard page).
    base: NonNull<u8>,
    /// Whole mapping, guard included.
    mapped: usize,
    guard: usize,
}

impl Stack {
    /// Round `size` up to whole pages.
    pub fn round_size(size: usize) -> Result<usize, MemoryError> {
        let page = page_size();
        size.checked_add(page - 1)
            .map(|s| s & !(page - 1))
            .ok_or(MemoryError::SizeOverflow)
    }

    /// Highest usable address, aligned for the initial frame.
    #[inline]
    pub fn top(&self) -> *mut u8 {
        let end = self.base.as_ptr() as usize + self.mapped;
        (end & !(STACK_ALIGN - 1)) as *mut u8
    }

    /// Lowest usable address, right above the guard page.
    #[inline]
    pub fn bottom(&self) -> *mut u8 {
        self.base.as_ptr().wrapping_add(self.guard)
    }

    /// Usable bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.mapped - self.guard
    }

    /// Bytes of address space this stack holds, guard included.
    #[inline]
    pub fn mapped_bytes(&self) -> usize {
        self.mapped
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("bottom", &self.bottom())
            .field("size", &self.size())
            .finish()
    }
}
