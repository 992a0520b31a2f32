//! Unix stack mapping using mmap

use super::Stack;
use fibercord_core::error::MemoryError;
use nix::unistd::{sysconf, SysconfVar};
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

const FALLBACK_PAGE_SIZE: usize = 4096;

/// System page size, queried once.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as usize,
        _ => FALLBACK_PAGE_SIZE,
    })
}

#[cfg(target_os = "linux")]
const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK;

#[cfg(not(target_os = "linux"))]
const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANON;

impl Stack {
    /// Map a stack with at least `size` usable bytes plus a guard page.
    pub fn new(size: usize) -> Result<Self, MemoryError> {
        let guard = page_size();
        let usable = Self::round_size(size.max(guard))?;
        let mapped = usable.checked_add(guard).ok_or(MemoryError::SizeOverflow)?;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapped,
                libc::PROT_READ | libc::PROT_WRITE,
                MAP_FLAGS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed);
        }

        // Stacks grow down: the guard sits at the lowest address.
        let ret = unsafe { libc::mprotect(base, guard, libc::PROT_NONE) };
        if ret != 0 {
            unsafe { libc::munmap(base, mapped) };
            return Err(MemoryError::ProtectionFailed);
        }

        let base = NonNull::new(base as *mut u8).ok_or(MemoryError::AllocationFailed)?;
        Ok(Stack { base, mapped, guard })
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.mapped);
        }
    }
}
