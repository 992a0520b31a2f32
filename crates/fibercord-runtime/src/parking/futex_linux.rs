//! Linux futex-based cord parking
//!
//! Futex word semantics:
//! - 0 = no wake pending
//! - 1 = wake token pending
//!
//! `park` consumes the token with a swap; FUTEX_WAIT only sleeps while the
//! word is still 0, so a token stored after the swap makes it return at once.

use super::CordParking;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Linux futex-based parking
pub struct FutexParking {
    futex: AtomicU32,
    parked: AtomicBool,
}

impl FutexParking {
    pub fn new() -> Self {
        Self {
            futex: AtomicU32::new(0),
            parked: AtomicBool::new(false),
        }
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl CordParking for FutexParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        if self.futex.swap(0, Ordering::AcqRel) != 0 {
            return true;
        }

        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs().min(i64::MAX as u64) as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        self.parked.store(true, Ordering::SeqCst);
        // Sleeps only while the word is 0. ETIMEDOUT, EAGAIN and EINTR all
        // end up in the swap below.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                0u32,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            );
        }
        self.parked.store(false, Ordering::SeqCst);

        self.futex.swap(0, Ordering::AcqRel) != 0
    }

    fn unpark(&self) {
        self.futex.store(1, Ordering::Release);
        if !self.parked.load(Ordering::SeqCst) {
            return;
        }
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                1i32,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }

    fn is_parked(&self) -> bool {
        self.parked.load(Ordering::Relaxed)
    }
}
