//! Thread-local cord context
//!
//! The cord running on this OS thread, installed for the duration of
//! `run` and cleared before the cord is torn down.

use crate::cord::Cord;
use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr;

thread_local! {
    static CURRENT_CORD: Cell<*const Cord> = const { Cell::new(ptr::null()) };
}

/// Clears the thread's cord on drop.
pub(crate) struct CordGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for CordGuard {
    fn drop(&mut self) {
        CURRENT_CORD.with(|c| c.set(ptr::null()));
    }
}

/// Install `cord` as this thread's cord. `None` if one is already running.
pub(crate) fn enter(cord: &Cord) -> Option<CordGuard> {
    CURRENT_CORD.with(|c| {
        if !c.get().is_null() {
            return None;
        }
        c.set(cord as *const Cord);
        Some(CordGuard {
            _not_send: PhantomData,
        })
    })
}

/// The cord running on this thread.
///
/// The reference is only used from fibers of that cord or from its own
/// loop, all of which end before the cord is dropped.
#[inline]
pub(crate) fn cord<'a>() -> Option<&'a Cord> {
    let ptr = CURRENT_CORD.with(|c| c.get());
    // SAFETY: set by `enter` from a live boxed cord and cleared before it drops
    unsafe { ptr.as_ref() }
}

/// Whether this thread is running a cord.
#[inline]
pub fn in_cord() -> bool {
    CURRENT_CORD.with(|c| !c.get().is_null())
}
