//! # fibercord - cooperative fibers in OS-thread cords
//!
//! Stackful fibers scheduled cooperatively inside a *cord*, an OS thread
//! running its own scheduler. Fibers of one cord never run in parallel and
//! switch only where they choose to: `yield_now`, `sleep`, `suspend`,
//! `join` and friends. Parallelism comes from running several cords.
//!
//! ## Features
//!
//! - **Stackful**: every fiber has its own mmap'd stack with a guard page
//! - **Cheap reuse**: dead default-size fibers are pooled with their stacks
//! - **Join and cancel**: joinable fibers hand their outcome to one `join`;
//!   cancellation is a flag checked at `testcancel` points
//! - **Cross-cord join**: `cojoin` waits for another cord without blocking
//!   the caller's cord
//! - **GC leak detection**: per-fiber scratch regions must be empty at death
//!
//! ## Quick Start
//!
//! ```ignore
//! use fibercord::{fiber, run, FiberAttr};
//!
//! fn main() {
//!     let status = run("main", || -> fibercord::FiberResult<i32> {
//!         let worker = fiber::new_ex("worker", FiberAttr::new().joinable(true), || {
//!             for _ in 0..3 {
//!                 fiber::yield_now();
//!             }
//!             42
//!         })?;
//!         worker.wakeup();
//!         worker.join()
//!     });
//!     assert_eq!(status, Ok(42));
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │     fiber::new / start / join / cancel, cord_start          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┴───────────────────┐
//!          ▼                                       ▼
//!    ┌─────────────────────────┐         ┌─────────────────────────┐
//!    │  Cord A (OS thread)     │  inbox  │  Cord B (OS thread)     │
//!    │  scheduler loop         │◄───────►│  scheduler loop         │
//!    │  ready queue, timers    │ parking │  ready queue, timers    │
//!    └─────────────────────────┘         └─────────────────────────┘
//!          │                                       │
//!          ▼                                       ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │                  Fiber stacks                           │
//!    │     mmap + guard page, pooled by size class             │
//!    └─────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use fibercord_core::{
    FiberAttr,
    FiberError,
    FiberFlags,
    FiberId,
    FiberResult,
    FiberState,
    IntoFiberStatus,
    MemoryError,
    Region,
    SuspendReason,
};

// Re-export kprint macros for logging
pub use fibercord_core::{kprint, kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use fibercord_core::kprint::{
    LogLevel,
    capture as capture_log,
    init as init_logging,
    set_flush_enabled,
    set_log_file,
    set_log_level,
};

// Re-export env utilities
pub use fibercord_core::{env_get, env_get_bool, env_get_opt, env_get_size, env_is_set};

// Re-export runtime types
pub use fibercord_runtime::{
    cord_start,
    in_cord,
    run,
    run_with_config,
    ConfigError,
    Cord,
    CordConfig,
    CordHandle,
    Fiber,
    FiberInfo,
};

/// Fiber operations of the current cord.
pub use fibercord_runtime::fiber;

/// Spawn a fiber with default attributes and schedule it.
///
/// Shorthand for [`fiber::new`] followed by [`Fiber::wakeup`].
pub fn spawn<F, R>(name: &str, f: F) -> FiberResult<Fiber>
where
    F: FnOnce() -> R + 'static,
    R: IntoFiberStatus,
{
    let fiber = fiber::new(name, f)?;
    fiber.wakeup();
    Ok(fiber)
}

/// Yield execution to the other ready fibers of this cord.
///
/// If called from outside a fiber, this yields the OS thread.
#[inline]
pub fn yield_now() {
    fiber::yield_now()
}

/// Get the current fiber's id, if running in one.
#[inline]
pub fn current_id() -> Option<FiberId> {
    fiber::current().map(|f| f.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_quick_start() {
        let status = run("main", || -> FiberResult<i32> {
            let worker = fiber::new_ex("worker", FiberAttr::new().joinable(true), || {
                for _ in 0..3 {
                    fiber::yield_now();
                }
                42
            })?;
            worker.wakeup();
            worker.join()
        });
        assert_eq!(status, Ok(42));
    }

    #[test]
    fn test_spawn_runs_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&log);
        let status = run("spawn", move || -> FiberResult<()> {
            for i in 0..3 {
                let log = Rc::clone(&seen);
                spawn("worker", move || log.borrow_mut().push(i))?;
            }
            assert!(current_id().is_some());
            yield_now();
            Ok(())
        });
        assert_eq!(status, Ok(0));
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(current_id().is_none());
    }
}
