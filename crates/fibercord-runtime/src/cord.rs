//! Cords
//!
//! A cord is one OS thread running its own fiber scheduler. All of its
//! state is cord-local and lives behind one `RefCell`; the only thing
//! another thread can reach is [`CordShared`] (inbox, parking, join state).
//!
//! ```text
//!   thread A                              thread B (Cord::start)
//!   ┌──────────────────────┐              ┌──────────────────────┐
//!   │ main fiber           │   cojoin     │ main fiber (entry)   │
//!   │   handle.cojoin() ───┼── waiter ──► │   ...                │
//!   │   suspend(CordJoin)  │              │   returns outcome    │
//!   │        ▲             │              │ CordShared::finish   │
//!   │        └── inbox ◄───┼── Wakeup ────┤                      │
//!   └──────────────────────┘              └──────────────────────┘
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fibercord_core::{
    kdebug, kinfo, kprint, kwarn, FiberAttr, FiberError, FiberId, FiberResult, IntoFiberStatus,
    SuspendReason,
};

use crate::arch::Context;
use crate::config::CordConfig;
use crate::event::{CordShared, Message, Waiter};
use crate::fiber::{boxed_entry, panic_message, FiberRecord};
use crate::leak::LeakPolicy;
use crate::ready_queue::{create_ready_queue, ReadyQueue};
use crate::stack_pool::StackPool;
use crate::timer::{create_backend, TimerBackend};
use crate::tls;

/// Scheduler state of one cord.
///
/// Only reachable from the thread that runs it; fibers reach it through
/// the thread-local set up by [`run`].
pub struct Cord {
    pub(crate) shared: Arc<CordShared>,
    pub(crate) config: CordConfig,
    /// Saved context of the scheduler loop on the thread's native stack.
    pub(crate) sched_ctx: NonNull<Context>,
    pub(crate) inner: RefCell<CordInner>,
}

pub(crate) struct CordInner {
    /// Live registry: created, running, suspended, and dead-but-unjoined.
    pub(crate) fibers: HashMap<FiberId, FiberRecord>,
    pub(crate) stacks: StackPool,
    pub(crate) ready: Box<dyn ReadyQueue>,
    pub(crate) timers: Box<dyn TimerBackend>,
    pub(crate) current: Option<FiberId>,
    pub(crate) client_fiber_count: usize,
    pub(crate) shutting_down: bool,
    pub(crate) shutdown_waiter: Option<FiberId>,
    pub(crate) main: Option<FiberId>,
    /// Set when the main fiber dies; ends the scheduler loop.
    pub(crate) main_outcome: Option<FiberResult<i32>>,
    pub(crate) leak: LeakPolicy,
}

impl Cord {
    pub(crate) fn new(shared: Arc<CordShared>, config: CordConfig) -> Box<Cord> {
        let sched_ctx = NonNull::from(Box::leak(Box::new(Context::default())));
        let inner = CordInner {
            fibers: HashMap::new(),
            stacks: StackPool::new(config.pool_max),
            ready: create_ready_queue(),
            timers: create_backend(),
            current: None,
            client_fiber_count: 0,
            shutting_down: false,
            shutdown_waiter: None,
            main: None,
            main_outcome: None,
            leak: LeakPolicy::from_config(&config),
        };
        Box::new(Cord {
            shared,
            config,
            sched_ctx,
            inner: RefCell::new(inner),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    #[inline]
    pub fn config(&self) -> &CordConfig {
        &self.config
    }

    /// Start a new cord thread running `entry` as its main fiber.
    pub fn start<F, R>(name: &str, entry: F) -> FiberResult<CordHandle>
    where
        F: FnOnce() -> R + Send + 'static,
        R: IntoFiberStatus,
    {
        Self::start_with_config(name, CordConfig::from_env(), entry)
    }

    pub fn start_with_config<F, R>(name: &str, config: CordConfig, entry: F) -> FiberResult<CordHandle>
    where
        F: FnOnce() -> R + Send + 'static,
        R: IntoFiberStatus,
    {
        let shared = Arc::new(CordShared::new(name));
        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_cord(Arc::clone(&thread_shared), config, entry)
                }))
                .unwrap_or_else(|payload| Err(FiberError::Panicked(panic_message(payload.as_ref()))));
                thread_shared.finish(outcome.clone());
                outcome
            })
            .map_err(|e| FiberError::Spawn(e.to_string()))?;
        Ok(CordHandle { shared, thread })
    }
}

impl Drop for Cord {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        let live = inner.fibers.len();
        if live > 0 {
            kdebug!("cord {} exits with {} live fibers", self.shared.name(), live);
        }
        // SAFETY: allocated in `new`, the loop that switched through it is done
        unsafe { drop(Box::from_raw(self.sched_ctx.as_ptr())) };
    }
}

/// Handle to a cord started with [`Cord::start`].
pub struct CordHandle {
    shared: Arc<CordShared>,
    thread: JoinHandle<FiberResult<i32>>,
}

impl CordHandle {
    #[inline]
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// Whether the cord's main fiber has finished.
    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }

    /// Cancel the cord's main fiber.
    pub fn cancel(&self) {
        self.shared.post(Message::CancelMain);
    }

    /// Block the calling OS thread until the cord exits.
    pub fn join(self) -> FiberResult<i32> {
        self.thread
            .join()
            .unwrap_or_else(|payload| Err(FiberError::Panicked(panic_message(payload.as_ref()))))
    }

    /// Wait for the cord from a fiber, letting the caller's cord keep
    /// running other fibers meanwhile.
    ///
    /// Stray wakeups do not end the wait. If the waiting fiber is
    /// cancelled, the cancel is forwarded once to the target's main fiber
    /// and the wait goes on until the target finishes. Outside a fiber
    /// this is [`CordHandle::join`].
    pub fn cojoin(self) -> FiberResult<i32> {
        let Some(cord) = tls::cord() else {
            return self.join();
        };
        let Some(me) = cord.current_id() else {
            return self.join();
        };

        {
            let mut js = self.shared.lock_join();
            if !js.finished {
                js.waiter = Some(Waiter {
                    cord: Arc::clone(&cord.shared),
                    fid: me,
                });
            }
        }

        let mut cancel_forwarded = false;
        while !self.shared.is_finished() {
            if !cancel_forwarded && cord.is_cancelled(me) {
                kdebug!("forwarding cancel to cord {}", self.shared.name());
                self.shared.post(Message::CancelMain);
                cancel_forwarded = true;
            }
            cord.suspend_current(SuspendReason::CordJoin);
        }
        self.join()
    }
}

impl std::fmt::Debug for CordHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CordHandle")
            .field("name", &self.name())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Start a new cord thread; see [`Cord::start`].
pub fn cord_start<F, R>(name: &str, entry: F) -> FiberResult<CordHandle>
where
    F: FnOnce() -> R + Send + 'static,
    R: IntoFiberStatus,
{
    Cord::start(name, entry)
}

/// Turn the calling thread into a cord and run `entry` as its main fiber.
///
/// Returns when the main fiber dies, with its outcome. Fibers still alive
/// at that point are dropped with the cord without being resumed.
pub fn run<F, R>(name: &str, entry: F) -> FiberResult<i32>
where
    F: FnOnce() -> R + 'static,
    R: IntoFiberStatus,
{
    run_with_config(name, CordConfig::from_env(), entry)
}

pub fn run_with_config<F, R>(name: &str, config: CordConfig, entry: F) -> FiberResult<i32>
where
    F: FnOnce() -> R + 'static,
    R: IntoFiberStatus,
{
    run_cord(Arc::new(CordShared::new(name)), config, entry)
}

fn run_cord<F, R>(shared: Arc<CordShared>, config: CordConfig, entry: F) -> FiberResult<i32>
where
    F: FnOnce() -> R + 'static,
    R: IntoFiberStatus,
{
    config
        .validate()
        .map_err(|e| FiberError::custom(e.to_string()))?;

    let cord = Cord::new(shared, config);
    let guard = tls::enter(&cord).ok_or(FiberError::InvalidState(
        "a cord is already running on this thread",
    ))?;
    kprint::set_cord_name(cord.name());
    kinfo!("cord started");

    let outcome = cord
        .create("main", FiberAttr::system(), boxed_entry(entry))
        .map(|main| {
            cord.inner.borrow_mut().main = Some(main);
            cord.wakeup(main);
            cord.run_loop();
            cord.inner
                .borrow_mut()
                .main_outcome
                .take()
                .unwrap_or(Err(FiberError::InvalidState("main fiber left no outcome")))
        })
        .and_then(|outcome| outcome);

    match &outcome {
        Ok(status) => kinfo!("cord finished, status {}", status),
        Err(e) => kwarn!("cord finished: {}", e),
    }
    drop(guard);
    drop(cord);
    kprint::set_cord_name("");
    outcome
}
