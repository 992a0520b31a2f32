//! Cooperative scheduler of one cord
//!
//! Hub model: the loop runs on the cord thread's native stack and every
//! fiber switches back to it, never directly to another fiber. The loop
//! then decides what runs next.
//!
//! ```text
//!            ┌──────────── scheduler loop (native stack) ────────────┐
//!            │ drain inbox → fire timers → pop ready → switch(fiber) │
//!            └───────▲───────────────────────────────────────┬───────┘
//!                    │ switch(sched)                         │
//!   yield / suspend / sleep / death                     resumes fiber
//! ```
//!
//! State is only ever borrowed between switches; no `RefCell` borrow is
//! held across `arch::switch`.

use std::time::{Duration, Instant};

use fibercord_core::constants::FIBER_NAME_MAX;
use fibercord_core::{
    kdebug, kerror, ktrace, kwarn, FiberAttr, FiberError, FiberFlags, FiberId, FiberResult,
    FiberState, SuspendReason,
};

use crate::arch;
use crate::cord::{Cord, CordInner};
use crate::fiber::{FiberEntry, FiberRecord};
use crate::memory::Stack;
use crate::timer::TimerEntry;

/// Cut `name` to at most `FIBER_NAME_MAX` bytes on a char boundary.
pub(crate) fn truncate_name(name: &str) -> &str {
    if name.len() <= FIBER_NAME_MAX {
        return name;
    }
    let mut end = FIBER_NAME_MAX;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

impl Cord {
    /// Fiber running right now, `None` inside the scheduler loop.
    #[inline]
    pub(crate) fn current_id(&self) -> Option<FiberId> {
        self.inner.borrow().current
    }

    pub(crate) fn create(&self, name: &str, attr: FiberAttr, entry: FiberEntry) -> FiberResult<FiberId> {
        let flags = attr.flags();
        let mut inner = self.inner.borrow_mut();
        if inner.shutting_down && flags.is_client() {
            return Err(FiberError::Cancelled);
        }

        let default_size = Stack::round_size(self.config.stack_size)?;
        let size = match attr.requested_stack_size() {
            None => default_size,
            Some(size) => Stack::round_size(size.max(self.config.stack_size_min))?,
        };
        let pooled = size == default_size;

        let reused = if pooled { inner.stacks.pop() } else { None };
        let mut rec = match reused {
            Some(rec) => rec,
            None => {
                let stack = inner.stacks.alloc_stack(size)?;
                FiberRecord::new(stack, pooled, self as *const Cord as usize)
            }
        };

        let fid = FiberId::next();
        let track = inner.leak.backtrace;
        rec.revive(fid, truncate_name(name), flags, entry, track);
        if flags.is_client() {
            inner.client_fiber_count += 1;
        }
        kdebug!("fiber '{}' ({}) created, stack {}", rec.name, fid, rec.stack.size());
        inner.fibers.insert(fid, rec);
        Ok(fid)
    }

    /// Make `fid` runnable. No-op unless it is `New` or suspended.
    pub(crate) fn wakeup(&self, fid: FiberId) {
        self.inner.borrow_mut().wakeup(fid);
    }

    /// Switch from running fiber `fid` to the scheduler loop. Returns when
    /// the loop resumes it.
    pub(crate) fn switch_out(&self, fid: FiberId) {
        let ctx = match self.inner.borrow().fibers.get(&fid) {
            Some(rec) => rec.ctx,
            None => return,
        };
        // SAFETY: both contexts stay allocated while the cord runs; no
        // borrow of cord state is alive across the switch
        unsafe { arch::switch(ctx.as_ptr(), self.sched_ctx.as_ptr()) };
    }

    /// Put the running fiber into `state` and leave it.
    fn block_current(&self, state: FiberState) -> Option<FiberId> {
        let fid = {
            let mut inner = self.inner.borrow_mut();
            let fid = inner.current?;
            inner.fibers.get_mut(&fid)?.state = state;
            fid
        };
        self.switch_out(fid);
        Some(fid)
    }

    /// Requeue the running fiber at the tail and let the others run.
    pub(crate) fn yield_current(&self) {
        self.block_current(FiberState::Ready);
    }

    /// Suspend the running fiber until something wakes it.
    pub(crate) fn suspend_current(&self, reason: SuspendReason) {
        self.block_current(FiberState::Suspended(reason));
    }

    /// Suspend the running fiber, with a timer when `deadline` is set.
    ///
    /// Returns true if the timer fired, false if something else woke the
    /// fiber first (its timer is then cancelled).
    pub(crate) fn suspend_until(&self, reason: SuspendReason, deadline: Option<Instant>) -> bool {
        let fid = {
            let mut inner = self.inner.borrow_mut();
            let Some(fid) = inner.current else {
                return false;
            };
            let handle = deadline.map(|d| inner.timers.insert(TimerEntry::at(fid, d)));
            match inner.fibers.get_mut(&fid) {
                Some(rec) => {
                    rec.timer = handle;
                    rec.state = FiberState::Suspended(reason);
                }
                None => return false,
            }
            fid
        };

        self.switch_out(fid);

        let mut inner = self.inner.borrow_mut();
        let pending = inner.fibers.get_mut(&fid).and_then(|rec| rec.timer.take());
        match pending {
            Some(handle) => {
                inner.timers.cancel(handle);
                false
            }
            None => deadline.is_some(),
        }
    }

    /// Sleep until `deadline`, or until woken when there is none.
    pub(crate) fn sleep_until(&self, deadline: Option<Instant>) {
        self.suspend_until(SuspendReason::Sleeping { deadline }, deadline);
    }

    pub(crate) fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            self.yield_current();
        } else {
            self.sleep_until(Instant::now().checked_add(duration));
        }
    }

    /// Run `target` right now; the caller resumes as soon as it yields,
    /// sleeps or dies.
    pub(crate) fn start_fiber(&self, target: FiberId) -> FiberResult<()> {
        let me = {
            let mut inner = self.inner.borrow_mut();
            let me = inner.current.ok_or(FiberError::NoCord)?;
            let rec = inner.fibers.get_mut(&target).ok_or(FiberError::NotFound)?;
            if rec.state != FiberState::New {
                return Err(FiberError::InvalidState("fiber is already started"));
            }
            rec.state = FiberState::Ready;
            rec.caller = Some(me);
            inner.ready.push_front(target);
            if let Some(rec) = inner.fibers.get_mut(&me) {
                rec.state = FiberState::Suspended(SuspendReason::Calling { callee: target });
            }
            me
        };
        self.switch_out(me);
        Ok(())
    }

    /// Entry of the running fiber's current life (fiber side).
    pub(crate) fn take_current_entry(&self) -> Option<FiberEntry> {
        let mut inner = self.inner.borrow_mut();
        let fid = inner.current?;
        inner.fibers.get_mut(&fid)?.entry.take()
    }

    /// Record the running fiber's outcome and mark it dead (fiber side).
    /// The scheduler does the rest once the fiber has switched out.
    pub(crate) fn finish_current(&self, outcome: FiberResult<i32>) -> Option<FiberId> {
        let mut inner = self.inner.borrow_mut();
        let fid = inner.current?;
        let rec = inner.fibers.get_mut(&fid)?;
        rec.outcome = Some(outcome);
        rec.flags.insert(FiberFlags::DEAD);
        rec.state = FiberState::Dead;
        Some(fid)
    }

    /// Scheduler loop. Returns once the main fiber is dead.
    pub(crate) fn run_loop(&self) {
        loop {
            self.drain_inbox();
            self.fire_timers();
            let next = {
                let mut inner = self.inner.borrow_mut();
                if inner.main_outcome.is_some() {
                    break;
                }
                inner.ready.pop()
            };
            match next {
                Some(fid) => self.run_one(fid),
                None => self.idle(),
            }
        }
    }

    fn run_one(&self, fid: FiberId) {
        let ctx = {
            let mut inner = self.inner.borrow_mut();
            let Some(rec) = inner.fibers.get_mut(&fid) else {
                return;
            };
            if rec.state != FiberState::Ready {
                return;
            }
            rec.state = FiberState::Running;
            rec.csw += 1;
            let ctx = rec.ctx;
            inner.current = Some(fid);
            ctx
        };
        ktrace!("switch to {}", fid);
        // SAFETY: see `switch_out`
        unsafe { arch::switch(self.sched_ctx.as_ptr(), ctx.as_ptr()) };
        self.after_switch(fid);
    }

    /// Settle a fiber that just switched back to the loop.
    fn after_switch(&self, fid: FiberId) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        inner.current = None;
        let Some(rec) = inner.fibers.get_mut(&fid) else {
            return;
        };
        let caller = rec.caller.take();
        let state = rec.state;
        match state {
            FiberState::Ready => inner.ready.push(fid),
            FiberState::Running => {
                kwarn!("fiber {} left the cpu without a state change", fid);
                rec.state = FiberState::Ready;
                inner.ready.push(fid);
            }
            FiberState::Dead => inner.on_death(fid),
            FiberState::New | FiberState::Suspended(_) => {}
        }
        if let Some(caller) = caller {
            inner.resume_caller(caller, fid);
        }
    }

    /// Free stacks of dead fibers that did not go back to the pool.
    pub(crate) fn collect_garbage(&self) -> usize {
        self.inner.borrow_mut().stacks.collect_garbage()
    }

    /// Whether `fid` is dead or no longer exists.
    pub(crate) fn is_dead_or_gone(&self, fid: FiberId) -> bool {
        self.inner
            .borrow()
            .fibers
            .get(&fid)
            .is_none_or(|rec| rec.state.is_dead())
    }
}

impl CordInner {
    pub(crate) fn wakeup(&mut self, fid: FiberId) {
        let Some(rec) = self.fibers.get_mut(&fid) else {
            return;
        };
        if rec.state.is_wakeable() {
            rec.state = FiberState::Ready;
            self.ready.push(fid);
        }
    }

    /// Put a `start` caller back at the head of the queue once its callee
    /// has switched out.
    fn resume_caller(&mut self, caller: FiberId, callee: FiberId) {
        let Some(rec) = self.fibers.get_mut(&caller) else {
            return;
        };
        if rec.state == FiberState::Suspended(SuspendReason::Calling { callee }) {
            rec.state = FiberState::Ready;
            self.ready.push_front(caller);
        }
    }

    /// A client fiber stopped counting (died or became system).
    pub(crate) fn client_gone(&mut self) {
        self.client_fiber_count = self.client_fiber_count.saturating_sub(1);
        if let Some(waiter) = self.shutdown_waiter {
            self.wakeup(waiter);
        }
    }

    fn on_death(&mut self, fid: FiberId) {
        let is_main = self.main == Some(fid);
        let Some(rec) = self.fibers.get_mut(&fid) else {
            return;
        };
        let flags = rec.flags;
        let waiters = std::mem::take(&mut rec.waiters);
        let joinable = flags.contains(FiberFlags::JOINABLE);
        kdebug!("fiber '{}' ({}) is dead", rec.name, fid);

        if is_main {
            self.main_outcome = Some(rec.outcome.clone().unwrap_or(Ok(0)));
        } else if !joinable {
            if let Some(Err(e)) = &rec.outcome {
                if !e.is_cancelled() {
                    kerror!("fiber '{}' ({}): {}", rec.name, fid, e);
                }
            }
        }

        if flags.is_client() {
            self.client_gone();
        }
        for waiter in waiters {
            self.wakeup(waiter);
        }
        if !joinable {
            self.recycle(fid);
        }
    }

    /// Take a dead fiber out of the registry and give its stack back.
    pub(crate) fn recycle(&mut self, fid: FiberId) {
        let Some(mut rec) = self.fibers.remove(&fid) else {
            return;
        };
        if let Some(handle) = rec.timer.take() {
            self.timers.cancel(handle);
        }
        self.leak.check(&rec);
        rec.reset();
        self.stacks.release(rec);
    }

    /// Registry plus pool plus garbage.
    pub(crate) fn fiber_count_total(&self) -> usize {
        self.fibers.len() + self.stacks.pooled() + self.stacks.garbage()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::CordConfig;
    use crate::cord::run_with_config;
    use crate::fiber;
    use fibercord_core::{FiberAttr, FiberError, FiberResult, FiberState, SuspendReason};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    use super::truncate_name;

    fn run_test<F>(name: &str, f: F)
    where
        F: FnOnce() -> FiberResult<()> + 'static,
    {
        let config = CordConfig::new().park_timeout(Duration::from_millis(10));
        assert_eq!(run_with_config(name, config, f), Ok(0));
    }

    #[test]
    fn test_truncate_name() {
        assert_eq!(truncate_name("Horace"), "Horace");
        let long = "a".repeat(300);
        assert_eq!(truncate_name(&long).len(), 255);
        let wide = "é".repeat(200);
        let cut = truncate_name(&wide);
        assert!(cut.len() <= 255);
        assert_eq!(cut.len() % 2, 0);
    }

    #[test]
    fn test_fiber_name() {
        run_test("names", || {
            let me = fiber::current().ok_or(FiberError::NoCord)?;
            assert_eq!(me.name().as_deref(), Some("main"));
            me.set_name("Horace")?;
            assert_eq!(me.name().as_deref(), Some("Horace"));
            me.set_name(&"a".repeat(300))?;
            assert_eq!(me.name().map(|n| n.len()), Some(255));
            Ok(())
        });
    }

    #[test]
    fn test_yield_is_fifo() {
        run_test("fifo", || {
            let log = Rc::new(RefCell::new(Vec::new()));
            for i in 0..3 {
                let log = Rc::clone(&log);
                let f = fiber::new("worker", move || {
                    log.borrow_mut().push(i);
                    fiber::yield_now();
                    log.borrow_mut().push(10 + i);
                })?;
                f.wakeup();
            }
            fiber::yield_now();
            fiber::yield_now();
            assert_eq!(*log.borrow(), vec![0, 1, 2, 10, 11, 12]);
            Ok(())
        });
    }

    #[test]
    fn test_start_is_synchronous() {
        run_test("start", || {
            let log = Rc::new(RefCell::new(Vec::new()));
            let inner = Rc::clone(&log);
            let f = fiber::new("callee", move || {
                inner.borrow_mut().push("callee");
                fiber::yield_now();
                inner.borrow_mut().push("callee again");
            })?;
            f.start()?;
            log.borrow_mut().push("caller");
            assert_eq!(*log.borrow(), vec!["callee", "caller"]);
            assert!(matches!(f.start(), Err(FiberError::InvalidState(_))));
            fiber::yield_now();
            assert_eq!(log.borrow().len(), 3);
            Ok(())
        });
    }

    #[test]
    fn test_wakeup_self_is_noop() {
        run_test("wakeup_self", || {
            let me = fiber::current().ok_or(FiberError::NoCord)?;
            me.wakeup();
            let t1 = Instant::now();
            fiber::sleep(Duration::from_millis(1));
            assert!(t1.elapsed() >= Duration::from_millis(1));

            // Wakeup of self, then a synchronous start.
            let newf = fiber::new("nop", || ())?;
            me.wakeup();
            newf.start()?;
            Ok(())
        });
    }

    #[test]
    fn test_wakeup_dead_is_noop() {
        run_test("wakeup_dead", || {
            let f = fiber::new_ex("wakeup_dead", FiberAttr::new().joinable(true), || ())?;
            f.start()?;
            assert!(f.is_dead());
            f.wakeup();
            f.wakeup();
            assert_eq!(f.join(), Ok(0));
            Ok(())
        });
    }

    #[test]
    fn test_suspend_and_wakeup() {
        run_test("suspend", || {
            let stage = Rc::new(RefCell::new(0));
            let s = Rc::clone(&stage);
            let f = fiber::new("sleeper", move || {
                *s.borrow_mut() = 1;
                fiber::suspend();
                *s.borrow_mut() = 2;
            })?;
            f.start()?;
            assert_eq!(*stage.borrow(), 1);
            assert_eq!(f.state(), Some(FiberState::Suspended(SuspendReason::Parked)));
            fiber::yield_now();
            assert_eq!(*stage.borrow(), 1);
            f.wakeup();
            fiber::yield_now();
            assert_eq!(*stage.borrow(), 2);
            Ok(())
        });
    }

    #[test]
    fn test_sleep_wakes_on_timer() {
        run_test("sleep", || {
            let start = Instant::now();
            fiber::sleep(Duration::from_millis(20));
            assert!(start.elapsed() >= Duration::from_millis(20));
            fiber::sleep_until(Instant::now() + Duration::from_millis(5));
            fiber::sleep(Duration::ZERO);
            Ok(())
        });
    }

    #[test]
    fn test_early_wakeup_cancels_timer() {
        run_test("early_wakeup", || {
            let me = fiber::current().ok_or(FiberError::NoCord)?;
            let waker = fiber::new("waker", move || me.wakeup())?;
            waker.wakeup();
            let start = Instant::now();
            fiber::sleep(Duration::from_secs(30));
            assert!(start.elapsed() < Duration::from_secs(10));

            // The stale timer of the first sleep must not cut this one short.
            let start = Instant::now();
            fiber::sleep(Duration::from_millis(20));
            assert!(start.elapsed() >= Duration::from_millis(20));
            Ok(())
        });
    }

    #[test]
    fn test_csw_counts_switches() {
        run_test("csw", || {
            let me = fiber::current().ok_or(FiberError::NoCord)?;
            let before = me.csw();
            fiber::yield_now();
            fiber::reschedule();
            assert_eq!(me.csw(), before + 2);
            Ok(())
        });
    }

    #[test]
    fn test_dead_fiber_stays_in_pool_count() {
        run_test("dead_in_cache", || {
            let f = fiber::new("nop", || ())?;
            let count = fiber::fiber_count_total();
            f.start()?;
            assert_eq!(count, fiber::fiber_count_total());
            assert!(f.is_dead());
            assert!(fiber::find(f.id()).is_none());
            Ok(())
        });
    }

    #[test]
    fn test_flags_respected_on_reuse() {
        run_test("flags_respect", || {
            // Make sure the pool has at least one fiber.
            fiber::new("nop", || ())?.start()?;

            let f = fiber::new_ex("wait_cancel", FiberAttr::new().joinable(true), || {
                while !fiber::is_cancelled() {
                    fiber::yield_now();
                }
            })?;
            assert!(f.flags().is_some_and(|fl| fl.contains(fibercord_core::FiberFlags::JOINABLE)));
            f.wakeup();
            f.cancel();
            assert_eq!(f.join(), Ok(0));
            Ok(())
        });
    }

    #[inline(never)]
    fn stack_expand(depth: usize) -> u8 {
        let mut fill = [depth as u8; 4096];
        std::hint::black_box(&mut fill);
        if depth == 0 {
            fill[2048]
        } else {
            stack_expand(depth - 1).wrapping_add(fill[2048])
        }
    }

    #[test]
    fn test_stack_isolation() {
        run_test("stack", || {
            let page = crate::memory::page_size();
            let default = CordConfig::new().stack_size;

            let calls = (default * 3 / 4 - 2 * page) / page;
            let f = fiber::new("test_stack", move || {
                stack_expand(calls);
            })?;
            f.wakeup();
            fiber::sleep(Duration::ZERO);

            let count = fiber::fiber_count_total();
            let used = fiber::stack_bytes_used();
            let calls = (default * 3 / 2 - 2 * page) / page;
            let f = fiber::new_ex("test_stack", FiberAttr::new().stack_size(default * 2), move || {
                stack_expand(calls);
            })?;
            assert_eq!(count + 1, fiber::fiber_count_total());
            f.wakeup();
            fiber::sleep(Duration::ZERO);
            fiber::collect_garbage();
            assert_eq!(count, fiber::fiber_count_total());
            assert_eq!(used, fiber::stack_bytes_used());
            Ok(())
        });
    }

    #[test]
    fn test_uncaught_error_is_logged() {
        run_test("uncaught", || {
            let ((), out) = fibercord_core::kprint::capture(|| {
                let f = fiber::new("exception", || -> FiberResult<()> {
                    Err(FiberError::custom("allocator exception"))
                })
                .and_then(|f| f.start());
                assert!(f.is_ok());
                let c = fiber::new("cancelled", || -> FiberResult<()> { Err(FiberError::Cancelled) })
                    .and_then(|f| f.start());
                assert!(c.is_ok());
            });
            assert!(out.contains("allocator exception"));
            assert!(!out.contains("fiber is cancelled"));
            Ok(())
        });
    }
}
