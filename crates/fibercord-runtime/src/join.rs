//! Cancellation, join and dead-waits
//!
//! Every wait here re-resolves its target by id after each resume: the
//! target may have died, been joined by nobody and recycled, or the waiter
//! may have been woken by something unrelated. Only the condition decides
//! when a wait ends.

use std::time::Instant;

use fibercord_core::{FiberError, FiberFlags, FiberId, FiberResult, SuspendReason};

use crate::cord::Cord;

impl Cord {
    pub(crate) fn is_cancelled(&self, fid: FiberId) -> bool {
        self.with_record(fid, |rec| rec.flags.contains(FiberFlags::CANCELLED))
            .unwrap_or(false)
    }

    /// Returns the previous value.
    pub(crate) fn set_cancellable(&self, fid: FiberId, yes: bool) -> bool {
        self.with_record_mut(fid, |rec| {
            let prev = rec.flags.contains(FiberFlags::CANCELLABLE);
            rec.flags.set(FiberFlags::CANCELLABLE, yes);
            prev
        })
        .unwrap_or(true)
    }

    /// Flag `fid` as cancelled and wake it if it allows that. Dead, stale
    /// and already cancelled fibers are left alone.
    pub(crate) fn cancel(&self, fid: FiberId) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let Some(rec) = inner.fibers.get_mut(&fid) else {
            return;
        };
        if rec.state.is_dead() || rec.flags.contains(FiberFlags::CANCELLED) {
            return;
        }
        rec.flags.insert(FiberFlags::CANCELLED);
        if rec.flags.contains(FiberFlags::CANCELLABLE) {
            inner.wakeup(fid);
        }
    }

    /// Wait for a joinable fiber to die, take its outcome and recycle it.
    ///
    /// Cancelling the joiner does not end the wait. On timeout the target
    /// stays joinable.
    pub(crate) fn join_until(&self, target: FiberId, deadline: Option<Instant>) -> FiberResult<i32> {
        let me = self.current_id().ok_or(FiberError::NoCord)?;
        if me == target {
            return Err(FiberError::InvalidState("fiber cannot join itself"));
        }
        self.with_record_mut(target, |rec| {
            if !rec.flags.contains(FiberFlags::JOINABLE) {
                return Err(FiberError::NotJoinable);
            }
            if rec.flags.contains(FiberFlags::JOIN_IN_PROGRESS) {
                return Err(FiberError::JoinInProgress);
            }
            rec.flags.insert(FiberFlags::JOIN_IN_PROGRESS);
            Ok(())
        })
        .ok_or(FiberError::NotFound)??;

        loop {
            let dead = self
                .with_record_mut(target, |rec| {
                    if !rec.state.is_dead() && !rec.waiters.contains(&me) {
                        rec.waiters.push(me);
                    }
                    rec.state.is_dead()
                })
                .ok_or(FiberError::NotFound)?;
            if dead {
                break;
            }

            if self.suspend_until(SuspendReason::Joining { target }, deadline) {
                let gave_up = self.with_record_mut(target, |rec| {
                    if rec.state.is_dead() {
                        return false;
                    }
                    rec.waiters.retain(|w| *w != me);
                    rec.flags.remove(FiberFlags::JOIN_IN_PROGRESS);
                    true
                });
                if gave_up == Some(true) {
                    return Err(FiberError::Timeout);
                }
            }
        }

        let mut inner = self.inner.borrow_mut();
        let outcome = inner
            .fibers
            .get_mut(&target)
            .and_then(|rec| rec.outcome.take())
            .unwrap_or(Ok(0));
        inner.recycle(target);
        outcome
    }

    /// Wait until `target` is dead or gone.
    ///
    /// True if it is; false if `deadline` passed first or the waiting fiber
    /// was cancelled. Nothing is consumed.
    pub(crate) fn wait_dead_until(&self, target: FiberId, deadline: Option<Instant>) -> bool {
        let Some(me) = self.current_id() else {
            return self.is_dead_or_gone(target);
        };
        if me == target {
            return false;
        }

        loop {
            let dead = self
                .with_record_mut(target, |rec| {
                    if !rec.state.is_dead() && !rec.waiters.contains(&me) {
                        rec.waiters.push(me);
                    }
                    rec.state.is_dead()
                })
                .unwrap_or(true);
            if dead {
                return true;
            }
            if self.is_cancelled(me) {
                self.forget_waiter(target, me);
                return false;
            }
            if self.suspend_until(SuspendReason::WaitingDead { target }, deadline) {
                if self.is_dead_or_gone(target) {
                    return true;
                }
                self.forget_waiter(target, me);
                return false;
            }
        }
    }

    fn forget_waiter(&self, target: FiberId, waiter: FiberId) {
        self.with_record_mut(target, |rec| rec.waiters.retain(|w| *w != waiter));
    }

    /// Flip `JOINABLE`. Clearing it on a dead fiber recycles the fiber.
    pub(crate) fn set_joinable(&self, fid: FiberId, yes: bool) -> FiberResult<()> {
        let mut inner = self.inner.borrow_mut();
        let rec = inner.fibers.get_mut(&fid).ok_or(FiberError::NotFound)?;
        if rec.flags.contains(FiberFlags::JOIN_IN_PROGRESS) {
            return Err(FiberError::JoinInProgress);
        }
        rec.flags.set(FiberFlags::JOINABLE, yes);
        if !yes && rec.state.is_dead() {
            inner.recycle(fid);
        }
        Ok(())
    }

    /// Flip `SYSTEM`, moving the fiber in or out of client accounting.
    pub(crate) fn set_system(&self, fid: FiberId, yes: bool) -> FiberResult<()> {
        let mut inner = self.inner.borrow_mut();
        let rec = inner.fibers.get_mut(&fid).ok_or(FiberError::NotFound)?;
        if rec.flags.is_system() == yes {
            return Ok(());
        }
        rec.flags.set(FiberFlags::SYSTEM, yes);
        if rec.state.is_dead() {
            return Ok(());
        }
        if yes {
            inner.client_gone();
        } else {
            inner.client_fiber_count += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::CordConfig;
    use crate::cord::run_with_config;
    use crate::fiber::{self, Fiber};
    use fibercord_core::{FiberAttr, FiberError, FiberFlags, FiberResult};
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    fn run_test<F>(name: &str, f: F)
    where
        F: FnOnce() -> FiberResult<()> + 'static,
    {
        let config = CordConfig::new().park_timeout(Duration::from_millis(10));
        assert_eq!(run_with_config(name, config, f), Ok(0));
    }

    fn noop() {}

    fn wait_cancel() {
        while !fiber::is_cancelled() {
            fiber::yield_now();
        }
    }

    fn joinable<F>(name: &str, f: F) -> FiberResult<Fiber>
    where
        F: FnOnce() -> FiberResult<i32> + 'static,
    {
        fiber::new_ex(name, FiberAttr::new().joinable(true), f)
    }

    #[test]
    fn test_join_after_death() {
        run_test("join_dead", || {
            let f = joinable("joinable", || Ok(0))?;
            f.start()?;
            assert!(f.is_dead());
            let me = fiber::current().ok_or(FiberError::NoCord)?;
            let before = me.csw();
            assert_eq!(f.join(), Ok(0));
            // Returned without yielding.
            assert_eq!(me.csw(), before);
            Ok(())
        });
    }

    #[test]
    fn test_join_waits_for_death() {
        run_test("join_wait", || {
            let f = joinable("sleeper", || {
                fiber::sleep(Duration::from_millis(10));
                Ok(7)
            })?;
            f.wakeup();
            assert_eq!(f.join(), Ok(7));
            assert!(fiber::find(f.id()).is_none());
            // A second join finds nothing.
            assert_eq!(f.join(), Err(FiberError::NotFound));
            Ok(())
        });
    }

    #[test]
    fn test_join_errors() {
        run_test("join_errors", || {
            let me = fiber::current().ok_or(FiberError::NoCord)?;
            assert!(matches!(me.join(), Err(FiberError::InvalidState(_))));

            let plain = fiber::new("plain", noop)?;
            assert_eq!(plain.join(), Err(FiberError::NotJoinable));
            plain.start()?;

            let target = joinable("target", || {
                wait_cancel();
                Ok(0)
            })?;
            target.wakeup();
            let second = fiber::new_ex("second", FiberAttr::new().joinable(true), move || {
                target.join()
            })?;
            second.wakeup();
            fiber::yield_now();
            // `second` is blocked in join on `target` now.
            assert_eq!(target.join(), Err(FiberError::JoinInProgress));
            assert_eq!(target.set_joinable(false), Err(FiberError::JoinInProgress));
            target.cancel();
            assert_eq!(second.join(), Ok(0));
            Ok(())
        });
    }

    #[test]
    fn test_join_propagates_error() {
        run_test("join_error", || {
            let f = joinable("failing", || Err(FiberError::custom("allocator error")))?;
            f.start()?;
            assert_eq!(f.join(), Err(FiberError::custom("allocator error")));
            Ok(())
        });
    }

    #[test]
    fn test_join_not_interrupted_by_cancel() {
        run_test("join_cancel", || {
            let target = joinable("slow", || {
                fiber::sleep(Duration::from_millis(20));
                Ok(3)
            })?;
            target.wakeup();
            let joiner = joinable("joiner", move || target.join())?;
            joiner.wakeup();
            fiber::yield_now();
            joiner.cancel();
            assert_eq!(joiner.join(), Ok(3));
            Ok(())
        });
    }

    #[test]
    fn test_join_timeout_leaves_target_joinable() {
        run_test("join_timeout", || {
            let f = joinable("waiter", || {
                wait_cancel();
                Ok(0)
            })?;
            f.wakeup();
            assert_eq!(f.join_timeout(Duration::from_millis(5)), Err(FiberError::Timeout));
            let flags = f.flags().ok_or(FiberError::NotFound)?;
            assert!(flags.contains(FiberFlags::JOINABLE));
            assert!(!flags.contains(FiberFlags::JOIN_IN_PROGRESS));
            f.cancel();
            assert_eq!(f.join(), Ok(0));
            Ok(())
        });
    }

    #[test]
    fn test_cancel_dead_is_noop() {
        run_test("cancel_dead", || {
            let f = joinable("done", || Ok(0))?;
            f.start()?;
            f.cancel();
            let flags = f.flags().ok_or(FiberError::NotFound)?;
            assert!(!flags.contains(FiberFlags::CANCELLED));
            assert_eq!(f.join(), Ok(0));
            // Stale id.
            f.cancel();
            Ok(())
        });
    }

    #[test]
    fn test_set_joinable_toggle() {
        run_test("set_joinable", || {
            let count = fiber::client_fiber_count();
            let f = fiber::new("toggle", noop)?;
            assert_eq!(fiber::client_fiber_count(), count + 1);
            f.set_joinable(true)?;
            f.set_joinable(true)?;
            assert_eq!(fiber::client_fiber_count(), count + 1);
            f.set_joinable(false)?;
            f.set_joinable(false)?;
            assert_eq!(fiber::client_fiber_count(), count + 1);
            f.set_joinable(true)?;
            f.start()?;
            assert!(f.is_dead());
            assert!(fiber::find(f.id()).is_some());
            // Clearing the flag on a dead fiber recycles it.
            f.set_joinable(false)?;
            assert!(fiber::find(f.id()).is_none());
            assert_eq!(f.set_joinable(true), Err(FiberError::NotFound));
            assert_eq!(fiber::client_fiber_count(), count);
            Ok(())
        });
    }

    #[test]
    fn test_set_system() {
        run_test("set_system", || {
            let count = fiber::client_fiber_count();
            let f1 = fiber::new("fiber1", wait_cancel)?;
            let f2 = fiber::new_system("fiber2", wait_cancel)?;
            assert_eq!(fiber::client_fiber_count(), count + 1);

            f1.set_system(true)?;
            assert_eq!(fiber::client_fiber_count(), count);
            f1.set_system(true)?;
            assert_eq!(fiber::client_fiber_count(), count);
            f2.set_system(false)?;
            assert_eq!(fiber::client_fiber_count(), count + 1);
            f2.set_system(true)?;
            assert_eq!(fiber::client_fiber_count(), count);
            assert!(f2.flags().is_some_and(|fl| fl.is_system()));

            for f in [f1, f2] {
                f.set_joinable(true)?;
                f.cancel();
                assert_eq!(f.join(), Ok(0));
            }
            assert_eq!(fiber::client_fiber_count(), count);
            Ok(())
        });
    }

    #[test]
    fn test_client_fiber_count_round_trip() {
        run_test("client_count_round_trip", || {
            let count = fiber::client_fiber_count();

            let a = fiber::new("client_a", wait_cancel)?;
            assert_eq!(fiber::client_fiber_count(), count + 1);
            let b = fiber::new("client_b", wait_cancel)?;
            assert_eq!(fiber::client_fiber_count(), count + 2);
            let c = fiber::new_system("system_c", wait_cancel)?;
            assert_eq!(fiber::client_fiber_count(), count + 2);
            let d = fiber::new_system("system_d", wait_cancel)?;
            assert_eq!(fiber::client_fiber_count(), count + 2);

            for f in [a, b, c, d] {
                f.set_joinable(true)?;
            }
            a.cancel();
            assert_eq!(a.join(), Ok(0));
            assert_eq!(fiber::client_fiber_count(), count + 1);
            c.cancel();
            assert_eq!(c.join(), Ok(0));
            assert_eq!(fiber::client_fiber_count(), count + 1);
            b.cancel();
            assert_eq!(b.join(), Ok(0));
            assert_eq!(fiber::client_fiber_count(), count);
            d.cancel();
            assert_eq!(d.join(), Ok(0));
            assert_eq!(fiber::client_fiber_count(), count);

            let batch = (0..8)
                .map(|i| fiber::new_ex(&format!("batch{}", i), FiberAttr::new().joinable(true), wait_cancel))
                .collect::<FiberResult<Vec<_>>>()?;
            assert_eq!(fiber::client_fiber_count(), count + 8);
            for f in &batch {
                f.cancel();
            }
            for f in batch {
                assert_eq!(f.join(), Ok(0));
            }
            assert_eq!(fiber::client_fiber_count(), count);
            Ok(())
        });
    }

    #[test]
    fn test_wait_on_deadline() {
        run_test("wait_on_deadline", || {
            let f = fiber::new("noop", noop)?;
            f.set_joinable(true)?;
            f.wakeup();
            let exceeded = fiber::wait_on_deadline(f, Instant::now() + Duration::from_secs(100));
            assert!(!exceeded);
            assert!(f.is_dead());
            assert_eq!(f.join(), Ok(0));

            let f = fiber::new("cancel", wait_cancel)?;
            f.set_joinable(true)?;
            f.wakeup();
            let exceeded = fiber::wait_on_deadline(f, Instant::now() + Duration::from_millis(1));
            assert!(exceeded);
            assert!(!f.is_dead());
            f.cancel();
            assert_eq!(f.join(), Ok(0));
            Ok(())
        });
    }

    #[test]
    fn test_wait_dead() {
        run_test("wait_dead", || {
            // Target is collected while we wait.
            let f1 = fiber::new("fiber1", noop)?;
            f1.wakeup();
            assert!(f1.wait_dead_until(None));
            assert!(fiber::find(f1.id()).is_none());

            // Spurious wakeups from the target's own sleeps.
            let f2 = fiber::new("fiber2", || {
                for _ in 0..5 {
                    fiber::sleep(Duration::from_millis(10));
                }
            })?;
            f2.wakeup();
            assert!(f2.wait_dead_until(None));
            assert!(fiber::find(f2.id()).is_none());

            // Already dead.
            let f3 = fiber::new("fiber3", noop)?;
            f3.set_joinable(true)?;
            f3.wakeup();
            fiber::sleep(Duration::ZERO);
            assert!(f3.is_dead());
            assert!(f3.wait_dead_until(None));
            assert_eq!(f3.join(), Ok(0));

            // Death of a joinable fiber.
            let f4 = fiber::new("fiber4", noop)?;
            f4.set_joinable(true)?;
            f4.wakeup();
            assert!(f4.wait_dead_until(None));
            assert!(f4.is_dead());
            assert_eq!(f4.join(), Ok(0));

            // Timeout.
            let f5 = fiber::new("fiber5", wait_cancel)?;
            f5.set_joinable(true)?;
            f5.wakeup();
            assert!(!f5.wait_dead(Duration::from_millis(200)));
            assert!(!f5.is_dead());
            f5.cancel();
            assert_eq!(f5.join(), Ok(0));
            Ok(())
        });
    }

    #[test]
    fn test_wait_dead_ends_on_cancel() {
        run_test("wait_dead_cancel", || {
            let target = fiber::new("target", wait_cancel)?;
            target.set_joinable(true)?;
            target.wakeup();
            let result = Rc::new(Cell::new(None));
            let r = Rc::clone(&result);
            let waiter = fiber::new("waiter", move || r.set(Some(target.wait_dead_until(None))))?;
            waiter.start()?;
            waiter.cancel();
            fiber::yield_now();
            assert_eq!(result.get(), Some(false));
            target.cancel();
            assert_eq!(target.join(), Ok(0));
            Ok(())
        });
    }
}
