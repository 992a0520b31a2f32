//! Orderly cord shutdown
//!
//! Client fibers are cancelled and waited for; system fibers keep running.
//! Once shutdown has begun no new client fiber can be created on the cord.

use std::time::{Duration, Instant};

use fibercord_core::{kinfo, kwarn, FiberError, FiberId, FiberResult, SuspendReason};

use crate::cord::Cord;
use crate::tls;

impl Cord {
    pub(crate) fn shutdown(&self, deadline: Option<Instant>) -> FiberResult<()> {
        let me = self.current_id().ok_or(FiberError::NoCord)?;
        let targets: Vec<FiberId> = {
            let mut inner = self.inner.borrow_mut();
            inner.shutting_down = true;
            inner
                .fibers
                .values()
                .filter(|rec| rec.fid != me && rec.flags.is_client() && !rec.state.is_dead())
                .map(|rec| rec.fid)
                .collect()
        };
        kinfo!("shutdown: cancelling {} client fibers", targets.len());
        for fid in targets {
            self.cancel(fid);
        }

        self.inner.borrow_mut().shutdown_waiter = Some(me);
        let result = loop {
            if self.clients_left(me) == 0 {
                break Ok(());
            }
            if self.suspend_until(SuspendReason::Shutdown, deadline) && self.clients_left(me) > 0 {
                break Err(FiberError::Timeout);
            }
        };
        self.inner.borrow_mut().shutdown_waiter = None;

        if result.is_err() {
            kwarn!("shutdown timed out with {} client fibers left", self.clients_left(me));
        }
        result
    }

    /// Client fibers other than `me`.
    fn clients_left(&self, me: FiberId) -> usize {
        let inner = self.inner.borrow();
        let mine = inner
            .fibers
            .get(&me)
            .is_some_and(|rec| rec.flags.is_client() && !rec.state.is_dead());
        inner.client_fiber_count.saturating_sub(usize::from(mine))
    }
}

/// Cancel every client fiber of the current cord but the caller, and wait
/// up to `timeout` for them to die.
///
/// From here on, creating a client fiber fails with `Cancelled`. Joinable
/// clients stay around for their owners to join.
pub fn shutdown(timeout: Duration) -> FiberResult<()> {
    let cord = tls::cord().ok_or(FiberError::NoCord)?;
    cord.shutdown(Instant::now().checked_add(timeout))
}

pub fn is_shutting_down() -> bool {
    tls::cord().is_some_and(|cord| cord.inner.borrow().shutting_down)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CordConfig;
    use crate::cord::run_with_config;
    use crate::fiber;
    use fibercord_core::{FiberAttr, FiberFlags};

    fn run_test<F>(name: &str, f: F)
    where
        F: FnOnce() -> FiberResult<()> + 'static,
    {
        let config = CordConfig::new().park_timeout(Duration::from_millis(10));
        assert_eq!(run_with_config(name, config, f), Ok(0));
    }

    fn wait_cancel() {
        while !fiber::is_cancelled() {
            fiber::yield_now();
        }
    }

    fn hang_on_cancel() {
        wait_cancel();
        if let Some(me) = fiber::current() {
            let _ = me.set_system(true);
        }
        loop {
            fiber::yield_now();
        }
    }

    fn new_fiber_on_shutdown() -> FiberResult<()> {
        wait_cancel();
        let refused = fiber::new("fiber_on_shutdown", wait_cancel);
        match refused {
            Err(e) => assert_eq!(e.to_string(), "fiber is cancelled"),
            Ok(_) => return Err(FiberError::custom("client fiber created during shutdown")),
        }
        let system = fiber::new_ex(
            "system_fiber_on_shutdown",
            FiberAttr::system().joinable(true),
            || (),
        )?;
        system.start()?;
        system.join()?;
        Ok(())
    }

    fn is_dead_flag(f: fiber::Fiber) -> bool {
        f.flags().is_some_and(|fl| fl.contains(FiberFlags::DEAD))
    }

    #[test]
    fn test_shutdown() {
        run_test("shutdown", || {
            let fiber1 = fiber::new_ex("fiber1", FiberAttr::new().joinable(true), wait_cancel)?;
            let fiber2 = fiber::new_system("fiber2", wait_cancel)?;
            let fiber3 = fiber::new("fiber3", hang_on_cancel)?;
            let fiber4 = fiber::new_ex(
                "fiber4",
                FiberAttr::new().joinable(true),
                new_fiber_on_shutdown,
            )?;

            assert!(!is_shutting_down());
            shutdown(Duration::from_secs(1000))?;
            assert!(is_shutting_down());

            assert!(is_dead_flag(fiber1));
            assert!(!fiber2.is_dead());
            assert!(!fiber3.is_dead());
            assert!(is_dead_flag(fiber4));

            assert_eq!(fiber1.join(), Ok(0));
            assert_eq!(fiber4.join(), Ok(0));

            fiber2.set_joinable(true)?;
            fiber2.cancel();
            assert_eq!(fiber2.join(), Ok(0));

            let fiber5 = fiber::new("fiber5", wait_cancel);
            assert_eq!(fiber5, Err(FiberError::Cancelled));
            assert_eq!(FiberError::Cancelled.to_string(), "fiber is cancelled");
            Ok(())
        });
    }

    #[test]
    fn test_shutdown_timeout() {
        run_test("shutdown_timeout", || {
            let stubborn = fiber::new("stubborn", || {
                fiber::set_cancellable(false);
                fiber::suspend();
            })?;
            stubborn.start()?;
            assert_eq!(shutdown(Duration::from_millis(20)), Err(FiberError::Timeout));
            assert_eq!(fiber::client_fiber_count(), 1);
            assert!(!stubborn.is_dead());
            Ok(())
        });
    }

    #[test]
    fn test_shutdown_from_client_fiber() {
        run_test("shutdown_client", || {
            let other = fiber::new("other", wait_cancel)?;
            other.wakeup();
            let initiator = fiber::new_ex("initiator", FiberAttr::new().joinable(true), || {
                shutdown(Duration::from_secs(10))
            })?;
            initiator.wakeup();
            assert_eq!(initiator.join(), Ok(0));
            assert!(other.is_dead());
            Ok(())
        });
    }

    #[test]
    fn test_shutdown_outside_cord() {
        assert_eq!(shutdown(Duration::ZERO), Err(FiberError::NoCord));
        assert!(!is_shutting_down());
    }
}
