//! Cord event bridge
//!
//! Everything that can make a fiber runnable without another fiber of the
//! same cord doing it: expired timers and messages posted from other
//! threads. The part other threads may touch lives in [`CordShared`].
//!
//! ```text
//!   other thread ──post──► inbox (SegQueue) ──unpark──► parked cord
//!                                                         │
//!   scheduler loop: drain_inbox ─► fire_timers ─► run one ready fiber
//!                      └─ nothing ready: collect garbage, park until
//!                         min(next timer, park_timeout)
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crossbeam_queue::SegQueue;
use fibercord_core::{ktrace, FiberId, FiberResult};

use crate::cord::Cord;
use crate::parking::{CordParking, PlatformParking};

/// Cross-thread request to a cord.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Message {
    /// Wake a fiber of the receiving cord.
    Wakeup(FiberId),
    /// Cancel the receiving cord's main fiber.
    CancelMain,
}

/// Fiber of some cord waiting for another cord to finish.
pub(crate) struct Waiter {
    pub(crate) cord: Arc<CordShared>,
    pub(crate) fid: FiberId,
}

#[derive(Default)]
pub(crate) struct JoinState {
    pub(crate) finished: bool,
    pub(crate) outcome: Option<FiberResult<i32>>,
    pub(crate) waiter: Option<Waiter>,
}

/// Part of a cord reachable from other threads.
pub struct CordShared {
    name: String,
    inbox: SegQueue<Message>,
    parking: PlatformParking,
    join: Mutex<JoinState>,
}

impl CordShared {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inbox: SegQueue::new(),
            parking: PlatformParking::new(),
            join: Mutex::new(JoinState::default()),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a message and wake the cord if it is parked.
    pub(crate) fn post(&self, msg: Message) {
        self.inbox.push(msg);
        self.parking.unpark();
    }

    pub(crate) fn lock_join(&self) -> MutexGuard<'_, JoinState> {
        self.join.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_finished(&self) -> bool {
        self.lock_join().finished
    }

    /// Record the main fiber's outcome and wake the cojoin waiter, if any.
    pub(crate) fn finish(&self, outcome: FiberResult<i32>) {
        let waiter = {
            let mut js = self.lock_join();
            js.finished = true;
            js.outcome = Some(outcome);
            js.waiter.take()
        };
        if let Some(waiter) = waiter {
            waiter.cord.post(Message::Wakeup(waiter.fid));
        }
    }
}

impl Cord {
    /// Apply every message posted since the last drain.
    pub(crate) fn drain_inbox(&self) {
        while let Some(msg) = self.shared.inbox.pop() {
            ktrace!("inbox: {:?}", msg);
            match msg {
                Message::Wakeup(fid) => self.wakeup(fid),
                Message::CancelMain => {
                    let main = self.inner.borrow().main;
                    if let Some(main) = main {
                        self.cancel(main);
                    }
                }
            }
        }
    }

    /// Wake the owners of expired timers that still match their records.
    pub(crate) fn fire_timers(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.timers.is_empty() {
            return;
        }
        let expired = inner.timers.poll_expired(Instant::now());
        for timer in expired {
            let current = inner
                .fibers
                .get_mut(&timer.fid)
                .filter(|rec| rec.timer == Some(timer.handle));
            if let Some(rec) = current {
                rec.timer = None;
                inner.wakeup(timer.fid);
            }
        }
    }

    /// Nothing is ready: free dead stacks, then sleep until the next timer,
    /// a cross-thread post, or `park_timeout`.
    pub(crate) fn idle(&self) {
        let timeout = {
            let mut inner = self.inner.borrow_mut();
            inner.stacks.collect_garbage();
            let now = Instant::now();
            match inner.timers.next_deadline() {
                Some(deadline) => deadline
                    .saturating_duration_since(now)
                    .min(self.config.park_timeout),
                None => self.config.park_timeout,
            }
        };
        if !self.shared.inbox.is_empty() {
            return;
        }
        self.shared.parking.park(Some(timeout));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_finish_wakes_waiter_cord() {
        let target = CordShared::new("target");
        let waiter = Arc::new(CordShared::new("waiter"));
        let fid = FiberId::from_raw(4242);
        target.lock_join().waiter = Some(Waiter {
            cord: Arc::clone(&waiter),
            fid,
        });

        target.finish(Ok(7));

        assert!(target.is_finished());
        assert_eq!(target.lock_join().outcome, Some(Ok(7)));
        assert_eq!(waiter.inbox.pop(), Some(Message::Wakeup(fid)));
        // The wake token is left for the next park.
        assert!(waiter.parking.park(Some(Duration::from_millis(10))));
    }

    #[test]
    fn test_post_from_other_thread() {
        let shared = Arc::new(CordShared::new("cord"));
        let remote = Arc::clone(&shared);
        let handle = thread::spawn(move || remote.post(Message::CancelMain));
        assert!(shared.parking.park(Some(Duration::from_secs(10))));
        handle.join().unwrap();
        assert_eq!(shared.inbox.pop(), Some(Message::CancelMain));
        assert_eq!(shared.name(), "cord");
    }
}
