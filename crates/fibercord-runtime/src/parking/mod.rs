//! Cord parking
//!
//! An idle cord thread parks here until its next timer is due or another
//! thread posts to its inbox. A wake issued while the cord is not parked is
//! kept as a token and consumed by the next `park`, so posting and then
//! waking can never be lost between the cord's last inbox check and its
//! park.

use std::time::Duration;

/// Platform-specific park/unpark pair for one cord thread
pub trait CordParking: Send + Sync {
    /// Block until unparked or the timeout elapses.
    ///
    /// Returns `true` if a wake token was consumed. Callers re-check their
    /// sources of work either way.
    fn park(&self, timeout: Option<Duration>) -> bool;

    /// Leave a wake token and wake the cord if it is parked.
    fn unpark(&self);

    /// Whether the cord is parked right now (hint, may be stale).
    fn is_parked(&self) -> bool;
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::FallbackParking as PlatformParking;
    }
}

/// Create a new platform-appropriate parking instance
pub fn new_parking() -> Box<dyn CordParking> {
    Box::new(PlatformParking::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_park_timeout() {
        let parking = new_parking();
        let start = Instant::now();
        let woken = parking.park(Some(Duration::from_millis(50)));
        assert!(!woken);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_unpark_before_park_is_kept() {
        let parking = new_parking();
        parking.unpark();
        let start = Instant::now();
        assert!(parking.park(Some(Duration::from_secs(10))));
        assert!(start.elapsed() < Duration::from_secs(5));
        // The token was consumed.
        assert!(!parking.park(Some(Duration::from_millis(10))));
    }

    #[test]
    fn test_unpark_wakes_parked_thread() {
        let parking = Arc::new(PlatformParking::new());
        let parking2 = Arc::clone(&parking);

        let handle = thread::spawn(move || parking2.park(Some(Duration::from_secs(10))));

        thread::sleep(Duration::from_millis(50));
        parking.unpark();

        assert!(handle.join().unwrap());
    }
}
