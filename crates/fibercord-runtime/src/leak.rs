//! GC region leak detector
//!
//! A fiber must hand back everything it took from its gc region before it
//! dies. Recycling checks the region; a non-empty one is a leak, reported
//! with the backtrace of the allocation that first made the region
//! non-empty when that was captured.

use fibercord_core::{alloc_site_supported, kerror, AllocSite};

use crate::config::CordConfig;
use crate::fiber::FiberRecord;
use crate::tls;

/// Leak handling of one cord.
#[derive(Debug, Clone)]
pub(crate) struct LeakPolicy {
    /// Track first allocation sites of fibers created from now on.
    pub(crate) backtrace: bool,
    pub(crate) abort: bool,
    pub(crate) leaks: u64,
}

impl LeakPolicy {
    pub(crate) fn from_config(config: &CordConfig) -> Self {
        Self {
            backtrace: config.leak_backtrace,
            abort: config.abort_on_leak,
            leaks: 0,
        }
    }

    /// Check a dead fiber's region before it is reset.
    pub(crate) fn check(&mut self, rec: &FiberRecord) {
        if rec.region.used() == 0 {
            return;
        }
        self.leaks += 1;
        kerror!("{}", leak_report(rec));
        if self.abort {
            std::process::abort();
        }
    }
}

fn leak_report(rec: &FiberRecord) -> String {
    if !alloc_site_supported() {
        return "Fiber gc leak is found. Leak backtrace is not available on your platform."
            .to_string();
    }
    match rec.region.first_alloc_site() {
        Some(AllocSite::Captured(bt)) => format!(
            "Fiber gc leak is found. First leaked fiber gc allocation backtrace:\n{}",
            bt
        ),
        Some(AllocSite::Unsupported) => {
            "Fiber gc leak is found. Leak backtrace is not available on your platform."
                .to_string()
        }
        None => "Fiber gc leak is found. Leak backtrace is not available. Make sure \
                 fiber.leak_backtrace_enable() is called before starting this fiber to \
                 obtain  the backtrace."
            .to_string(),
    }
}

/// Capture first-allocation backtraces for fibers created after this call.
pub fn leak_backtrace_enable() {
    if let Some(cord) = tls::cord() {
        cord.inner.borrow_mut().leak.backtrace = true;
    }
}

pub fn leak_backtrace_disable() {
    if let Some(cord) = tls::cord() {
        cord.inner.borrow_mut().leak.backtrace = false;
    }
}

pub fn leak_backtrace_enabled() -> bool {
    tls::cord().is_some_and(|cord| cord.inner.borrow().leak.backtrace)
}

/// Abort the process on the next gc leak instead of logging it.
pub fn set_abort_on_gc_leak(yes: bool) {
    if let Some(cord) = tls::cord() {
        cord.inner.borrow_mut().leak.abort = yes;
    }
}

pub fn abort_on_gc_leak() -> bool {
    tls::cord().is_some_and(|cord| cord.inner.borrow().leak.abort)
}

/// Leaks found by the current cord so far.
pub fn gc_leaks() -> u64 {
    tls::cord().map_or(0, |cord| cord.inner.borrow().leak.leaks)
}
