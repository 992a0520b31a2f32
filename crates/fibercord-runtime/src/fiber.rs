//! Fibers
//!
//! [`FiberRecord`] is the cord-owned state of one fiber; [`Fiber`] is the
//! `Copy` handle user code holds. A handle is just the id, resolved against
//! the current cord's registry on every call, so a handle to a fiber that
//! was recycled resolves to nothing rather than to a later occupant of the
//! same stack.
//!
//! A stack runs one `fiber_loop` for as long as it exists. Each life of the
//! record runs one entry function inside it:
//!
//! ```text
//!   fiber_loop (on the fiber stack, never returns)
//!     loop {
//!       entry   = take_current_entry()
//!       outcome = fiber_invoke(entry)        // catch_unwind boundary
//!       finish_current(outcome)              // state = Dead
//!       switch_out()                         // resumes here on reuse
//!     }
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::time::{Duration, Instant};

use fibercord_core::{
    kerror, FiberAttr, FiberError, FiberFlags, FiberId, FiberResult, FiberState,
    IntoFiberStatus, Region, SuspendReason,
};

use crate::arch::{self, Context};
use crate::cord::Cord;
use crate::memory::Stack;
use crate::timer::TimerHandle;
use crate::tls;

pub use crate::leak::{
    abort_on_gc_leak, gc_leaks, leak_backtrace_disable, leak_backtrace_enable,
    leak_backtrace_enabled, set_abort_on_gc_leak,
};
pub use crate::shutdown::{is_shutting_down, shutdown};

/// Type-erased entry function of one fiber life.
pub(crate) type FiberEntry = Box<dyn FnOnce() -> FiberResult<i32> + 'static>;

pub(crate) fn boxed_entry<F, R>(f: F) -> FiberEntry
where
    F: FnOnce() -> R + 'static,
    R: IntoFiberStatus,
{
    Box::new(move || f().into_status())
}

/// Message of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Cord-owned state of one fiber.
pub(crate) struct FiberRecord {
    pub(crate) fid: FiberId,
    pub(crate) name: String,
    pub(crate) state: FiberState,
    pub(crate) flags: FiberFlags,
    /// Boxed so its address survives moves of the record.
    pub(crate) ctx: NonNull<Context>,
    pub(crate) stack: Stack,
    /// Default-size stack, eligible for the pool.
    pub(crate) pooled: bool,
    pub(crate) entry: Option<FiberEntry>,
    pub(crate) outcome: Option<FiberResult<i32>>,
    pub(crate) region: Region,
    /// `with_gc` has the region checked out.
    pub(crate) region_busy: bool,
    /// Fibers blocked in `join`/`wait_dead` on this one.
    pub(crate) waiters: Vec<FiberId>,
    /// Fiber blocked in `start` on this one.
    pub(crate) caller: Option<FiberId>,
    pub(crate) arg: Option<FiberId>,
    pub(crate) timer: Option<TimerHandle>,
    pub(crate) csw: u64,
}

impl FiberRecord {
    /// Wrap a fresh stack. The context starts in `fiber_loop` with the
    /// owning cord's address as its argument.
    pub(crate) fn new(stack: Stack, pooled: bool, cord_addr: usize) -> Self {
        let ctx = NonNull::from(Box::leak(Box::new(Context::default())));
        // SAFETY: ctx was just allocated, and the stack is owned by this
        // record so it outlives every switch into ctx
        unsafe { arch::init_context(ctx.as_ptr(), stack.top(), fiber_loop, cord_addr) };
        Self {
            fid: FiberId::SCHED,
            name: String::new(),
            state: FiberState::Dead,
            flags: FiberFlags::empty(),
            ctx,
            stack,
            pooled,
            entry: None,
            outcome: None,
            region: Region::new(),
            region_busy: false,
            waiters: Vec::new(),
            caller: None,
            arg: None,
            timer: None,
            csw: 0,
        }
    }

    /// Start a new life under a new id.
    pub(crate) fn revive(
        &mut self,
        fid: FiberId,
        name: &str,
        flags: FiberFlags,
        entry: FiberEntry,
        track_alloc_site: bool,
    ) {
        self.fid = fid;
        self.name.clear();
        self.name.push_str(name);
        self.state = FiberState::New;
        self.flags = flags;
        self.entry = Some(entry);
        self.outcome = None;
        self.csw = 0;
        self.region.set_track_first_alloc(track_alloc_site);
    }

    /// Clear everything of the life that just ended.
    pub(crate) fn reset(&mut self) {
        self.region.reset();
        self.region_busy = false;
        self.name.clear();
        self.flags = FiberFlags::empty();
        self.state = FiberState::Dead;
        self.waiters.clear();
        self.entry = None;
        self.outcome = None;
        self.caller = None;
        self.arg = None;
        self.timer = None;
    }
}

impl Drop for FiberRecord {
    fn drop(&mut self) {
        // SAFETY: allocated in `new`; nothing switches into a dropped record
        unsafe { drop(Box::from_raw(self.ctx.as_ptr())) };
    }
}

extern "C" fn fiber_loop(arg: usize) -> ! {
    // SAFETY: `arg` is the address of the boxed cord that created this
    // stack; the cord outlives every record it owns
    let cord = unsafe { &*(arg as *const Cord) };
    loop {
        let outcome = match cord.take_current_entry() {
            Some(entry) => fiber_invoke(entry),
            None => Err(FiberError::InvalidState("fiber resumed without an entry")),
        };
        let Some(fid) = cord.finish_current(outcome) else {
            kerror!("fiber finished outside of the scheduler");
            std::process::abort();
        };
        cord.switch_out(fid);
    }
}

/// Run one entry function, turning a panic into an error outcome.
#[inline(never)]
fn fiber_invoke(entry: FiberEntry) -> FiberResult<i32> {
    panic::catch_unwind(AssertUnwindSafe(entry))
        .unwrap_or_else(|payload| Err(FiberError::Panicked(panic_message(payload.as_ref()))))
}

impl Cord {
    pub(crate) fn with_record<R>(&self, fid: FiberId, f: impl FnOnce(&FiberRecord) -> R) -> Option<R> {
        self.inner.borrow().fibers.get(&fid).map(f)
    }

    pub(crate) fn with_record_mut<R>(
        &self,
        fid: FiberId,
        f: impl FnOnce(&mut FiberRecord) -> R,
    ) -> Option<R> {
        self.inner.borrow_mut().fibers.get_mut(&fid).map(f)
    }

    fn checkout_region(&self, fid: FiberId) -> FiberResult<Region> {
        self.with_record_mut(fid, |rec| {
            if rec.region_busy {
                return Err(FiberError::InvalidState("gc region is already in use"));
            }
            rec.region_busy = true;
            Ok(std::mem::replace(&mut rec.region, Region::new()))
        })
        .ok_or(FiberError::NotFound)?
    }

    fn checkin_region(&self, fid: FiberId, region: Region) {
        self.with_record_mut(fid, |rec| {
            rec.region = region;
            rec.region_busy = false;
        });
    }
}

fn cord() -> FiberResult<&'static Cord> {
    tls::cord().ok_or(FiberError::NoCord)
}

fn cord_and_self() -> FiberResult<(&'static Cord, FiberId)> {
    let cord = cord()?;
    let me = cord.current_id().ok_or(FiberError::NoCord)?;
    Ok((cord, me))
}

/// Handle to a fiber of the current cord.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fiber {
    fid: FiberId,
}

impl Fiber {
    #[inline]
    pub const fn from_id(fid: FiberId) -> Self {
        Fiber { fid }
    }

    #[inline]
    pub const fn id(&self) -> FiberId {
        self.fid
    }

    pub fn name(&self) -> Option<String> {
        tls::cord()?.with_record(self.fid, |rec| rec.name.clone())
    }

    /// Rename the fiber; names longer than `FIBER_NAME_MAX` bytes are cut.
    pub fn set_name(&self, name: &str) -> FiberResult<()> {
        let name = crate::scheduler::truncate_name(name);
        cord()?
            .with_record_mut(self.fid, |rec| {
                rec.name.clear();
                rec.name.push_str(name);
            })
            .ok_or(FiberError::NotFound)
    }

    pub fn state(&self) -> Option<FiberState> {
        tls::cord()?.with_record(self.fid, |rec| rec.state)
    }

    pub fn flags(&self) -> Option<FiberFlags> {
        tls::cord()?.with_record(self.fid, |rec| rec.flags)
    }

    /// Dead, or no longer known to the cord.
    pub fn is_dead(&self) -> bool {
        tls::cord().is_none_or(|cord| cord.is_dead_or_gone(self.fid))
    }

    /// Times the fiber was switched in during its current life.
    pub fn csw(&self) -> u64 {
        tls::cord()
            .and_then(|cord| cord.with_record(self.fid, |rec| rec.csw))
            .unwrap_or(0)
    }

    pub fn arg(&self) -> Option<Fiber> {
        tls::cord()?
            .with_record(self.fid, |rec| rec.arg)?
            .map(Fiber::from_id)
    }

    /// Attach a weak reference to another fiber.
    pub fn set_arg(&self, arg: Option<Fiber>) -> FiberResult<()> {
        cord()?
            .with_record_mut(self.fid, |rec| rec.arg = arg.map(|f| f.fid))
            .ok_or(FiberError::NotFound)
    }

    /// Run a `New` fiber now. The caller resumes once it yields, sleeps or
    /// dies.
    pub fn start(&self) -> FiberResult<()> {
        cord()?.start_fiber(self.fid)
    }

    /// Make the fiber runnable. Waking a `New` fiber launches it; anything
    /// else that is not suspended is left alone.
    pub fn wakeup(&self) {
        if let Some(cord) = tls::cord() {
            cord.wakeup(self.fid);
        }
    }

    pub fn cancel(&self) {
        if let Some(cord) = tls::cord() {
            cord.cancel(self.fid);
        }
    }

    /// Wait for a joinable fiber to die and collect its outcome.
    pub fn join(&self) -> FiberResult<i32> {
        cord()?.join_until(self.fid, None)
    }

    pub fn join_timeout(&self, timeout: Duration) -> FiberResult<i32> {
        cord()?.join_until(self.fid, Instant::now().checked_add(timeout))
    }

    /// Wait until the fiber is dead. False on timeout or if the waiting
    /// fiber is cancelled.
    pub fn wait_dead(&self, timeout: Duration) -> bool {
        self.wait_dead_until(Instant::now().checked_add(timeout))
    }

    pub fn wait_dead_until(&self, deadline: Option<Instant>) -> bool {
        match tls::cord() {
            Some(cord) => cord.wait_dead_until(self.fid, deadline),
            None => true,
        }
    }

    pub fn set_joinable(&self, yes: bool) -> FiberResult<()> {
        cord()?.set_joinable(self.fid, yes)
    }

    pub fn set_system(&self, yes: bool) -> FiberResult<()> {
        cord()?.set_system(self.fid, yes)
    }
}

impl std::fmt::Display for Fiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fiber {}", self.fid)
    }
}

/// Create a client fiber with default attributes. It does not run until
/// started or woken.
pub fn new<F, R>(name: &str, f: F) -> FiberResult<Fiber>
where
    F: FnOnce() -> R + 'static,
    R: IntoFiberStatus,
{
    new_ex(name, FiberAttr::new(), f)
}

pub fn new_system<F, R>(name: &str, f: F) -> FiberResult<Fiber>
where
    F: FnOnce() -> R + 'static,
    R: IntoFiberStatus,
{
    new_ex(name, FiberAttr::system(), f)
}

pub fn new_ex<F, R>(name: &str, attr: FiberAttr, f: F) -> FiberResult<Fiber>
where
    F: FnOnce() -> R + 'static,
    R: IntoFiberStatus,
{
    cord()?.create(name, attr, boxed_entry(f)).map(Fiber::from_id)
}

/// The running fiber.
pub fn current() -> Option<Fiber> {
    tls::cord()?.current_id().map(Fiber::from_id)
}

/// Live fiber with this id, including dead ones waiting for a join.
pub fn find(fid: FiberId) -> Option<Fiber> {
    tls::cord()?.with_record(fid, |_| Fiber::from_id(fid))
}

/// Let the other ready fibers run; the caller goes to the tail.
pub fn yield_now() {
    match tls::cord() {
        Some(cord) if cord.current_id().is_some() => cord.yield_current(),
        _ => std::thread::yield_now(),
    }
}

/// One turn at the tail of the ready queue.
pub fn reschedule() {
    yield_now();
}

/// Suspend until woken or cancelled.
pub fn suspend() {
    if let Some(cord) = tls::cord() {
        cord.suspend_current(SuspendReason::Parked);
    }
}

/// Sleep for `duration`. Zero yields once; a duration past the end of
/// time sleeps until woken.
pub fn sleep(duration: Duration) {
    match tls::cord() {
        Some(cord) if cord.current_id().is_some() => cord.sleep(duration),
        _ => std::thread::sleep(duration),
    }
}

pub fn sleep_until(deadline: Instant) {
    match tls::cord() {
        Some(cord) if cord.current_id().is_some() => cord.sleep_until(Some(deadline)),
        _ => std::thread::sleep(deadline.saturating_duration_since(Instant::now())),
    }
}

/// `Err(Cancelled)` if the running fiber was cancelled.
pub fn testcancel() -> FiberResult<()> {
    if is_cancelled() {
        Err(FiberError::Cancelled)
    } else {
        Ok(())
    }
}

pub fn is_cancelled() -> bool {
    cord_and_self().is_ok_and(|(cord, me)| cord.is_cancelled(me))
}

/// Whether `cancel` may wake the running fiber. Returns the previous value.
pub fn set_cancellable(yes: bool) -> bool {
    match cord_and_self() {
        Ok((cord, me)) => cord.set_cancellable(me, yes),
        Err(_) => true,
    }
}

/// Whether `target` is still alive at `deadline`.
pub fn wait_on_deadline(target: Fiber, deadline: Instant) -> bool {
    !target.wait_dead_until(Some(deadline))
}

/// Run `f` with the running fiber's gc region.
///
/// Whatever `f` leaves allocated must be released before the fiber dies,
/// otherwise recycling reports a gc leak.
pub fn with_gc<R>(f: impl FnOnce(&mut Region) -> R) -> FiberResult<R> {
    let (cord, me) = cord_and_self()?;
    let mut lease = RegionLease {
        cord,
        fid: me,
        region: Some(cord.checkout_region(me)?),
    };
    let region = lease.region.as_mut().ok_or(FiberError::NotFound)?;
    Ok(f(region))
}

/// A region checked out of its record; goes back on drop, unwinding included.
struct RegionLease<'a> {
    cord: &'a Cord,
    fid: FiberId,
    region: Option<Region>,
}

impl Drop for RegionLease<'_> {
    fn drop(&mut self) {
        if let Some(region) = self.region.take() {
            self.cord.checkin_region(self.fid, region);
        }
    }
}

/// Snapshot of one live fiber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiberInfo {
    pub id: FiberId,
    pub name: String,
    pub state: FiberState,
    pub flags: FiberFlags,
    pub csw: u64,
    pub region_used: usize,
}

/// Every fiber in the live registry, ordered by id.
pub fn info() -> Vec<FiberInfo> {
    let Some(cord) = tls::cord() else {
        return Vec::new();
    };
    let inner = cord.inner.borrow();
    let mut list: Vec<FiberInfo> = inner
        .fibers
        .values()
        .map(|rec| FiberInfo {
            id: rec.fid,
            name: rec.name.clone(),
            state: rec.state,
            flags: rec.flags,
            csw: rec.csw,
            region_used: rec.region.used(),
        })
        .collect();
    list.sort_by_key(|i| i.id);
    list
}

/// Unmap the stacks of dead fibers that were not pooled.
pub fn collect_garbage() -> usize {
    tls::cord().map_or(0, |cord| cord.collect_garbage())
}

/// Live, pooled and not yet collected fibers of the current cord.
pub fn fiber_count_total() -> usize {
    tls::cord().map_or(0, |cord| cord.inner.borrow().fiber_count_total())
}

/// Live non-system fibers of the current cord.
pub fn client_fiber_count() -> usize {
    tls::cord().map_or(0, |cord| cord.inner.borrow().client_fiber_count)
}

/// Bytes mapped for fiber stacks by the current cord, guard pages included.
pub fn stack_bytes_used() -> usize {
    tls::cord().map_or(0, |cord| cord.inner.borrow().stacks.stack_bytes_used())
}
