//! Basic fibercord example
//!
//! Runs a few fibers in one cord: plain workers that yield, a sleeper, a
//! joinable fiber with a result, and a cancelled one.
//!
//! # Environment Variables
//!
//! - `FIBERCORD_FLUSH_EPRINT=1` - Flush log output immediately (useful for crash debugging)
//! - `FIBERCORD_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use fibercord::{fiber, kdebug, kinfo, run, spawn, FiberAttr, FiberError, FiberResult};

// FIBERCORD_LOG_LEVEL=debug FIBERCORD_FLUSH_EPRINT=1 cargo run -p fibercord-basic
fn main() {
    println!("=== fibercord Basic Example ===\n");

    let start = Instant::now();
    let status = run("basic", || -> FiberResult<()> {
        let completed = Rc::new(Cell::new(0));

        kinfo!("Spawning fibers...");
        for i in 1..=3 {
            let c = Rc::clone(&completed);
            let f = spawn("worker", move || {
                kdebug!("[worker {}] Started", i);
                for j in 0..3 {
                    kdebug!("[worker {}] Iteration {}", i, j);
                    fiber::yield_now();
                }
                kdebug!("[worker {}] Finished", i);
                c.set(c.get() + 1);
            })?;
            println!("Spawned worker {} ({})", i, f.id());
        }

        let sleeper = fiber::new_ex("sleeper", FiberAttr::new().joinable(true), || {
            fiber::sleep(Duration::from_millis(50));
            7
        })?;
        sleeper.wakeup();

        let stubborn = fiber::new_ex("stubborn", FiberAttr::new().joinable(true), || -> FiberResult<()> {
            loop {
                fiber::sleep(Duration::from_secs(3600));
                fiber::testcancel()?;
            }
        })?;
        stubborn.start()?;

        println!("sleeper returned {:?}", sleeper.join());
        stubborn.cancel();
        let cancelled = stubborn.join();
        assert_eq!(cancelled, Err(FiberError::Cancelled));
        println!("stubborn ended with: {}", FiberError::Cancelled);

        println!("Completed workers: {}/3", completed.get());
        println!("Fibers in cord (live + pooled): {}", fiber::fiber_count_total());
        Ok(())
    });

    println!("\nExit status: {:?}", status);
    println!("Elapsed: {:?}", start.elapsed());
}
