//! Cross-cord join example
//!
//! The main cord starts worker cords and waits for each with `cojoin`,
//! keeping its own fibers running while it waits. The last worker never
//! finishes on its own and is stopped by cancelling the waiting fiber,
//! which forwards the cancel to the worker's main fiber.
//!
//! # Environment Variables
//!
//! - `FIBERCORD_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)

use std::time::Duration;

use fibercord::{cord_start, fiber, kinfo, run, FiberAttr, FiberError, FiberResult};

fn busy_worker(n: u64) -> FiberResult<i32> {
    let mut sum = 0u64;
    for i in 0..n {
        sum += i;
        if i % 1000 == 0 {
            fiber::yield_now();
        }
    }
    kinfo!("sum of 0..{} is {}", n, sum);
    Ok((sum % 1000) as i32)
}

fn until_cancelled() -> FiberResult<()> {
    loop {
        fiber::sleep(Duration::from_millis(10));
        fiber::testcancel()?;
    }
}

fn main() {
    println!("=== fibercord Cojoin Example ===\n");

    let status = run("main", || -> FiberResult<()> {
        let ticker = fiber::new_system("ticker", || {
            let mut ticks = 0;
            while !fiber::is_cancelled() {
                fiber::sleep(Duration::from_millis(5));
                ticks += 1;
            }
            kinfo!("ticker saw {} ticks", ticks);
        })?;
        ticker.wakeup();

        let workers: Vec<_> = (1..=3)
            .map(|i| cord_start(&format!("worker{}", i), move || busy_worker(i * 100_000)))
            .collect::<FiberResult<_>>()?;
        for handle in workers {
            let name = handle.name().to_string();
            println!("{} finished with {:?}", name, handle.cojoin());
        }

        let endless = cord_start("endless", until_cancelled)?;
        let waiter = fiber::new_ex("waiter", FiberAttr::new().joinable(true), move || endless.cojoin())?;
        waiter.wakeup();
        fiber::sleep(Duration::from_millis(50));
        waiter.cancel();
        let res = waiter.join();
        assert_eq!(res, Err(FiberError::Cancelled));
        println!("endless finished with {:?}", res);

        ticker.cancel();
        fiber::yield_now();
        Ok(())
    });

    println!("\nExit status: {:?}", status);
}
