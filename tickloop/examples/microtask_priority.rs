//! Every microtask queued by a macrotask runs before the next macrotask, even
//! one that was due earlier.
//!
//! Prints S1, S2, S3, M2, T1, M1, T2.

use std::time::Duration;

use tickloop::EventLoop;

fn main() -> anyhow::Result<()> {
    tickloop::logging::init_default();

    let mut event_loop = EventLoop::with_defaults()?;
    let report = event_loop.run(|ctx| {
        println!("S1");
        ctx.set_timeout(Duration::ZERO, |ctx| {
            println!("T1");
            ctx.queue_microtask(|_| {
                println!("M1");
                Ok(())
            });
            Ok(())
        });
        println!("S2");
        ctx.queue_microtask(|ctx| {
            println!("M2");
            ctx.set_timeout(Duration::ZERO, |_| {
                println!("T2");
                Ok(())
            });
            Ok(())
        });
        println!("S3");
        Ok(())
    })?;

    println!(
        "{} iterations, {} callbacks, {} microtasks",
        report.iterations, report.callbacks_run, report.microtasks_run
    );
    Ok(())
}
