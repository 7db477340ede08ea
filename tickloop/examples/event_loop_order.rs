//! Synchronous code, then microtasks (including the tail of an async unit),
//! then timers.
//!
//! Prints S1, S2, AS, S3, M, AE, T.

use std::time::Duration;

use tickloop::{CallbackError, EventLoop, Promise};

fn main() -> anyhow::Result<()> {
    tickloop::logging::init_default();

    let mut event_loop = EventLoop::with_defaults()?;
    event_loop.run(|ctx| {
        println!("S1");
        ctx.set_timeout(Duration::ZERO, |_| {
            println!("T");
            Ok(())
        });
        println!("S2");
        ctx.queue_microtask(|_| {
            println!("M");
            Ok(())
        });

        ctx.spawn_local(async {
            println!("AS");
            Promise::resolved(()).await?;
            println!("AE");
            Ok::<_, CallbackError>(())
        });

        println!("S3");
        Ok(())
    })?;

    Ok(())
}
