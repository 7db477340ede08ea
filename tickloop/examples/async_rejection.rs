//! Two async units await the same kind of flaky request. One handles the
//! failure, the other lets it escape and is reported as an unhandled
//! rejection when the loop runs out of work.

use std::time::Duration;

use tickloop::{CallbackError, EventLoop, LoopContext, Promise};

/// Settles after a delay; odd attempts fail.
fn fake_api(ctx: &mut LoopContext, attempt: u32) -> Promise<String> {
    let (promise, resolver) = Promise::pending();
    ctx.set_timeout(Duration::from_millis(200), move |ctx| {
        if attempt % 2 == 0 {
            resolver.resolve(ctx, "Data fetched successfully".to_string());
        } else {
            resolver.reject(ctx, CallbackError::msg("API request failed"));
        }
        Ok(())
    });
    promise
}

fn main() -> anyhow::Result<()> {
    tickloop::logging::init(tickloop::logging::LogConfig::from_env());

    let attempt = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(1);

    let mut event_loop = EventLoop::with_defaults()?;
    event_loop.set_diagnostic_hook(|diagnostic| eprintln!("diagnostic: {:?}", diagnostic));

    let report = event_loop.run(move |ctx| {
        let handled = fake_api(ctx, attempt);
        ctx.spawn_local(async move {
            match handled.await {
                Ok(result) => println!("Handled Result: {}", result),
                Err(error) => println!("Handled Error: {}", error),
            }
            Ok::<_, CallbackError>(())
        });

        let unhandled = fake_api(ctx, attempt);
        ctx.spawn_local(async move {
            let result = unhandled.await?;
            println!("Unhandled Result: {}", result);
            Ok::<_, CallbackError>(())
        });
        Ok(())
    })?;

    println!("unhandled rejections: {}", report.unhandled_rejections);
    Ok(())
}
