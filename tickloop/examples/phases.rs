//! Timers, poll and check phases around a file read that runs on the worker
//! pool, followed by CPU-heavy jobs that run in parallel.
//!
//! ```text
//! cargo run --example phases -- [path]
//! TICKLOOP_LOG=debug TICKLOOP_LOG_FILE=phases.log cargo run --example phases
//! ```

use std::time::{Duration, Instant};

use tickloop::logging::{self, LogConfig};
use tickloop::{log_error, EventLoop, EventLoopConfig, LoopContext};

const BLOCK_FOR: Duration = Duration::from_millis(500);

/// Stands in for a key-derivation call: deterministic and slow.
fn stretch(password: &str, rounds: u32) -> u64 {
    let mut state = 0xcbf2_9ce4_8422_2325u64;
    for round in 0..rounds {
        for byte in password.bytes().chain(round.to_le_bytes()) {
            state ^= byte as u64;
            state = state.wrapping_mul(0x0100_0000_01b3);
        }
    }
    state
}

fn on_file_read(ctx: &mut LoopContext, start: Instant, contents: String) -> tickloop::CallbackResult {
    println!("IO Polling Finish ({} bytes)", contents.len());

    // Holds the loop thread; nothing else can run meanwhile.
    let end = Instant::now() + BLOCK_FOR;
    while Instant::now() < end {
        std::hint::spin_loop();
    }
    println!("CPU blocking finished");

    ctx.set_timeout(Duration::ZERO, |_| {
        println!("Timer 2");
        Ok(())
    });
    ctx.set_timeout(BLOCK_FOR * 4, |_| {
        println!("Timer 3");
        Ok(())
    });
    ctx.set_immediate(|_| {
        println!("Immediate fn 2");
        Ok(())
    });

    for n in 1..=4 {
        let password = format!("password{}", n);
        ctx.submit_work_with(
            move || Ok(stretch(&password, 200_000)),
            move |_, digest| {
                let digest = digest?;
                println!("{}ms Password {} Done ({:016x})", start.elapsed().as_millis(), n, digest);
                Ok(())
            },
        )?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // TICKLOOP_LOG picks the preset; TICKLOOP_LOG_FILE also copies events to a file.
    let log_config = LogConfig::from_env();
    match std::env::var_os("TICKLOOP_LOG_FILE") {
        Some(file) => logging::init_with_file(log_config, file)?,
        None => logging::init(log_config),
    }

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml").to_string());
    let start = Instant::now();

    let mut event_loop = EventLoop::new(EventLoopConfig::default())?;
    event_loop.run(move |ctx| {
        ctx.set_timeout(Duration::ZERO, |_| {
            println!("Timer 1");
            Ok(())
        });
        ctx.set_immediate(|_| {
            println!("Immediate fn 1");
            Ok(())
        });

        let read_path = path.clone();
        ctx.submit_work_with(
            move || Ok(std::fs::read_to_string(&read_path)?),
            move |ctx, contents| match contents {
                Ok(contents) => on_file_read(ctx, start, contents),
                Err(error) => {
                    log_error!(error, operation = "read_file", path = %path);
                    Ok(())
                }
            },
        )?;

        println!("Hello from top level code");
        Ok(())
    })?;

    Ok(())
}
