// tickloop
//
// A single-threaded, cooperative event loop that interleaves microtasks,
// single-shot timers, check-phase immediates and I/O completions under fixed
// phase rules, plus a bounded worker pool whose results come back through the
// poll queue.
//
// ```rust
// use std::time::Duration;
// use tickloop::{EventLoop, LoopContext};
//
// let mut event_loop = EventLoop::with_defaults()?;
// event_loop.run(|ctx: &mut LoopContext| {
//     ctx.set_timeout(Duration::ZERO, |_| Ok(()));
//     ctx.queue_microtask(|_| Ok(()));
//     Ok(())
// })?;
// ```

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod local;
pub mod logging;
pub mod pool;
pub mod promise;
pub mod queue;
pub mod task;

// Re-export commonly used types
pub use config::{ErrorPolicy, EventLoopConfig};
pub use context::{LoopContext, RemoteHandle};
pub use driver::{EventLoop, RunReport};
pub use error::{CallbackError, Diagnostic, LoopError, WorkerJobError};
pub use pool::{JobId, JobState, PoolMetrics, WorkHandle, WorkerStatus};
pub use promise::{Promise, PromiseState, Resolver};
pub use queue::poll::IoToken;
pub use queue::TimerHandle;
pub use task::{CallbackResult, TaskId, TaskKind};
