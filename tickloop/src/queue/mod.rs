//! # Deferred Work Queues
//!
//! The four queues the loop services. All of them are owned by a single
//! [`LoopContext`](crate::context::LoopContext) and only ever touched from the
//! loop thread; the poll queue additionally exposes a channel sender that
//! other threads use to hand completions over.
//!
//! ## Phase Mapping
//! - `timer`: timers phase, ordered by `(deadline, sequence)`
//! - `poll`: poll phase, I/O and worker completions in arrival order
//! - `immediate`: check phase, FIFO with a per-phase snapshot
//! - `microtask`: drained after every single callback

pub mod immediate;
pub mod microtask;
pub mod poll;
pub mod timer;

pub use immediate::ImmediateQueue;
pub use microtask::MicrotaskQueue;
pub use poll::{Completion, IoToken, JobOutcome, PollQueue};
pub use timer::{TimerEntry, TimerHandle, TimerQueue};
