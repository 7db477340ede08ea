//! Units of work and their one-shot execution.
//!
//! A [`Task`] owns its callback by value; running it consumes the task, so a
//! task can never be executed twice or silently re-queued.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::context::LoopContext;
use crate::error::CallbackError;
use crate::local::LocalTaskId;

/// Result returned by every callback.
pub type CallbackResult = Result<(), CallbackError>;

/// Boxed unit of work executed on the loop thread.
pub type Callback = Box<dyn FnOnce(&mut LoopContext) -> CallbackResult + 'static>;

/// Unit of work produced off the loop thread (I/O completions).
pub type SendCallback = Box<dyn FnOnce(&mut LoopContext) -> CallbackResult + Send + 'static>;

/// Identifier assigned to every task at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The queue a task was submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// The synchronous entry task passed to `EventLoop::run`.
    Entry,
    Microtask,
    Timer,
    Immediate,
    Io,
    /// Completion of a worker pool job, delivered through the poll queue.
    Work,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Entry => "entry",
            TaskKind::Microtask => "microtask",
            TaskKind::Timer => "timer",
            TaskKind::Immediate => "immediate",
            TaskKind::Io => "io",
            TaskKind::Work => "work",
        };
        f.write_str(name)
    }
}

pub(crate) enum Work {
    Callback(Callback),
    /// Poll a suspended async unit again.
    Resume(LocalTaskId),
}

/// A queued unit of work.
pub struct Task {
    id: TaskId,
    kind: TaskKind,
    work: Work,
}

impl Task {
    pub(crate) fn new(id: TaskId, kind: TaskKind, callback: Callback) -> Self {
        Self {
            id,
            kind,
            work: Work::Callback(callback),
        }
    }

    pub(crate) fn resume(id: TaskId, local: LocalTaskId) -> Self {
        Self {
            id,
            kind: TaskKind::Microtask,
            work: Work::Resume(local),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Runs the task to completion, converting a panic into [`CallbackError::Panicked`].
    pub(crate) fn run(self, ctx: &mut LoopContext) -> CallbackResult {
        match self.work {
            Work::Callback(callback) => run_guarded(|| callback(ctx)),
            Work::Resume(local) => {
                ctx.poll_local(local);
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Calls `f`, catching a panic and reporting it as an error.
pub(crate) fn run_guarded<F>(f: F) -> CallbackResult
where
    F: FnOnce() -> CallbackResult,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(CallbackError::Panicked(panic_message(payload))),
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}
