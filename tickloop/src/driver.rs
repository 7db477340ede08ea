//! # Loop Driver
//!
//! [`EventLoop`] owns a [`LoopContext`] and runs it through the fixed phase
//! order until nothing can produce another callback.
//!
//! ## Iteration
//! 1. Timers: every timer due at phase entry, in `(deadline, sequence)` order.
//!    Timers created during the phase wait for the next iteration.
//! 2. Poll: every completion that has arrived by phase entry, in arrival order.
//! 3. Check: the immediates queued so far, including those queued during
//!    this iteration's poll phase.
//!
//! After every single callback, the microtask queue is drained completely,
//! including microtasks queued while draining. When no phase has work the
//! driver blocks on the poll channel and the wake channel, with a timeout at
//! the earliest timer deadline.

use std::fmt;
use std::time::Instant;

use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::config::{ErrorPolicy, EventLoopConfig};
use crate::context::LoopContext;
use crate::error::{CallbackError, Diagnostic, LoopError};
use crate::local::LocalTaskId;
use crate::pool::PoolMetrics;
use crate::queue::poll::Completion;
use crate::task::{CallbackResult, Task, TaskId, TaskKind};
use crate::{log_phase, loop_span};

/// Counters collected over one call to [`EventLoop::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Full passes through the timers, poll and check phases.
    pub iterations: u64,
    /// Entry, timer, poll and immediate callbacks executed.
    pub callbacks_run: u64,
    /// Microtasks executed, including resumptions of async units.
    pub microtasks_run: u64,
    pub callback_errors: u64,
    pub unhandled_rejections: u64,
}

type DiagnosticHook = Box<dyn FnMut(&Diagnostic)>;

enum Wakeup {
    Completion(Completion),
    Resume(LocalTaskId),
}

/// A single-threaded, phased event loop with a background worker pool.
pub struct EventLoop {
    id: Uuid,
    ctx: LoopContext,
    config: EventLoopConfig,
    hook: DiagnosticHook,
    report: RunReport,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("ctx", &self.ctx)
            .finish()
    }
}

impl EventLoop {
    /// Creates a loop and starts its worker pool.
    pub fn new(config: EventLoopConfig) -> Result<Self, LoopError> {
        config.validate()?;
        let ctx = LoopContext::new(&config)?;
        let id = Uuid::new_v4();
        debug!(loop_id = %id, pool_size = config.worker_pool_size, "event loop created");
        Ok(Self {
            id,
            ctx,
            config,
            hook: Box::new(log_diagnostic),
            report: RunReport::default(),
        })
    }

    pub fn with_defaults() -> Result<Self, LoopError> {
        Self::new(EventLoopConfig::default())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &EventLoopConfig {
        &self.config
    }

    /// Replaces the diagnostic hook. The default logs through `tracing`.
    pub fn set_diagnostic_hook<H>(&mut self, hook: H)
    where
        H: FnMut(&Diagnostic) + 'static,
    {
        self.hook = Box::new(hook);
    }

    /// Direct access to the scheduler state, e.g. to submit work before [`EventLoop::run_until_idle`].
    pub fn context(&mut self) -> &mut LoopContext {
        &mut self.ctx
    }

    pub fn pool_metrics(&self) -> PoolMetrics {
        self.ctx.pool_metrics()
    }

    /// Runs `entry` synchronously, then the loop until no work is left.
    pub fn run<F>(&mut self, entry: F) -> Result<RunReport, LoopError>
    where
        F: FnOnce(&mut LoopContext) -> CallbackResult + 'static,
    {
        let span = loop_span!(self.id);
        let _guard = span.enter();
        self.report = RunReport::default();

        let id = self.ctx.next_task_id();
        let entry = Task::new(id, TaskKind::Entry, Box::new(entry));
        self.report.callbacks_run += 1;
        if let Err(error) = entry.run(&mut self.ctx) {
            self.report.callback_errors += 1;
            (self.hook)(&Diagnostic::CallbackError {
                task: id,
                kind: TaskKind::Entry,
                error: error.clone(),
            });
            if self.config.entry_error_policy == ErrorPolicy::Fatal {
                return Err(LoopError::EntryFailed(error));
            }
        }

        self.drive()
    }

    /// Runs the loop over already queued work until no work is left.
    pub fn run_until_idle(&mut self) -> Result<RunReport, LoopError> {
        let span = loop_span!(self.id);
        let _guard = span.enter();
        self.report = RunReport::default();
        self.drive()
    }

    fn drive(&mut self) -> Result<RunReport, LoopError> {
        loop {
            self.drain_microtasks()?;

            if !self.ctx.is_alive() {
                break;
            }
            if !self.ctx.has_runnable_work(Instant::now()) {
                self.wait_for_work();
                continue;
            }

            self.report.iterations += 1;
            trace!(iteration = self.report.iterations, "loop iteration");
            self.run_timers()?;
            self.run_poll()?;
            self.run_check()?;
        }

        self.finish()
    }

    fn run_timers(&mut self) -> Result<(), LoopError> {
        let now = Instant::now();
        let limit = self.ctx.timers.next_sequence();
        let mut fired = 0usize;
        while let Some(entry) = self.ctx.timers.pop_due(now, limit) {
            fired += 1;
            self.dispatch(entry.task)?;
        }
        if fired > 0 {
            log_phase!("timers", fired);
        }
        Ok(())
    }

    fn run_poll(&mut self) -> Result<(), LoopError> {
        let mut batch = self.ctx.poll.take_batch();
        if batch.is_empty() {
            return Ok(());
        }
        log_phase!("poll", batch.len());

        while let Some(completion) = batch.pop_front() {
            if let Err(error) = self.run_completion(completion) {
                // A fatal stop must not lose completions that were already received.
                self.ctx.poll.restore_front(batch);
                return Err(error);
            }
        }
        Ok(())
    }

    fn run_completion(&mut self, completion: Completion) -> Result<(), LoopError> {
        match completion {
            Completion::Job { job, outcome } => {
                let Some(callback) = self.ctx.take_job_callback(job) else {
                    trace!(job = job.0, "completion for cancelled job discarded");
                    return Ok(());
                };
                let id = self.ctx.next_task_id();
                let task = Task::new(id, TaskKind::Work, Box::new(move |ctx| callback(ctx, outcome)));
                self.dispatch(task)
            }
            Completion::Io { token, work } => {
                if !self.ctx.complete_io(token) {
                    warn!(token = token.id(), "discarding completion for unknown io token");
                    return Ok(());
                }
                let id = self.ctx.next_task_id();
                self.dispatch(Task::new(id, TaskKind::Io, work))
            }
        }
    }

    fn run_check(&mut self) -> Result<(), LoopError> {
        let mut batch = self.ctx.immediates.take_batch();
        if batch.is_empty() {
            return Ok(());
        }
        log_phase!("check", batch.len());

        while let Some(task) = batch.pop_front() {
            if let Err(error) = self.dispatch(task) {
                self.ctx.immediates.restore_front(batch);
                return Err(error);
            }
        }
        Ok(())
    }

    /// Runs one macrotask, then drains the microtask queue.
    fn dispatch(&mut self, task: Task) -> Result<(), LoopError> {
        let (id, kind) = (task.id(), task.kind());
        self.report.callbacks_run += 1;
        if let Err(error) = task.run(&mut self.ctx) {
            self.callback_failed(id, kind, error)?;
        }
        self.drain_microtasks()
    }

    fn drain_microtasks(&mut self) -> Result<(), LoopError> {
        loop {
            self.ctx.flush_wakes();
            let Some(task) = self.ctx.microtasks.pop() else {
                return Ok(());
            };
            let (id, kind) = (task.id(), task.kind());
            self.report.microtasks_run += 1;
            if let Err(error) = task.run(&mut self.ctx) {
                self.callback_failed(id, kind, error)?;
            }
        }
    }

    fn callback_failed(&mut self, task: TaskId, kind: TaskKind, error: CallbackError) -> Result<(), LoopError> {
        self.report.callback_errors += 1;
        (self.hook)(&Diagnostic::CallbackError {
            task,
            kind,
            error: error.clone(),
        });
        match self.config.callback_error_policy {
            ErrorPolicy::Report => Ok(()),
            ErrorPolicy::Fatal => Err(LoopError::CallbackFailed {
                task,
                kind,
                source: error,
            }),
        }
    }

    /// Blocks until a completion arrives, an async unit is woken, or the earliest timer is due.
    fn wait_for_work(&mut self) {
        let deadline = self.ctx.timers.next_deadline();
        trace!(?deadline, "waiting for work");

        let wakeup = {
            let selector = flume::Selector::new()
                .recv(self.ctx.poll.receiver(), |r| r.ok().map(Wakeup::Completion))
                .recv(self.ctx.local.wake_receiver(), |r| r.ok().map(Wakeup::Resume));
            match deadline {
                Some(deadline) => selector.wait_deadline(deadline).ok().flatten(),
                None => selector.wait(),
            }
        };

        match wakeup {
            Some(Wakeup::Completion(completion)) => self.ctx.poll.push_ready(completion),
            Some(Wakeup::Resume(local)) => self.ctx.push_resume(local),
            None => {}
        }
    }

    fn finish(&mut self) -> Result<RunReport, LoopError> {
        let unhandled = self.ctx.take_unhandled_rejections();
        for rejection in &unhandled {
            self.report.unhandled_rejections += 1;
            (self.hook)(&Diagnostic::UnhandledRejection {
                promise: rejection.promise,
                error: rejection.error.clone(),
            });
        }

        if !unhandled.is_empty() && self.config.unhandled_rejection_policy == ErrorPolicy::Fatal {
            return Err(LoopError::UnhandledRejections(unhandled.len()));
        }

        debug!(
            iterations = self.report.iterations,
            callbacks = self.report.callbacks_run,
            microtasks = self.report.microtasks_run,
            "event loop finished"
        );
        Ok(self.report.clone())
    }
}

fn log_diagnostic(diagnostic: &Diagnostic) {
    match diagnostic {
        Diagnostic::CallbackError { task, kind, error } => {
            error!(task = %task, kind = %kind, error = %error, "callback failed");
        }
        Diagnostic::UnhandledRejection { promise, error } => {
            warn!(promise, error = %error, "unhandled promise rejection");
        }
    }
}
