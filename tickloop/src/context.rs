//! The submission API handed to the entry task and every callback.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use flume::Sender;
use tracing::{trace, warn};

use crate::config::EventLoopConfig;
use crate::error::{CallbackError, LoopError, WorkerJobError};
use crate::local::{LocalExecutor, LocalTaskId};
use crate::pool::{JobId, PoolMetrics, WorkHandle, WorkerPool, WorkerStatus};
use crate::promise::{PendingRejection, Promise};
use crate::queue::poll::{Completion, IoToken, JobOutcome};
use crate::queue::{ImmediateQueue, MicrotaskQueue, PollQueue, TimerHandle, TimerQueue};
use crate::task::{panic_message, CallbackResult, SendCallback, Task, TaskId, TaskKind};
use crate::log_scheduler;

pub(crate) type JobCallback = Box<dyn FnOnce(&mut LoopContext, JobOutcome) -> CallbackResult>;

/// Owned scheduler state of one event loop.
///
/// Every queue lives here and is only reachable through `&mut LoopContext`,
/// which the driver lends to exactly one running callback at a time.
pub struct LoopContext {
    pub(crate) microtasks: MicrotaskQueue,
    pub(crate) timers: TimerQueue,
    pub(crate) immediates: ImmediateQueue,
    pub(crate) poll: PollQueue,
    pub(crate) local: LocalExecutor,
    pool: WorkerPool,
    pending_jobs: HashMap<JobId, JobCallback>,
    pending_io: HashSet<IoToken>,
    rejections: Vec<PendingRejection>,
    next_task: u64,
    next_io: u64,
}

impl fmt::Debug for LoopContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopContext")
            .field("microtasks", &self.microtasks.len())
            .field("timers", &self.timers.len())
            .field("immediates", &self.immediates.len())
            .field("pending_jobs", &self.pending_jobs.len())
            .field("pending_io", &self.pending_io.len())
            .field("local", &self.local)
            .finish()
    }
}

impl LoopContext {
    pub(crate) fn new(config: &EventLoopConfig) -> Result<Self, LoopError> {
        let poll = PollQueue::new();
        let pool = WorkerPool::new(
            config.worker_pool_size,
            &config.worker_thread_prefix,
            poll.sender(),
        )?;
        Ok(Self {
            microtasks: MicrotaskQueue::new(),
            timers: TimerQueue::new(),
            immediates: ImmediateQueue::new(),
            poll,
            local: LocalExecutor::default(),
            pool,
            pending_jobs: HashMap::new(),
            pending_io: HashSet::new(),
            rejections: Vec::new(),
            next_task: 0,
            next_io: 0,
        })
    }

    pub(crate) fn next_task_id(&mut self) -> TaskId {
        let id = TaskId(self.next_task);
        self.next_task += 1;
        id
    }

    // --- Microtasks ---

    /// Queues `f` to run once the current callback and every microtask ahead of it finish.
    pub fn queue_microtask<F>(&mut self, f: F) -> TaskId
    where
        F: FnOnce(&mut LoopContext) -> CallbackResult + 'static,
    {
        // Continuations woken so far go ahead of the new microtask.
        self.flush_wakes();
        let id = self.next_task_id();
        self.microtasks.push(Task::new(id, TaskKind::Microtask, Box::new(f)));
        id
    }

    /// Moves woken async units onto the microtask queue.
    pub(crate) fn flush_wakes(&mut self) {
        while let Some(local) = self.local.try_next_wake() {
            self.push_resume(local);
        }
    }

    pub(crate) fn push_resume(&mut self, local: LocalTaskId) {
        let id = self.next_task_id();
        self.microtasks.push(Task::resume(id, local));
    }

    // --- Timers ---

    /// Runs `f` in a timers phase once `delay` has elapsed. A zero delay
    /// still waits for the next timers phase.
    pub fn set_timeout<F>(&mut self, delay: Duration, f: F) -> TimerHandle
    where
        F: FnOnce(&mut LoopContext) -> CallbackResult + 'static,
    {
        let id = self.next_task_id();
        let deadline = Instant::now() + delay;
        let handle = self
            .timers
            .insert(deadline, Task::new(id, TaskKind::Timer, Box::new(f)));
        trace!(task = %id, timer = handle.sequence(), ?delay, "timer scheduled");
        handle
    }

    /// Cancels a pending timer. Returns `false` if it already fired or was cancelled.
    pub fn clear_timeout(&mut self, handle: TimerHandle) -> bool {
        self.timers.cancel(handle)
    }

    // --- Immediates ---

    /// Runs `f` in the next check phase.
    pub fn set_immediate<F>(&mut self, f: F) -> TaskId
    where
        F: FnOnce(&mut LoopContext) -> CallbackResult + 'static,
    {
        let id = self.next_task_id();
        self.immediates.push(Task::new(id, TaskKind::Immediate, Box::new(f)));
        id
    }

    // --- External I/O ---

    /// Registers an outstanding external operation. The loop stays alive
    /// until [`RemoteHandle::submit_io`] delivers it or it is cancelled.
    pub fn begin_io(&mut self) -> IoToken {
        let token = IoToken(self.next_io);
        self.next_io += 1;
        self.pending_io.insert(token);
        token
    }

    /// Forgets an outstanding operation; a later completion for it is discarded.
    pub fn cancel_io(&mut self, token: IoToken) -> bool {
        self.pending_io.remove(&token)
    }

    /// A `Send` handle for delivering completions from other threads.
    pub fn remote(&self) -> RemoteHandle {
        RemoteHandle {
            tx: self.poll.sender(),
        }
    }

    pub(crate) fn complete_io(&mut self, token: IoToken) -> bool {
        self.pending_io.remove(&token)
    }

    // --- Worker pool ---

    /// Runs `job` on the worker pool and calls `callback` with its result
    /// during a poll phase.
    pub fn submit_work_with<T, J, C>(&mut self, job: J, callback: C) -> Result<WorkHandle, WorkerJobError>
    where
        T: Send + 'static,
        J: FnOnce() -> anyhow::Result<T> + Send + 'static,
        C: FnOnce(&mut LoopContext, Result<T, WorkerJobError>) -> CallbackResult + 'static,
    {
        let handle = self.pool.submit(move || {
            job()
                .map(|value| Box::new(value) as Box<dyn std::any::Any + Send>)
                .map_err(|e| WorkerJobError::Failed(format!("{:#}", e)))
        })?;

        let on_done: JobCallback = Box::new(move |ctx, outcome| {
            let result = outcome.and_then(|value| {
                value
                    .downcast::<T>()
                    .map(|value| *value)
                    .map_err(|_| WorkerJobError::ResultType)
            });
            callback(ctx, result)
        });
        self.pending_jobs.insert(handle.id(), on_done);
        log_scheduler!("worker_pool", "job_queued", job = handle.id().0);
        Ok(handle)
    }

    /// Runs `job` on the worker pool; the promise settles on the loop thread.
    pub fn submit_work<T, J>(&mut self, job: J) -> Promise<T>
    where
        T: Clone + Send + 'static,
        J: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        let settle = resolver.clone();
        let submitted = self.submit_work_with(job, move |ctx, result| {
            settle.settle(ctx, result.map_err(CallbackError::from));
            Ok(())
        });
        if let Err(e) = submitted {
            resolver.reject(self, CallbackError::from(e));
        }
        promise
    }

    /// Cancels a job that has not started. Its callback will never run.
    pub fn cancel_work(&mut self, handle: &WorkHandle) -> bool {
        if self.pool.cancel(handle) {
            self.pending_jobs.remove(&handle.id());
            true
        } else {
            false
        }
    }

    pub(crate) fn take_job_callback(&mut self, job: JobId) -> Option<JobCallback> {
        self.pending_jobs.remove(&job)
    }

    pub fn pool_metrics(&self) -> PoolMetrics {
        self.pool.metrics()
    }

    pub fn worker_statuses(&self) -> Vec<WorkerStatus> {
        self.pool.worker_statuses()
    }

    // --- Async units ---

    /// Starts an async unit. It runs synchronously up to its first
    /// suspension; the returned promise settles with its output.
    pub fn spawn_local<T, F>(&mut self, future: F) -> Promise<T>
    where
        T: Clone + 'static,
        F: Future<Output = Result<T, CallbackError>> + 'static,
    {
        let (promise, resolver) = Promise::pending();
        let slot = Rc::new(RefCell::new(None));
        let output = slot.clone();

        let wrapped = Box::pin(async move {
            let result = future.await;
            *output.borrow_mut() = Some(result);
        });
        let on_complete = Box::new(move |ctx: &mut LoopContext, panicked: Option<CallbackError>| {
            let result = match panicked {
                Some(error) => Some(Err(error)),
                None => slot.borrow_mut().take(),
            };
            if let Some(result) = result {
                resolver.settle(ctx, result);
            }
        });

        let id = self.local.insert(wrapped, on_complete);
        self.poll_local(id);
        promise
    }

    /// Polls a suspended async unit once.
    pub(crate) fn poll_local(&mut self, id: LocalTaskId) {
        // Stale wake for a unit that already finished.
        let Some(mut task) = self.local.take(id) else {
            return;
        };

        task.waker.reset();
        let waker = futures::task::waker(task.waker.clone());
        let mut cx = Context::from_waker(&waker);

        match panic::catch_unwind(AssertUnwindSafe(|| task.future.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => self.local.restore(id, task),
            Ok(Poll::Ready(())) => {
                if let Some(done) = task.on_complete.take() {
                    done(self, None);
                }
            }
            Err(payload) => {
                if let Some(done) = task.on_complete.take() {
                    done(self, Some(CallbackError::Panicked(panic_message(payload))));
                }
            }
        }
    }

    // --- Rejections ---

    pub(crate) fn track_rejection(&mut self, rejection: PendingRejection) {
        self.rejections.push(rejection);
    }

    /// Rejections that are still unobserved. Clears the record.
    pub(crate) fn take_unhandled_rejections(&mut self) -> Vec<PendingRejection> {
        std::mem::take(&mut self.rejections)
            .into_iter()
            .filter(|rejection| !rejection.is_handled())
            .collect()
    }

    // --- Loop state ---

    /// Whether anything can still produce a callback.
    pub fn is_alive(&self) -> bool {
        !self.microtasks.is_empty()
            || self.local.has_pending_wakes()
            || !self.timers.is_empty()
            || !self.immediates.is_empty()
            || self.poll.has_ready()
            || !self.pending_jobs.is_empty()
            || !self.pending_io.is_empty()
    }

    /// Whether a phase would find work without blocking.
    pub(crate) fn has_runnable_work(&mut self, now: Instant) -> bool {
        !self.microtasks.is_empty()
            || self.local.has_pending_wakes()
            || !self.immediates.is_empty()
            || self.poll.has_ready()
            || self.timers.next_deadline().map_or(false, |deadline| deadline <= now)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn pending_jobs(&self) -> usize {
        self.pending_jobs.len()
    }

    pub fn pending_io(&self) -> usize {
        self.pending_io.len()
    }

    /// Async units waiting to be resumed.
    pub fn suspended_units(&self) -> usize {
        self.local.suspended()
    }
}

/// Cloneable, `Send` handle through which other threads deliver I/O completions.
#[derive(Clone)]
pub struct RemoteHandle {
    tx: Sender<Completion>,
}

impl fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle").finish()
    }
}

impl RemoteHandle {
    /// Hands `work` to the loop; it runs in the next poll phase.
    pub fn submit_io<F>(&self, token: IoToken, work: F) -> Result<(), LoopError>
    where
        F: FnOnce(&mut LoopContext) -> CallbackResult + Send + 'static,
    {
        let work: SendCallback = Box::new(work);
        self.tx
            .send(Completion::Io { token, work })
            .map_err(|_| LoopError::Closed)
    }
}

impl Drop for LoopContext {
    fn drop(&mut self) {
        if !self.pending_io.is_empty() {
            warn!(pending = self.pending_io.len(), "dropping loop with outstanding io");
        }
        self.pool.shutdown();
    }
}
