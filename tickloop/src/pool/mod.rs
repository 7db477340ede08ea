//! # Worker Pool
//!
//! A fixed set of OS threads that run CPU-bound jobs in parallel with the loop
//! thread.
//!
//! ## Key Concepts
//! - Bounded concurrency: `pool_size` workers pull from one shared job channel,
//!   so at most `pool_size` jobs run at once and the rest wait in FIFO order
//! - Hand-off: a finished job is posted to the loop's poll queue as a
//!   [`Completion`]; workers never touch any other scheduler state
//! - Isolation: a failing or panicking job only produces an `Err` outcome for
//!   its own completion
//!
//! ## Cancellation
//! A job can be cancelled while it is still queued. Once a worker has claimed
//! it, cancellation is refused and the completion is delivered as usual.

mod worker;

pub use worker::WorkerStatus;

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use flume::Sender;
use tracing::warn;

use crate::error::{LoopError, WorkerJobError};
use crate::log_scheduler;
use crate::queue::poll::{Completion, JobOutcome};
use worker::Worker;

/// Identifier of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

/// Lifecycle of a worker job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued = 0,
    Running = 1,
    Done = 2,
    Failed = 3,
    Cancelled = 4,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobState::Queued,
            1 => JobState::Running,
            2 => JobState::Done,
            3 => JobState::Failed,
            _ => JobState::Cancelled,
        }
    }
}

/// Handle to a submitted job, used to observe or cancel it.
#[derive(Debug, Clone)]
pub struct WorkHandle {
    id: JobId,
    state: Arc<AtomicU8>,
}

impl WorkHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// A job waiting in the pool's channel.
pub(crate) struct Job {
    id: JobId,
    state: Arc<AtomicU8>,
    run: Box<dyn FnOnce() -> JobOutcome + Send + 'static>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("state", &JobState::from_u8(self.state.load(Ordering::Relaxed)))
            .finish()
    }
}

#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    queued: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
}

/// Snapshot of the pool's activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMetrics {
    pub pool_size: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Fixed-size pool of worker threads.
pub struct WorkerPool {
    pool_size: usize,
    job_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    statuses: Vec<Arc<AtomicUsize>>,
    counters: Arc<PoolCounters>,
    next_job: u64,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("pool_size", &self.pool_size)
            .field("open", &self.job_tx.is_some())
            .field("metrics", &self.metrics())
            .finish()
    }
}

impl WorkerPool {
    /// Starts `pool_size` worker threads that post results to `completions`.
    pub fn new(
        pool_size: usize,
        thread_prefix: &str,
        completions: Sender<Completion>,
    ) -> Result<Self, LoopError> {
        if pool_size == 0 {
            return Err(LoopError::Config("worker pool size must be at least 1".to_string()));
        }

        let (job_tx, job_rx) = flume::unbounded::<Job>();
        let counters = Arc::new(PoolCounters::default());
        let dispatch = crate::logging::current_subscriber();

        let mut pool = Self {
            pool_size,
            job_tx: Some(job_tx),
            workers: Vec::with_capacity(pool_size),
            statuses: Vec::with_capacity(pool_size),
            counters: counters.clone(),
            next_job: 0,
        };

        for worker_id in 0..pool_size {
            let worker = Worker::new(
                worker_id,
                job_rx.clone(),
                completions.clone(),
                counters.clone(),
                dispatch.clone(),
            );
            pool.statuses.push(worker.status());
            let handle = worker
                .spawn(format!("{}-{}", thread_prefix, worker_id))
                .map_err(|e| LoopError::ThreadSpawn(format!("worker {}: {}", worker_id, e)))?;
            pool.workers.push(handle);
        }

        log_scheduler!("worker_pool", "started", pool_size = pool_size);
        Ok(pool)
    }

    /// Queues a job. It starts as soon as a worker is free.
    pub fn submit<F>(&mut self, run: F) -> Result<WorkHandle, WorkerJobError>
    where
        F: FnOnce() -> JobOutcome + Send + 'static,
    {
        let tx = self.job_tx.as_ref().ok_or(WorkerJobError::PoolClosed)?;
        let id = JobId(self.next_job);
        self.next_job += 1;

        let state = Arc::new(AtomicU8::new(JobState::Queued as u8));
        let job = Job {
            id,
            state: state.clone(),
            run: Box::new(run),
        };

        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if tx.send(job).is_err() {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(WorkerJobError::PoolClosed);
        }

        Ok(WorkHandle { id, state })
    }

    /// Cancels a job that has not started yet.
    pub fn cancel(&self, handle: &WorkHandle) -> bool {
        let cancelled = handle
            .state
            .compare_exchange(
                JobState::Queued as u8,
                JobState::Cancelled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if cancelled {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            self.counters.cancelled.fetch_add(1, Ordering::SeqCst);
        }
        cancelled
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn worker_statuses(&self) -> Vec<WorkerStatus> {
        self.statuses
            .iter()
            .map(|status| WorkerStatus::from_usize(status.load(Ordering::Relaxed)))
            .collect()
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            pool_size: self.pool_size,
            queued: self.counters.queued.load(Ordering::SeqCst),
            running: self.counters.running.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            cancelled: self.counters.cancelled.load(Ordering::SeqCst),
        }
    }

    /// Closes the job channel and joins every worker. Queued jobs still run first.
    pub fn shutdown(&mut self) {
        if self.job_tx.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread exited abnormally");
            }
        }
        log_scheduler!("worker_pool", "stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
