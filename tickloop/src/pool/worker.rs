use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};
use tracing::{debug, trace};

use super::{Job, JobState, PoolCounters};
use crate::error::WorkerJobError;
use crate::queue::poll::Completion;
use crate::task::panic_message;

/// Status codes for worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Worker is idle, waiting for a job
    Idle = 0,

    /// Worker is running a job
    Processing = 1,

    /// Worker left its loop because the job channel closed
    ShuttingDown = 2,
}

impl WorkerStatus {
    pub(crate) fn from_usize(value: usize) -> Self {
        match value {
            0 => WorkerStatus::Idle,
            1 => WorkerStatus::Processing,
            _ => WorkerStatus::ShuttingDown,
        }
    }
}

/// # Worker Thread
///
/// One thread of the pool. It pulls jobs from the shared channel, runs them
/// with panic recovery, and posts each outcome to the loop's poll queue.
///
/// ## Core Algorithm
/// 1. Block on the job channel
/// 2. Claim the job (`Queued -> Running`); skip it if it was cancelled
/// 3. Run it, catching panics
/// 4. Post the completion and go back to 1
///
/// The loop ends when the pool drops its sender or the loop thread has gone
/// away and completions can no longer be delivered.
pub(crate) struct Worker {
    id: usize,
    jobs: Receiver<Job>,
    completions: Sender<Completion>,
    status: Arc<AtomicUsize>,
    counters: Arc<PoolCounters>,
    dispatch: tracing::Dispatch,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("status", &WorkerStatus::from_usize(self.status.load(Ordering::Relaxed)))
            .finish()
    }
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        jobs: Receiver<Job>,
        completions: Sender<Completion>,
        counters: Arc<PoolCounters>,
        dispatch: tracing::Dispatch,
    ) -> Self {
        Self {
            id,
            jobs,
            completions,
            status: Arc::new(AtomicUsize::new(WorkerStatus::Idle as usize)),
            counters,
            dispatch,
        }
    }

    pub(crate) fn status(&self) -> Arc<AtomicUsize> {
        self.status.clone()
    }

    pub(crate) fn spawn(self, name: String) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(move || {
            let _guard = tracing::dispatcher::set_default(&self.dispatch);
            self.run_loop();
        })
    }

    fn run_loop(&self) {
        debug!(worker = self.id, "worker started");

        while let Ok(job) = self.jobs.recv() {
            let claimed = job
                .state
                .compare_exchange(
                    JobState::Queued as u8,
                    JobState::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok();
            if !claimed {
                trace!(worker = self.id, job = job.id.0, "skipping cancelled job");
                continue;
            }

            self.status.store(WorkerStatus::Processing as usize, Ordering::Relaxed);
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            self.counters.running.fetch_add(1, Ordering::SeqCst);

            let outcome = match panic::catch_unwind(AssertUnwindSafe(job.run)) {
                Ok(outcome) => outcome,
                Err(payload) => Err(WorkerJobError::Panicked(panic_message(payload))),
            };

            let final_state = if outcome.is_ok() {
                self.counters.completed.fetch_add(1, Ordering::SeqCst);
                JobState::Done
            } else {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                JobState::Failed
            };
            job.state.store(final_state as u8, Ordering::Release);
            self.counters.running.fetch_sub(1, Ordering::SeqCst);
            self.status.store(WorkerStatus::Idle as usize, Ordering::Relaxed);

            trace!(worker = self.id, job = job.id.0, state = ?final_state, "job finished");

            if self
                .completions
                .send(Completion::Job {
                    job: job.id,
                    outcome,
                })
                .is_err()
            {
                debug!(worker = self.id, "poll queue closed, stopping");
                break;
            }
        }

        self.status.store(WorkerStatus::ShuttingDown as usize, Ordering::Relaxed);
        debug!(worker = self.id, "worker stopped");
    }
}
