use std::any::Any;
use std::collections::VecDeque;
use std::fmt;

use flume::{Receiver, Sender};

use crate::error::WorkerJobError;
use crate::pool::JobId;
use crate::task::SendCallback;

/// Token identifying one outstanding external I/O operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoToken(pub(crate) u64);

impl IoToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Type-erased result of a worker job.
pub type JobOutcome = Result<Box<dyn Any + Send>, WorkerJobError>;

/// An entry handed to the loop thread from elsewhere.
pub enum Completion {
    /// A worker job finished (successfully or not).
    Job { job: JobId, outcome: JobOutcome },
    /// An external I/O operation finished; `work` runs in the poll phase.
    Io { token: IoToken, work: SendCallback },
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Job { job, outcome } => f
                .debug_struct("Job")
                .field("job", job)
                .field("ok", &outcome.is_ok())
                .finish(),
            Completion::Io { token, .. } => f.debug_struct("Io").field("token", token).finish(),
        }
    }
}

/// FIFO of completions in arrival order.
///
/// The channel is the only structure shared with other threads; the `ready`
/// buffer holds completions already received on the loop thread (for example
/// the one that woke a blocking wait).
#[derive(Debug)]
pub struct PollQueue {
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    ready: VecDeque<Completion>,
}

impl Default for PollQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PollQueue {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            ready: VecDeque::new(),
        }
    }

    /// Sender for producers on other threads.
    pub fn sender(&self) -> Sender<Completion> {
        self.tx.clone()
    }

    pub(crate) fn receiver(&self) -> &Receiver<Completion> {
        &self.rx
    }

    /// Buffers a completion received outside of [`PollQueue::take_batch`].
    pub(crate) fn push_ready(&mut self, completion: Completion) {
        self.ready.push_back(completion);
    }

    /// Removes everything that has arrived so far. Later arrivals wait for the next poll phase.
    pub fn take_batch(&mut self) -> VecDeque<Completion> {
        self.ready.extend(self.rx.try_iter());
        std::mem::take(&mut self.ready)
    }

    /// Puts the unprocessed rest of a batch back ahead of anything buffered since.
    pub(crate) fn restore_front(&mut self, mut rest: VecDeque<Completion>) {
        rest.append(&mut self.ready);
        self.ready = rest;
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty() || !self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_completions_cross_threads_in_arrival_order() {
        let mut poll = PollQueue::new();
        let tx = poll.sender();

        thread::spawn(move || {
            for id in 0..3 {
                tx.send(Completion::Job {
                    job: JobId(id),
                    outcome: Ok(Box::new(id)),
                })
                .unwrap();
            }
        })
        .join()
        .unwrap();

        assert!(poll.has_ready());
        let jobs: Vec<u64> = poll
            .take_batch()
            .into_iter()
            .map(|c| match c {
                Completion::Job { job, .. } => job.0,
                Completion::Io { .. } => unreachable!(),
            })
            .collect();
        assert_eq!(jobs, vec![0, 1, 2]);
        assert!(!poll.has_ready());
    }

    #[test]
    fn test_restored_batch_precedes_later_arrivals() {
        let mut queue = PollQueue::new();
        for id in 1..=3 {
            queue.sender().send(Completion::Job { job: JobId(id), outcome: Ok(Box::new(())) }).unwrap();
        }

        let mut batch = queue.take_batch();
        batch.pop_front();
        queue.sender().send(Completion::Job { job: JobId(4), outcome: Ok(Box::new(())) }).unwrap();
        queue.restore_front(batch);

        let order: Vec<u64> = queue
            .take_batch()
            .into_iter()
            .map(|c| match c {
                Completion::Job { job, .. } => job.0,
                Completion::Io { .. } => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![2, 3, 4]);
    }
}
