use std::collections::VecDeque;

use crate::task::Task;

/// FIFO of check-phase callbacks.
///
/// The check phase runs [`ImmediateQueue::take_batch`]: everything queued up to
/// that point, including entries added during the poll phase of the same
/// iteration. Entries queued while the batch runs wait for the next check phase.
#[derive(Debug, Default)]
pub struct ImmediateQueue {
    queue: VecDeque<Task>,
}

impl ImmediateQueue {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub fn push(&mut self, task: Task) {
        self.queue.push_back(task);
    }

    /// Removes and returns the current contents in FIFO order.
    pub fn take_batch(&mut self) -> VecDeque<Task> {
        std::mem::take(&mut self.queue)
    }

    /// Puts the unprocessed rest of a batch back ahead of newer entries.
    pub fn restore_front(&mut self, mut rest: VecDeque<Task>) {
        rest.append(&mut self.queue);
        self.queue = rest;
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskId, TaskKind};

    fn task(id: u64) -> Task {
        Task::new(TaskId(id), TaskKind::Immediate, Box::new(|_| Ok(())))
    }

    #[test]
    fn test_take_batch_snapshots_contents() {
        let mut queue = ImmediateQueue::new();
        queue.push(task(1));
        queue.push(task(2));

        let batch = queue.take_batch();
        queue.push(task(3));

        let ids: Vec<_> = batch.iter().map(|t| t.id().0).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_restore_front_keeps_batch_ahead_of_new_entries() {
        let mut queue = ImmediateQueue::new();
        queue.push(task(1));
        queue.push(task(2));

        let mut batch = queue.take_batch();
        batch.pop_front();
        queue.push(task(3));
        queue.restore_front(batch);

        let ids: Vec<_> = queue.take_batch().iter().map(|t| t.id().0).collect();
        assert_eq!(ids, vec![2, 3]);
    }
}
