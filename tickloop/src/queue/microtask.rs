use std::collections::VecDeque;

use crate::task::Task;

/// FIFO of microtasks.
///
/// The queue itself only stores tasks; exhaustive draining is done by the
/// driver, which pops one entry at a time and re-checks for emptiness after
/// each execution, so microtasks scheduled while draining join the same drain
/// without growing the call stack.
#[derive(Debug, Default)]
pub struct MicrotaskQueue {
    queue: VecDeque<Task>,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub fn push(&mut self, task: Task) {
        self.queue.push_back(task);
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
