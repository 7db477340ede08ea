use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::time::Instant;

use crate::task::Task;

/// Handle returned by `set_timeout`, used to cancel the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    sequence: u64,
}

impl TimerHandle {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// A pending single-shot timer.
pub struct TimerEntry {
    pub deadline: Instant,
    /// Insertion order, breaks ties between equal deadlines.
    pub sequence: u64,
    pub task: Task,
}

impl TimerEntry {
    fn key(&self) -> (Instant, u64) {
        (self.deadline, self.sequence)
    }
}

// Reversed so that BinaryHeap yields the smallest (deadline, sequence) first.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for TimerEntry {}

impl fmt::Debug for TimerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerEntry")
            .field("deadline", &self.deadline)
            .field("sequence", &self.sequence)
            .field("task", &self.task)
            .finish()
    }
}

/// Min-heap of pending timers keyed by `(deadline, sequence)`.
///
/// `live` holds the sequence of every timer that may still fire. Cancelling
/// only removes the sequence from it; the heap entry is discarded when it
/// reaches the top.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    live: HashSet<u64>,
    next_sequence: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a timer due at `deadline`.
    pub fn insert(&mut self, deadline: Instant, task: Task) -> TimerHandle {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.live.insert(sequence);
        self.heap.push(TimerEntry {
            deadline,
            sequence,
            task,
        });
        TimerHandle { sequence }
    }

    /// Cancels a pending timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.live.remove(&handle.sequence)
    }

    /// The sequence number the next inserted timer will receive.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Pops the earliest timer if it is due at `now` and was inserted before `sequence_limit`.
    pub fn pop_due(&mut self, now: Instant, sequence_limit: u64) -> Option<TimerEntry> {
        self.discard_cancelled();
        let due = self
            .heap
            .peek()
            .map(|entry| entry.deadline <= now && entry.sequence < sequence_limit)
            .unwrap_or(false);
        if !due {
            return None;
        }
        let entry = self.heap.pop()?;
        self.live.remove(&entry.sequence);
        Some(entry)
    }

    /// Pops every timer due at `now`, in ascending `(deadline, sequence)` order.
    pub fn pop_ready(&mut self, now: Instant) -> Vec<TimerEntry> {
        let mut ready = Vec::new();
        while let Some(entry) = self.pop_due(now, u64::MAX) {
            ready.push(entry);
        }
        ready
    }

    /// Deadline of the earliest live timer.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.discard_cancelled();
        self.heap.peek().map(|entry| entry.deadline)
    }

    /// Number of live (not cancelled) timers.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn discard_cancelled(&mut self) {
        while let Some(entry) = self.heap.peek() {
            if self.live.contains(&entry.sequence) {
                break;
            }
            self.heap.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskId, TaskKind};
    use std::time::Duration;

    fn task(id: u64) -> Task {
        Task::new(TaskId(id), TaskKind::Timer, Box::new(|_| Ok(())))
    }

    fn ids(entries: &[TimerEntry]) -> Vec<u64> {
        entries.iter().map(|e| e.task.id().0).collect()
    }

    #[test]
    fn test_pop_ready_orders_by_deadline_then_sequence() {
        let base = Instant::now();
        let mut timers = TimerQueue::new();
        timers.insert(base + Duration::from_millis(20), task(1));
        timers.insert(base + Duration::from_millis(10), task(2));
        timers.insert(base + Duration::from_millis(10), task(3));
        timers.insert(base, task(4));

        let ready = timers.pop_ready(base + Duration::from_millis(15));
        assert_eq!(ids(&ready), vec![4, 2, 3]);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_deadline(), Some(base + Duration::from_millis(20)));
    }

    #[test]
    fn test_future_timers_are_not_ready() {
        let base = Instant::now();
        let mut timers = TimerQueue::new();
        timers.insert(base + Duration::from_secs(60), task(1));
        assert!(timers.pop_ready(base).is_empty());
        assert!(!timers.is_empty());
    }

    #[test]
    fn test_cancelled_timer_never_pops() {
        let base = Instant::now();
        let mut timers = TimerQueue::new();
        let first = timers.insert(base, task(1));
        timers.insert(base, task(2));

        assert!(timers.cancel(first));
        assert!(!timers.cancel(first));
        assert_eq!(timers.len(), 1);

        let ready = timers.pop_ready(base);
        assert_eq!(ids(&ready), vec![2]);
        assert!(timers.is_empty());
        assert!(!timers.cancel(first));
    }

    #[test]
    fn test_sequence_limit_holds_back_new_timers() {
        let base = Instant::now();
        let mut timers = TimerQueue::new();
        timers.insert(base, task(1));
        let limit = timers.next_sequence();
        timers.insert(base, task(2));

        assert_eq!(timers.pop_due(base, limit).map(|e| e.task.id().0), Some(1));
        assert!(timers.pop_due(base, limit).is_none());
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_cancel_tracks_only_live_timers() {
        let base = Instant::now();
        let mut timers = TimerQueue::new();
        let handles: Vec<_> = (0..1_000).map(|i| timers.insert(base, task(i))).collect();

        for handle in handles.iter().step_by(2) {
            assert!(timers.cancel(*handle));
        }
        assert_eq!(timers.len(), 500);

        let fired = timers.pop_due(base, u64::MAX).map(|e| e.sequence);
        assert_eq!(fired, Some(1));
        assert!(!timers.cancel(handles[1]));
        assert!(timers.cancel(handles[3]));
        assert_eq!(timers.len(), 498);
        assert_eq!(timers.pop_due(base, u64::MAX).map(|e| e.sequence), Some(5));
    }
}
