//! Executor for `async` units running on the loop thread.
//!
//! A spawned future is polled immediately, so it runs synchronously up to its
//! first suspension point. Its waker posts the task id to a wake channel;
//! the context turns every received id into a resume microtask, which keeps
//! continuations ordered with the rest of the microtask queue.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flume::{Receiver, Sender};
use futures::task::ArcWake;

use crate::context::LoopContext;
use crate::error::CallbackError;

/// Identifier of a spawned async unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalTaskId(pub(crate) u64);

/// Called once the future finishes; `Some` carries the panic that aborted it.
pub(crate) type Completer = Box<dyn FnOnce(&mut LoopContext, Option<CallbackError>)>;

pub(crate) struct LocalTask {
    pub(crate) future: Pin<Box<dyn Future<Output = ()>>>,
    pub(crate) waker: Arc<TaskWaker>,
    pub(crate) on_complete: Option<Completer>,
}

pub(crate) struct TaskWaker {
    id: LocalTaskId,
    woken: AtomicBool,
    tx: Sender<LocalTaskId>,
}

impl TaskWaker {
    /// Re-arms the waker before a poll.
    pub(crate) fn reset(&self) {
        self.woken.store(false, Ordering::SeqCst);
    }
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if !arc_self.woken.swap(true, Ordering::SeqCst) {
            // Loop already gone: nothing left to resume.
            let _ = arc_self.tx.send(arc_self.id);
        }
    }
}

/// Suspended async units plus the channel their wakers post to.
pub(crate) struct LocalExecutor {
    tasks: HashMap<LocalTaskId, LocalTask>,
    wake_tx: Sender<LocalTaskId>,
    wake_rx: Receiver<LocalTaskId>,
    next_id: u64,
}

impl fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("suspended", &self.tasks.len())
            .field("pending_wakes", &self.wake_rx.len())
            .finish()
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        let (wake_tx, wake_rx) = flume::unbounded();
        Self {
            tasks: HashMap::new(),
            wake_tx,
            wake_rx,
            next_id: 0,
        }
    }
}

impl LocalExecutor {
    pub(crate) fn insert(
        &mut self,
        future: Pin<Box<dyn Future<Output = ()>>>,
        on_complete: Completer,
    ) -> LocalTaskId {
        let id = LocalTaskId(self.next_id);
        self.next_id += 1;
        let waker = Arc::new(TaskWaker {
            id,
            woken: AtomicBool::new(false),
            tx: self.wake_tx.clone(),
        });
        self.tasks.insert(
            id,
            LocalTask {
                future,
                waker,
                on_complete: Some(on_complete),
            },
        );
        id
    }

    /// Takes a task out for polling; it is put back with [`LocalExecutor::restore`] if still pending.
    pub(crate) fn take(&mut self, id: LocalTaskId) -> Option<LocalTask> {
        self.tasks.remove(&id)
    }

    pub(crate) fn restore(&mut self, id: LocalTaskId, task: LocalTask) {
        self.tasks.insert(id, task);
    }

    pub(crate) fn wake_receiver(&self) -> &Receiver<LocalTaskId> {
        &self.wake_rx
    }

    pub(crate) fn try_next_wake(&self) -> Option<LocalTaskId> {
        self.wake_rx.try_recv().ok()
    }

    pub(crate) fn has_pending_wakes(&self) -> bool {
        !self.wake_rx.is_empty()
    }

    /// Number of async units currently suspended.
    pub(crate) fn suspended(&self) -> usize {
        self.tasks.len()
    }
}
