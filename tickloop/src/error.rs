use thiserror::Error;

use crate::task::{TaskId, TaskKind};

/// Failure raised by a callback, a microtask, or an async unit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    #[error("Callback failed: {0}")]
    Failed(String),
    #[error("Callback panicked: {0}")]
    Panicked(String),
    #[error("Worker job error: {0}")]
    Worker(#[from] WorkerJobError),
}

impl CallbackError {
    /// Shorthand for a plain failure with a message.
    pub fn msg(message: impl Into<String>) -> Self {
        CallbackError::Failed(message.into())
    }
}

impl From<anyhow::Error> for CallbackError {
    fn from(err: anyhow::Error) -> Self {
        CallbackError::Failed(format!("{:#}", err))
    }
}

/// Failure of a background job, delivered only to that job's completion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerJobError {
    #[error("Job failed: {0}")]
    Failed(String),
    #[error("Job panicked: {0}")]
    Panicked(String),
    #[error("Worker pool is closed")]
    PoolClosed,
    #[error("Job produced a result of an unexpected type")]
    ResultType,
}

/// Errors that stop the loop itself.
#[derive(Error, Debug)]
pub enum LoopError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Thread setup error: {0}")]
    ThreadSpawn(String),
    #[error("Entry task failed: {0}")]
    EntryFailed(CallbackError),
    #[error("{kind} task {task} failed: {source}")]
    CallbackFailed {
        task: TaskId,
        kind: TaskKind,
        source: CallbackError,
    },
    #[error("{0} promise rejection(s) were never handled")]
    UnhandledRejections(usize),
    #[error("Event loop is closed")]
    Closed,
}

/// Reports passed to the diagnostic hook. None of them stop the loop on their own.
#[derive(Debug, Clone)]
pub enum Diagnostic {
    CallbackError {
        task: TaskId,
        kind: TaskKind,
        error: CallbackError,
    },
    UnhandledRejection {
        promise: u64,
        error: CallbackError,
    },
}
