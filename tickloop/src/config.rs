use crate::error::LoopError;

pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;
pub const DEFAULT_WORKER_THREAD_PREFIX: &str = "tickloop-worker";

/// What the loop does when a failure is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Pass the failure to the diagnostic hook and keep going.
    Report,
    /// Report it, then stop the loop and return an error from `run`.
    Fatal,
}

/// Configuration for an `EventLoop`.
#[derive(Clone, Debug)]
pub struct EventLoopConfig {
    /// Number of threads in the worker pool.
    pub worker_pool_size: usize,

    /// Name prefix for worker threads; the worker index is appended.
    pub worker_thread_prefix: String,

    /// Applied when the synchronous entry task fails.
    pub entry_error_policy: ErrorPolicy,

    /// Applied when any queued callback or microtask fails.
    pub callback_error_policy: ErrorPolicy,

    /// Applied to rejections still unhandled when the loop runs out of work.
    pub unhandled_rejection_policy: ErrorPolicy,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            worker_thread_prefix: DEFAULT_WORKER_THREAD_PREFIX.to_string(),
            entry_error_policy: ErrorPolicy::Fatal,
            callback_error_policy: ErrorPolicy::Report,
            unhandled_rejection_policy: ErrorPolicy::Report,
        }
    }
}

impl EventLoopConfig {
    /// Default configuration with one worker per logical CPU.
    pub fn sized_to_host() -> Self {
        Self {
            worker_pool_size: num_cpus::get().max(1),
            ..Default::default()
        }
    }

    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), LoopError> {
        if self.worker_pool_size == 0 {
            return Err(LoopError::Config("worker_pool_size must be at least 1".to_string()));
        }
        if self.worker_thread_prefix.trim().is_empty() {
            return Err(LoopError::Config("worker_thread_prefix must not be empty".to_string()));
        }
        Ok(())
    }
}
