// Shared helpers for the integration tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use tickloop::{CallbackResult, Diagnostic, EventLoop, EventLoopConfig, LoopContext, WorkerJobError};

/// Ordered record of callback invocations.
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    /// A callback that only records `entry`.
    pub fn record(&self, entry: &str) -> impl FnOnce(&mut LoopContext) -> CallbackResult + 'static {
        let log = self.clone();
        let entry = entry.to_string();
        move |_| {
            log.push(entry);
            Ok(())
        }
    }

    /// A job callback that records `entry` once the job succeeded.
    pub fn record_job<T: 'static>(
        &self,
        entry: &str,
    ) -> impl FnOnce(&mut LoopContext, Result<T, WorkerJobError>) -> CallbackResult + 'static {
        let log = self.clone();
        let entry = entry.to_string();
        move |_, result| {
            result?;
            log.push(entry);
            Ok(())
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn position(&self, entry: &str) -> usize {
        self.entries()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{} was never recorded", entry))
    }
}

/// Diagnostics captured through the loop's hook.
#[derive(Clone, Default)]
pub struct Diagnostics(Rc<RefCell<Vec<Diagnostic>>>);

impl Diagnostics {
    pub fn install(&self, event_loop: &mut EventLoop) {
        let sink = self.0.clone();
        event_loop.set_diagnostic_hook(move |d| sink.borrow_mut().push(d.clone()));
    }

    pub fn all(&self) -> Vec<Diagnostic> {
        self.0.borrow().clone()
    }
}

pub fn new_loop(pool_size: usize) -> EventLoop {
    tickloop::logging::init_test();
    EventLoop::new(EventLoopConfig::default().with_worker_pool_size(pool_size))
        .expect("failed to create event loop")
}

pub fn strings(entries: &[&str]) -> Vec<String> {
    entries.iter().map(|e| e.to_string()).collect()
}
