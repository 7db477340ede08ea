// Error isolation, error policies and error type formatting.

mod common;

use std::error::Error;
use std::time::Duration;

use anyhow::anyhow;
use common::{new_loop, strings, Diagnostics, Log};
use tickloop::{
    CallbackError, Diagnostic, ErrorPolicy, EventLoop, EventLoopConfig, LoopError, TaskId, TaskKind,
    WorkerJobError,
};

fn loop_with(config: EventLoopConfig) -> EventLoop {
    tickloop::logging::init_test();
    EventLoop::new(config).expect("failed to create event loop")
}

#[test]
fn test_failing_timer_does_not_stop_later_callbacks() {
    let log = Log::default();
    let diagnostics = Diagnostics::default();
    let mut event_loop = new_loop(1);
    diagnostics.install(&mut event_loop);

    let l = log.clone();
    let report = event_loop
        .run(move |ctx| {
            ctx.set_timeout(Duration::ZERO, |_| Err(CallbackError::msg("timer broke")));
            ctx.set_timeout(Duration::ZERO, l.record("second timer"));
            ctx.set_immediate(l.record("immediate"));
            Ok(())
        })
        .expect("loop failed");

    assert_eq!(log.entries(), strings(&["second timer", "immediate"]));
    assert_eq!(report.callback_errors, 1);

    let all = diagnostics.all();
    assert_eq!(all.len(), 1);
    match &all[0] {
        Diagnostic::CallbackError { kind, error, .. } => {
            assert_eq!(*kind, TaskKind::Timer);
            assert_eq!(error, &CallbackError::msg("timer broke"));
        }
        other => panic!("unexpected diagnostic: {:?}", other),
    }
}

#[test]
fn test_panicking_immediate_is_isolated() {
    let log = Log::default();
    let diagnostics = Diagnostics::default();
    let mut event_loop = new_loop(1);
    diagnostics.install(&mut event_loop);

    let l = log.clone();
    event_loop
        .run(move |ctx| {
            ctx.set_immediate(|_| panic!("immediate exploded"));
            ctx.set_immediate(l.record("survivor"));
            Ok(())
        })
        .expect("loop failed");

    assert_eq!(log.entries(), strings(&["survivor"]));
    match &diagnostics.all()[..] {
        [Diagnostic::CallbackError { kind, error, .. }] => {
            assert_eq!(*kind, TaskKind::Immediate);
            assert_eq!(error, &CallbackError::Panicked("immediate exploded".to_string()));
        }
        other => panic!("unexpected diagnostics: {:?}", other),
    }
}

#[test]
fn test_failing_microtask_still_drains_the_queue() {
    let log = Log::default();
    let diagnostics = Diagnostics::default();
    let mut event_loop = new_loop(1);
    diagnostics.install(&mut event_loop);

    let l = log.clone();
    event_loop
        .run(move |ctx| {
            ctx.queue_microtask(|_| Err(anyhow!("microtask broke").into()));
            ctx.queue_microtask(l.record("next microtask"));
            Ok(())
        })
        .expect("loop failed");

    assert_eq!(log.entries(), strings(&["next microtask"]));
    match &diagnostics.all()[..] {
        [Diagnostic::CallbackError { kind, .. }] => assert_eq!(*kind, TaskKind::Microtask),
        other => panic!("unexpected diagnostics: {:?}", other),
    }
}

#[test]
fn test_entry_failure_is_fatal_by_default() {
    let log = Log::default();
    let mut event_loop = new_loop(1);
    event_loop.set_diagnostic_hook(|_| {});

    let l = log.clone();
    let result = event_loop.run(move |ctx| {
        ctx.set_timeout(Duration::ZERO, l.record("never"));
        Err(CallbackError::msg("bad start"))
    });

    match result {
        Err(LoopError::EntryFailed(error)) => assert_eq!(error, CallbackError::msg("bad start")),
        other => panic!("expected entry failure, got {:?}", other),
    }
    assert!(log.entries().is_empty());
}

#[test]
fn test_entry_failure_can_be_reported_only() {
    let log = Log::default();
    let mut event_loop = loop_with(EventLoopConfig {
        worker_pool_size: 1,
        entry_error_policy: ErrorPolicy::Report,
        ..Default::default()
    });
    event_loop.set_diagnostic_hook(|_| {});

    let l = log.clone();
    let report = event_loop
        .run(move |ctx| {
            ctx.set_timeout(Duration::ZERO, l.record("still runs"));
            Err(CallbackError::msg("bad start"))
        })
        .expect("loop failed");

    assert_eq!(log.entries(), strings(&["still runs"]));
    assert_eq!(report.callback_errors, 1);
}

#[test]
fn test_fatal_callback_policy_stops_the_loop() {
    let log = Log::default();
    let mut event_loop = loop_with(EventLoopConfig {
        worker_pool_size: 1,
        callback_error_policy: ErrorPolicy::Fatal,
        ..Default::default()
    });
    event_loop.set_diagnostic_hook(|_| {});

    let l = log.clone();
    let result = event_loop.run(move |ctx| {
        ctx.set_immediate(|_| Err(CallbackError::msg("stop here")));
        ctx.set_timeout(Duration::from_millis(20), l.record("too late"));
        Ok(())
    });

    match result {
        Err(LoopError::CallbackFailed { kind, source, .. }) => {
            assert_eq!(kind, TaskKind::Immediate);
            assert_eq!(source, CallbackError::msg("stop here"));
        }
        other => panic!("expected callback failure, got {:?}", other),
    }
    assert!(log.entries().is_empty());
}

#[test]
fn test_fatal_io_failure_keeps_rest_of_poll_batch() {
    let mut event_loop = loop_with(EventLoopConfig {
        worker_pool_size: 1,
        callback_error_policy: ErrorPolicy::Fatal,
        ..Default::default()
    });
    event_loop.set_diagnostic_hook(|_| {});
    let (tx, rx) = flume::unbounded::<&'static str>();

    let result = event_loop.run(move |ctx| {
        let remote = ctx.remote();
        let failing = ctx.begin_io();
        let following = ctx.begin_io();
        let closed = |e: LoopError| CallbackError::msg(e.to_string());
        remote
            .submit_io(failing, |_| Err(CallbackError::msg("read failed")))
            .map_err(closed)?;
        remote
            .submit_io(following, move |_| {
                tx.send("second io").map_err(|e| CallbackError::msg(e.to_string()))
            })
            .map_err(closed)?;
        Ok(())
    });

    match result {
        Err(LoopError::CallbackFailed { kind, .. }) => assert_eq!(kind, TaskKind::Io),
        other => panic!("expected io failure, got {:?}", other),
    }
    assert!(rx.try_recv().is_err());
    assert_eq!(event_loop.context().pending_io(), 1);

    let report = event_loop.run_until_idle().expect("loop failed");
    assert_eq!(report.callbacks_run, 1);
    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["second io"]);
    assert_eq!(event_loop.context().pending_io(), 0);
}

#[test]
fn test_fatal_immediate_failure_keeps_rest_of_check_batch() {
    let log = Log::default();
    let mut event_loop = loop_with(EventLoopConfig {
        worker_pool_size: 1,
        callback_error_policy: ErrorPolicy::Fatal,
        ..Default::default()
    });
    event_loop.set_diagnostic_hook(|_| {});

    let l = log.clone();
    let result = event_loop.run(move |ctx| {
        ctx.set_immediate(|_| Err(CallbackError::msg("stop here")));
        ctx.set_immediate(l.record("second immediate"));
        ctx.set_immediate(l.record("third immediate"));
        Ok(())
    });

    assert!(matches!(result, Err(LoopError::CallbackFailed { .. })));
    assert!(log.entries().is_empty());

    event_loop.run_until_idle().expect("loop failed");
    assert_eq!(log.entries(), strings(&["second immediate", "third immediate"]));
}

#[test]
fn test_callback_error_display() {
    assert_eq!(CallbackError::msg("x").to_string(), "Callback failed: x");
    assert_eq!(CallbackError::Panicked("p".to_string()).to_string(), "Callback panicked: p");
    assert_eq!(
        CallbackError::from(WorkerJobError::PoolClosed).to_string(),
        "Worker job error: Worker pool is closed"
    );

    let chained = anyhow!("root cause").context("reading config");
    assert_eq!(
        CallbackError::from(chained).to_string(),
        "Callback failed: reading config: root cause"
    );
}

#[test]
fn test_worker_job_error_display() {
    assert_eq!(WorkerJobError::Failed("f".to_string()).to_string(), "Job failed: f");
    assert_eq!(WorkerJobError::Panicked("p".to_string()).to_string(), "Job panicked: p");
    assert_eq!(WorkerJobError::PoolClosed.to_string(), "Worker pool is closed");
    assert_eq!(
        WorkerJobError::ResultType.to_string(),
        "Job produced a result of an unexpected type"
    );
}

#[test]
fn test_loop_error_display() {
    assert_eq!(LoopError::Config("bad".to_string()).to_string(), "Configuration error: bad");
    assert_eq!(LoopError::ThreadSpawn("t".to_string()).to_string(), "Thread setup error: t");
    assert_eq!(
        LoopError::EntryFailed(CallbackError::msg("e")).to_string(),
        "Entry task failed: Callback failed: e"
    );
    let failed = LoopError::CallbackFailed {
        task: TaskId(3),
        kind: TaskKind::Timer,
        source: CallbackError::msg("t"),
    };
    assert_eq!(failed.to_string(), "timer task #3 failed: Callback failed: t");
    assert!(failed.source().is_some());
    assert_eq!(
        LoopError::UnhandledRejections(2).to_string(),
        "2 promise rejection(s) were never handled"
    );
    assert_eq!(LoopError::Closed.to_string(), "Event loop is closed");
}
