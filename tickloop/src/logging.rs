//! Subscriber setup for programs embedding the loop.
//!
//! The loop only emits `tracing` events. A program picks a [`LogConfig`],
//! usually one of the named presets, and installs it once:
//!
//! ```rust,no_run
//! use tickloop::logging::{self, LogConfig};
//!
//! // `TICKLOOP_LOG=debug` or `TICKLOOP_LOG=json` switch presets
//! logging::init(LogConfig::from_env());
//! ```
//!
//! Worker threads install the dispatcher that was current when the pool was
//! created (see [`current_subscriber`]), so their events reach the same
//! subscriber as the loop thread's.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Mutex, Once};

use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable naming the preset used by [`LogConfig::from_env`].
pub const PRESET_ENV: &str = "TICKLOOP_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Level applied to every target without its own directive
    pub level: Level,
    /// Emit one JSON object per event
    pub json_format: bool,
    /// Record the source location of each event
    pub show_file_line: bool,
    /// Include thread names and ids (worker threads are named)
    pub show_thread_info: bool,
    /// Extra `EnvFilter` directives, comma separated (`"tickloop::pool=trace,flume=warn"`)
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            target_filters: None,
        }
    }
}

impl LogConfig {
    /// DEBUG everywhere, TRACE for the loop's phases.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            target_filters: Some("tickloop::driver=trace".to_string()),
            ..Default::default()
        }
    }

    /// JSON lines at INFO without source locations.
    pub fn production() -> Self {
        Self {
            json_format: true,
            show_file_line: false,
            ..Default::default()
        }
    }

    /// WARN for dependencies, TRACE for tickloop itself.
    pub fn test() -> Self {
        Self {
            level: Level::WARN,
            target_filters: Some("tickloop=trace".to_string()),
            ..Default::default()
        }
    }

    /// Looks up a preset by name: `default`, `debug`/`development`, `json`/`production` or `test`.
    pub fn preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "default" | "info" => Some(Self::default()),
            "debug" | "development" => Some(Self::development()),
            "json" | "production" => Some(Self::production()),
            "test" => Some(Self::test()),
            _ => None,
        }
    }

    /// The preset named by `TICKLOOP_LOG`, or the default one.
    pub fn from_env() -> Self {
        match std::env::var(PRESET_ENV) {
            Ok(name) => Self::preset(&name).unwrap_or_else(|| {
                eprintln!("tickloop: unknown {} preset {:?}, using default", PRESET_ENV, name);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::from_default_env().add_directive(self.level.into());
        for directive in self.target_filters.iter().flat_map(|f| f.split(',')) {
            match directive.trim().parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(err) => eprintln!("tickloop: ignoring log directive {:?}: {}", directive, err),
            }
        }
        filter
    }
}

static INIT: Once = Once::new();

/// Installs the global subscriber. Only the first `init*` call in a process has an effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(config.env_filter());
        if config.json_format {
            set_global(registry.with(fmt::layer().json().flatten_event(true)));
        } else {
            set_global(registry.with(console_layer(&config)));
        }
    });
}

/// Like [`init`], and additionally appends plain-text events to `path`.
///
/// The file is opened before anything is installed, so an unusable path
/// leaves logging uninitialized and a later `init*` call can still succeed.
pub fn init_with_file(config: LogConfig, path: impl AsRef<Path>) -> io::Result<()> {
    let file = file_writer(path.as_ref())?;

    INIT.call_once(move || {
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .with_thread_names(true);
        let registry = tracing_subscriber::registry()
            .with(config.env_filter())
            .with(file_layer);
        if config.json_format {
            set_global(registry.with(fmt::layer().json().flatten_event(true)));
        } else {
            set_global(registry.with(console_layer(&config)));
        }
    });
    Ok(())
}

/// Opens `path` for appending, creating it if needed.
pub fn file_writer(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

pub fn init_default() {
    init(LogConfig::default());
}

/// Installs [`LogConfig::test`]. Safe to call from every test.
pub fn init_test() {
    init(LogConfig::test());
}

fn console_layer<S>(config: &LogConfig) -> impl tracing_subscriber::Layer<S>
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_ansi(atty::is(atty::Stream::Stdout))
        .with_file(config.show_file_line)
        .with_line_number(config.show_file_line)
        .with_thread_names(config.show_thread_info)
        .with_thread_ids(config.show_thread_info)
}

fn set_global<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("tickloop: a global tracing subscriber is already set: {}", err);
    }
}

/// Span covering one `EventLoop::run`, keyed by the loop's id.
#[macro_export]
macro_rules! loop_span {
    ($loop_id:expr) => {
        tracing::debug_span!("event_loop", id = %$loop_id)
    };
    ($loop_id:expr, $($fields:tt)*) => {
        tracing::debug_span!("event_loop", id = %$loop_id, $($fields)*)
    };
}

/// Log a phase that found work
///
/// ```rust
/// use tickloop::log_phase;
///
/// log_phase!("check", 3);
/// ```
#[macro_export]
macro_rules! log_phase {
    ($phase:expr, $count:expr) => {
        tracing::trace!(phase = $phase, callbacks = $count);
    };
    ($phase:expr, $count:expr, $($fields:tt)*) => {
        tracing::trace!(phase = $phase, callbacks = $count, $($fields)*);
    };
}

/// Log scheduling events
///
/// ```rust
/// use tickloop::log_scheduler;
///
/// log_scheduler!("worker_pool", "job_queued", job = 4);
/// ```
#[macro_export]
macro_rules! log_scheduler {
    ($component:expr, $event:expr) => {
        tracing::debug!(component = $component, event = $event);
    };
    ($component:expr, $event:expr, $($fields:tt)*) => {
        tracing::debug!(component = $component, event = $event, $($fields)*);
    };
}

/// Log error events
///
/// ```rust
/// use tickloop::log_error;
///
/// let error = std::io::Error::new(std::io::ErrorKind::NotFound, "sample.txt");
/// log_error!(error, operation = "read_file");
/// ```
#[macro_export]
macro_rules! log_error {
    ($error:expr) => {
        tracing::error!(error = %$error);
    };
    ($error:expr, $($fields:tt)*) => {
        tracing::error!(error = %$error, $($fields)*);
    };
}

/// The current tracing dispatcher, for installing on threads spawned by the loop.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}

pub use tracing::{debug, error, info, trace, warn};
