//! Structured logging for debugging the task runner.
//!
//! Log levels:
//! - ERROR: Failures that abort a run (dependency cycles)
//! - WARN: Unexpected conditions that are recoverable (grace period expiry)
//! - INFO: High-level run notifications (run start/finish, task dispatch)
//! - DEBUG: Detailed traces (state transitions, store change events)
//! - TRACE: Very detailed traces (rendered instructions)
//!
//! Nothing is written until [`init`] is called, so embedding the library
//! (and running its tests) never touches the filesystem. Debug mode can be
//! enabled with `init_with_debug(true)` or `BACKLOG_RUNNER_DEBUG=1`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Log levels for filtering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// Initialize logging to ~/.backlog-runner/runner.log
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging; DEBUG is on if `debug` or `BACKLOG_RUNNER_DEBUG` says so.
pub fn init_with_debug(debug: bool) {
    let level = if debug || debug_from_env() {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);

    let Some(dir) = dirs::home_dir().map(|h| h.join(".backlog-runner")) else {
        return;
    };
    let _ = std::fs::create_dir_all(&dir);
    let path = dir.join("runner.log");
    // One log per process
    let _ = std::fs::write(&path, "");
    LOG_PATH.set(path).ok();
}

fn debug_from_env() -> bool {
    std::env::var("BACKLOG_RUNNER_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn enabled(level: LogLevel) -> bool {
    level <= LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Append one line at `level` if logging is initialized and the level passes.
pub fn log_at(level: LogLevel, msg: &str) {
    let Some(path) = LOG_PATH.get() else {
        return;
    };
    if !enabled(level) {
        return;
    }
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.as_str(), msg);
    }
}

pub fn error(msg: &str) {
    log_at(LogLevel::Error, msg);
}

pub fn warn(msg: &str) {
    log_at(LogLevel::Warn, msg);
}

pub fn info(msg: &str) {
    log_at(LogLevel::Info, msg);
}

pub fn debug(msg: &str) {
    log_at(LogLevel::Debug, msg);
}

pub fn trace(msg: &str) {
    log_at(LogLevel::Trace, msg);
}

/// Rate limiter for high-frequency log lines.
///
/// Admits the first `first` events, then every `every`th event after that.
/// Store change notifications can arrive in bursts while an agent edits a
/// task file, so the runner samples them instead of logging each one.
#[derive(Debug, Clone)]
pub struct LogSampler {
    first: u64,
    every: u64,
    seen: u64,
}

impl LogSampler {
    pub fn new(first: u64, every: u64) -> Self {
        Self {
            first,
            every: every.max(1),
            seen: 0,
        }
    }

    /// Record one event; returns whether it should be logged.
    pub fn admit(&mut self) -> bool {
        self.seen += 1;
        self.seen <= self.first || self.seen % self.every == 0
    }

    /// Number of events recorded so far.
    pub fn seen(&self) -> u64 {
        self.seen
    }
}

/// Log macro for INFO level.
#[macro_export]
macro_rules! rlog {
    ($($arg:tt)*) => {
        $crate::log::info(&format!($($arg)*))
    };
}

/// Log macro for ERROR level.
#[macro_export]
macro_rules! rlog_error {
    ($($arg:tt)*) => {
        $crate::log::error(&format!($($arg)*))
    };
}

/// Log macro for WARN level.
#[macro_export]
macro_rules! rlog_warn {
    ($($arg:tt)*) => {
        $crate::log::warn(&format!($($arg)*))
    };
}

/// Log macro for DEBUG level (only logs when debug mode is enabled).
#[macro_export]
macro_rules! rlog_debug {
    ($($arg:tt)*) => {
        $crate::log::debug(&format!($($arg)*))
    };
}

/// Log macro for TRACE level.
#[macro_export]
macro_rules! rlog_trace {
    ($($arg:tt)*) => {
        $crate::log::trace(&format!($($arg)*))
    };
}
