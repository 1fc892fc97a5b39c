//! Leveled file logging for trellis.
//!
//! Log levels:
//! - ERROR: worker failures and fatal engine errors
//! - WARN: recoverable oddities (degraded transforms, ignored edges)
//! - INFO: run lifecycle and per-step progress
//! - DEBUG: context sizes, envelope transitions, worker invocations
//! - TRACE: full prompts and outputs
//!
//! Output goes to `~/.trellis/trellis.log`. Debug mode is enabled with
//! `--debug` or `TRELLIS_DEBUG=1`. Nothing is written until [`init`] (or
//! [`init_with_debug`]) has been called, so library users stay silent.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
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

/// Initialize logging to ~/.trellis/trellis.log
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
pub fn init_with_debug(debug: bool) {
    let env_debug = std::env::var("TRELLIS_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    let level = if debug || env_debug {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    set_level(level);

    if let Some(dir) = dirs::home_dir().map(|h| h.join(".trellis")) {
        let _ = std::fs::create_dir_all(&dir);
        init_to_path(&dir.join("trellis.log"));
    }
}

/// Route log output to `path`, truncating it. Only the first call wins.
pub fn init_to_path(path: &Path) {
    let _ = std::fs::write(path, "");
    LOG_PATH.set(path.to_path_buf()).ok();
}

pub fn is_debug() -> bool {
    get_level() >= LogLevel::Debug
}

/// Set the minimum log level for output.
pub fn set_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

pub fn get_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Log a message at the specified level.
pub fn log_at(level: LogLevel, msg: &str) {
    if level > get_level() {
        return;
    }

    if let Some(path) = LOG_PATH.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.as_str(), msg);
        }
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

/// Per-run step logger.
///
/// Prefixes every line with the graph name and, for step events, the
/// `step i/n` position within the run.
#[derive(Debug, Clone)]
pub struct StepLog {
    name: String,
}

impl StepLog {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn info(&self, msg: &str) {
        info(&format!("[{}] {}", self.name, msg));
    }

    pub fn warn(&self, msg: &str) {
        warn(&format!("[{}] {}", self.name, msg));
    }

    pub fn start(&self, step: usize, total: usize, label: &str) {
        info(&self.format_step(step, total, label, "starting..."));
    }

    pub fn done(&self, step: usize, total: usize, label: &str, chars: usize) {
        info(&self.format_step(step, total, label, &format!("done ({} chars)", chars)));
    }

    pub fn error(&self, step: usize, total: usize, label: &str, err: &str) {
        error(&self.format_step(step, total, label, &format!("ERROR - {}", err)));
    }

    fn format_step(&self, step: usize, total: usize, label: &str, status: &str) -> String {
        format!("[{} step {}/{}] {}: {}", self.name, step, total, label, status)
    }
}

/// Log macro for INFO level.
#[macro_export]
macro_rules! tlog {
    ($($arg:tt)*) => {
        $crate::log::info(&format!($($arg)*))
    };
}

/// Log macro for ERROR level.
#[macro_export]
macro_rules! tlog_error {
    ($($arg:tt)*) => {
        $crate::log::error(&format!($($arg)*))
    };
}

/// Log macro for WARN level.
#[macro_export]
macro_rules! tlog_warn {
    ($($arg:tt)*) => {
        $crate::log::warn(&format!($($arg)*))
    };
}

/// Log macro for DEBUG level.
#[macro_export]
macro_rules! tlog_debug {
    ($($arg:tt)*) => {
        $crate::log::debug(&format!($($arg)*))
    };
}

/// Log macro for TRACE level.
#[macro_export]
macro_rules! tlog_trace {
    ($($arg:tt)*) => {
        $crate::log::trace(&format!($($arg)*))
    };
}
