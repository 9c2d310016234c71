//! Structured console logging with tags and levels.
//!
//! Usage:
//!
//! ```rust
//! use chainboard::logger::{self, LogTag};
//!
//! logger::info(LogTag::Api, "provider call succeeded");
//! logger::warning(LogTag::Breaker, "circuit open, short-circuiting");
//! logger::debug(LogTag::Snapshots, "metric key resolved");
//! ```
//!
//! The minimum level is read once from the `CHAINBOARD_LOG` environment
//! variable (`error`/`warn`/`info`/`debug`/`verbose`, default `info`).

mod format;
mod levels;
mod tags;

pub use levels::LogLevel;
pub use tags::LogTag;

use once_cell::sync::OnceCell;

static MIN_LEVEL: OnceCell<LogLevel> = OnceCell::new();

/// Initialize the logger. Safe to call more than once; later calls are no-ops.
pub fn init() {
    let level = std::env::var("CHAINBOARD_LOG")
        .map(|s| LogLevel::from_env_str(&s))
        .unwrap_or(LogLevel::Info);
    let _ = MIN_LEVEL.set(level);
}

fn min_level() -> LogLevel {
    *MIN_LEVEL.get_or_init(|| LogLevel::Info)
}

fn should_log(level: LogLevel) -> bool {
    // Errors always log.
    level == LogLevel::Error || level <= min_level()
}

fn log_internal(tag: LogTag, level: LogLevel, message: &str) {
    if !should_log(level) {
        return;
    }
    format::format_and_log(tag, level, message);
}

/// Log at ERROR level (always shown, critical issues).
pub fn error(tag: LogTag, message: &str) {
    log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level (important issues).
pub fn warning(tag: LogTag, message: &str) {
    log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level (standard operations).
pub fn info(tag: LogTag, message: &str) {
    log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level (detailed diagnostics).
pub fn debug(tag: LogTag, message: &str) {
    log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level (very detailed tracing).
pub fn verbose(tag: LogTag, message: &str) {
    log_internal(tag, LogLevel::Verbose, message);
}
