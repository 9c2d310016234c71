/// Console formatting and writing for log lines.
use chrono::Utc;
use colored::Colorize;

use super::levels::LogLevel;
use super::tags::LogTag;

pub fn format_and_log(tag: LogTag, level: LogLevel, message: &str) {
    let ts = Utc::now().format("%H:%M:%S%.3f");
    let level_str = match level {
        LogLevel::Error => level.as_str().red().bold(),
        LogLevel::Warning => level.as_str().yellow(),
        LogLevel::Info => level.as_str().green(),
        LogLevel::Debug => level.as_str().cyan(),
        LogLevel::Verbose => level.as_str().dimmed(),
    };
    let line = format!("{} {:7} [{}] {}", ts, level_str, tag.as_str().bold(), message);
    if level == LogLevel::Error {
        eprintln!("{}", line);
    } else {
        println!("{}", line);
    }
}
