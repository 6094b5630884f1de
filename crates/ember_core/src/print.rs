//! Terminal logging, mirrored into an in-memory session log that the
//! UI boundary drains for its log view.

use std::collections::VecDeque;
use std::sync::{LazyLock, Mutex};

/// How many lines the session log retains before dropping the oldest.
const SESSION_LOG_CAP: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    Info,
    Error,
    Point,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub kind: LogType,
    pub message: String,
}

static SESSION_LOG: LazyLock<Mutex<VecDeque<LogEntry>>> =
    LazyLock::new(|| Mutex::new(VecDeque::new()));

pub fn print_to_memory(message: &str, kind: LogType) {
    let mut log = SESSION_LOG.lock().unwrap();
    if log.len() >= SESSION_LOG_CAP {
        log.pop_front();
    }
    log.push_back(LogEntry {
        kind,
        message: message.to_owned(),
    });
}

/// Takes all buffered log lines, leaving the buffer empty.
pub fn drain_session_log() -> Vec<LogEntry> {
    let mut log = SESSION_LOG.lock().unwrap();
    log.drain(..).collect()
}

/// Print an informational message
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        let msg = format!("{}", format_args!($($arg)*));
        println!("{} {}", owo_colors::OwoColorize::yellow(&"[info]"), msg);
        $crate::print::print_to_memory(&msg, $crate::print::LogType::Info);
    }};
}

/// Print an error message
#[macro_export]
macro_rules! err {
    ($($arg:tt)*) => {{
        let msg = format!("{}", format_args!($($arg)*));
        eprintln!("{} {}", owo_colors::OwoColorize::red(&"[error]"), msg);
        $crate::print::print_to_memory(&msg, $crate::print::LogType::Error);
    }};
}

/// Print a point message, i.e. a small step in some process
#[macro_export]
macro_rules! pt {
    ($($arg:tt)*) => {{
        let msg = format!("{}", format_args!($($arg)*));
        println!("{} {}", owo_colors::OwoColorize::bold(&"-"), msg);
        $crate::print::print_to_memory(&msg, $crate::print::LogType::Point);
    }};
}
