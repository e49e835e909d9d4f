//! A minimal leveled logger in the same shape the rest of this crate's
//! ancestry uses: a `LogLevel` enum, a global level read once from the
//! environment, and a `log!` macro that writes a prefixed line to stderr.
//! Deliberately not the `log`/`env_logger` crates — this tracer only ever
//! has one sink (stderr) and doesn't need a facade.

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub enum LogLevel {
    LogError = 0,
    LogWarn = 1,
    LogInfo = 2,
    LogDebug = 3,
}

lazy_static! {
    static ref LOG_LEVEL: AtomicUsize = AtomicUsize::new(init_level());
}

fn init_level() -> usize {
    match env::var("GOTRACE_LOG").as_deref() {
        Ok("debug") => LogLevel::LogDebug as usize,
        Ok("info") => LogLevel::LogInfo as usize,
        Ok("warn") => LogLevel::LogWarn as usize,
        _ => LogLevel::LogError as usize,
    }
}

pub fn enabled(level: LogLevel) -> bool {
    (level as usize) <= LOG_LEVEL.load(Ordering::Relaxed)
}

pub fn set_level(level: LogLevel) {
    LOG_LEVEL.store(level as usize, Ordering::Relaxed);
}

#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        if $crate::log::enabled($level) {
            eprintln!("[{:?}] {}", $level, format!($($arg)*));
        }
    };
}
