// Copyright (C) 2019  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! Logging boilerplate and configuration
//!
//! A global shared `Logger` instance built on `slog` and `slog_async`,
//! logging macros that operate on the shared instance, and flushing of
//! logs on scope exit via a guard.
//!
//! The global instance is created with `lazy_static` the first time it is
//! accessed; configure it with `set_logger_config()` or the `setup*()`
//! convenience functions *before* the first log record is emitted,
//! otherwise these functions panic. The logger applies filters from the
//! `RUST_LOG` environment variable via `slog_envlogger`.
//!
//! If no configuration is set, the default is `LoggingConfig::for_testing()`
//! (Rust's test harness has no common setup/teardown hook, so the default
//! must be test-friendly and keep the terminal clean).

use std::env;
use std::fmt;
use std::fs::OpenOptions;
use std::mem;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard,
};

use lazy_static::lazy_static;
use slog::{o, Discard, Drain, Logger};
use slog_async::{Async, AsyncGuard};
use slog_envlogger::EnvLogger;

// Re-export slog things for easy access to slog by dependers
// and also because these are used by macros
pub use slog;
pub use slog::Level;

/// Logging target configuration: Where to log
#[derive(Clone, Debug)]
pub enum LoggingTarget {
    /// Log to standard error
    Stderr,
    /// Log to standard output
    Stdout,
    /// Log to a file
    File(PathBuf),
    /// Don't log anything anywhere
    None,
}

/// Describes logger configuration which can be set in runtime
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Where to log
    pub target: LoggingTarget,
    /// The default logging level,
    /// this may be altered with the RUST_LOG env var on startup.
    pub level: Level,
    /// Channel size for the asynchronous drain, increasing the channel size
    /// prevents the drain from dropping messages in case of logging bursts
    pub drain_channel_size: usize,
}

impl LoggingConfig {
    pub const ASYNC_LOGGER_DRAIN_CHANNEL_SIZE: usize = 128;

    /// Logging configuration suitable for test harness,
    /// doesn't pollute terminal, logs to `test-log.txt` in system tmp location.
    pub fn for_testing() -> Self {
        Self {
            target: LoggingTarget::File(env::temp_dir().join("test-log.txt")),
            level: Level::Trace,
            drain_channel_size: Self::ASYNC_LOGGER_DRAIN_CHANNEL_SIZE,
        }
    }

    /// Default setup for standalone programs
    ///
    /// The default level is `Debug` for debug builds
    /// and `Info` for release builds.
    pub fn for_app(drain_channel_size: usize) -> Self {
        Self {
            target: LoggingTarget::Stderr,
            level: if cfg!(debug_assertions) {
                Level::Debug
            } else {
                Level::Info
            },
            drain_channel_size,
        }
    }

    /// Configuration where nothing is logged
    pub fn no_logging() -> Self {
        Self {
            target: LoggingTarget::None,
            level: Level::Error,
            drain_channel_size: Self::ASYNC_LOGGER_DRAIN_CHANNEL_SIZE,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::for_testing()
    }
}

/// Lock logger configuration with mutual exclusion
#[inline(always)]
fn lock_logger_config() -> MutexGuard<'static, Option<LoggingConfig>> {
    LOGGER_CONFIG
        .lock()
        .expect("BUG: Could not lock logger config mutex")
}

/// Set new logger configuration and return old one.
///
/// # Panics
///
/// Panics if `LOGGER` is already instantiated, ie. its configuration
/// can no longer be changed.
pub fn set_logger_config(config: LoggingConfig) -> LoggingConfig {
    lock_logger_config()
        .replace(config)
        .expect("BUG: Could not set logger config, LOGGER already instantiated")
}

/// Setup logger with configuration passed in `config`
/// and return a `FlushGuard`. Convenience function.
pub fn setup(config: LoggingConfig) -> FlushGuard {
    set_logger_config(config);
    LOGGER.take_guard()
}

/// Setup logger with default configuration suitable for application usage
/// (ie. in `main()`) and return a `FlushGuard`. Convenience function.
pub fn setup_for_app(drain_channel_size: usize) -> FlushGuard {
    setup(LoggingConfig::for_app(drain_channel_size))
}

/// Logging setup that should be used by integration tests.
///
/// This setup is mindful of tests running in multiple threads,
/// it can safely be called multiple times.
pub fn init_test_logging() -> Option<FlushGuard> {
    static INITIALIZED: AtomicBool = AtomicBool::new(false);

    // Tests are run typically in random order in multiple threads,
    // make sure the initialization is only run once:
    if INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        Some(setup(LoggingConfig::for_testing()))
    } else {
        None
    }
}

/// Setup EnvLogger filter for a drain based on `RUST_LOG` environment,
/// `default_level` will be used when RUST_LOG is not defined or is empty
fn build_envlogger<D: Drain>(drain: D, default_level: Level) -> EnvLogger<D> {
    let rust_log_result = env::var("RUST_LOG");
    let filters: &str = match rust_log_result {
        Ok(ref rust_log) if !rust_log.is_empty() => rust_log.as_str(),
        _ => default_level.as_short_str(),
    };
    let builder = slog_envlogger::LogBuilder::new(drain);
    builder.parse(filters).build()
}

/// Create terminal drain for logger, logging to either stderr or stdout
fn get_terminal_drain(stderr: bool) -> impl Drain<Ok = (), Err = impl fmt::Debug> {
    let builder = slog_term::TermDecorator::new();
    let builder = if stderr {
        builder.stderr()
    } else {
        builder.stdout()
    };
    slog_term::FullFormat::new(builder.build()).build()
}

/// Create file drain for logger
fn get_file_drain(path: &Path) -> impl Drain<Ok = (), Err = impl fmt::Debug> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(true)
        .truncate(false)
        .open(path)
        .unwrap_or_else(|e| {
            panic!(
                "Logging setup error: Could not open file `{}` for logging: {}",
                path.display(),
                e
            )
        });

    slog_term::FullFormat::new(slog_term::PlainDecorator::new(file)).build()
}

/// Logger flush RAII guard.
///
/// The guard ensures logs are flushed when it goes out of scope.
/// Due to the way `slog_async` works by default it can't ensure log flush
/// on application exit, this can only be done with the guard.
#[must_use = "When dropped, FlushGuard flushes and stops its associated logger instance"]
pub struct FlushGuard(Option<AsyncGuard>);

/// `GuardedLogger` holds both a `Logger` instance and a mutex
/// containing a `FlushGuard`. The `FlushGuard` can be
/// taken out and used as a RAII guard to ensure log flushing on scope exit.
pub struct GuardedLogger {
    pub logger: Logger,
    guard: Mutex<FlushGuard>,
}

impl GuardedLogger {
    fn new(config: &LoggingConfig) -> Self {
        use LoggingTarget::*;

        match &config.target {
            None => Self::with_discard(),
            Stderr => Self::with_drain(config, get_terminal_drain(true)),
            Stdout => Self::with_drain(config, get_terminal_drain(false)),
            File(path) => Self::with_drain(config, get_file_drain(path)),
        }
    }

    fn with_drain<D, E>(config: &LoggingConfig, drain: D) -> Self
    where
        D: Drain<Ok = (), Err = E> + Send + 'static,
        E: fmt::Debug,
    {
        let drain = build_envlogger(drain, config.level);
        let (drain, guard) = Async::new(drain.fuse())
            .chan_size(config.drain_channel_size)
            .build_with_guard();
        Self {
            logger: Logger::root(drain.fuse(), o!()),
            guard: Mutex::new(FlushGuard(Some(guard))),
        }
    }

    fn with_discard() -> Self {
        Self {
            logger: Logger::root(Discard, o!()),
            guard: Mutex::new(FlushGuard(None)),
        }
    }

    /// Get the `FlushGuard` associated with this `Logger`,
    /// note that if the guard has previously been taken,
    /// this will just return an empty (dummy) guard.
    pub fn take_guard(&self) -> FlushGuard {
        let mut locker = self
            .guard
            .lock()
            .expect("BUG: Could not lock GuardedLogger mutex");
        mem::replace(&mut *locker, FlushGuard(None))
    }

    /// Take a `FlushGuard` and drop it, effectively flushing
    /// the `Logger` immediately.
    pub fn flush(&self) {
        drop(self.take_guard());
    }
}

impl Deref for GuardedLogger {
    type Target = Logger;

    fn deref(&self) -> &Logger {
        &self.logger
    }
}

lazy_static! {
    static ref LOGGER_CONFIG: Mutex<Option<LoggingConfig>> =
        Mutex::new(Some(LoggingConfig::default()));

    /// Static global reference to the logger that will be accessible from all crates
    pub static ref LOGGER: GuardedLogger = {
        // Take the configuration data
        let mut config_lock = lock_logger_config();
        let config = config_lock
            .take()
            .expect("BUG: Internal error: LOGGER_CONFIG empty in LOGGER initialization");

        GuardedLogger::new(&config)
    };
}

/// Log critical level record in the global logger
#[macro_export]
macro_rules! crit(
    ($($args:tt)+) => {
        $crate::slog::slog_log!($crate::LOGGER, $crate::Level::Critical, "", $($args)+)
    };
);

/// Log error level record in the global logger
#[macro_export]
macro_rules! error(
    ($($args:tt)+) => {
        $crate::slog::slog_log!($crate::LOGGER, $crate::Level::Error, "", $($args)+)
    };
);

/// Log warning level record in the global logger
#[macro_export]
macro_rules! warn(
    ($($args:tt)+) => {
        $crate::slog::slog_log!($crate::LOGGER, $crate::Level::Warning, "", $($args)+)
    };
);

/// Log info level record in the global logger
#[macro_export]
macro_rules! info(
    ($($args:tt)*) => {
        $crate::slog::slog_log!($crate::LOGGER, $crate::Level::Info, "", $($args)*)
    };
);

/// Log debug level record in the global logger
#[macro_export]
macro_rules! debug(
    ($($args:tt)+) => {
        $crate::slog::slog_log!($crate::LOGGER, $crate::Level::Debug, "", $($args)+)
    };
);

/// Log trace level record in the global logger
#[macro_export]
macro_rules! trace(
    ($($args:tt)+) => {
        $crate::slog::slog_log!($crate::LOGGER, $crate::Level::Trace, "", $($args)+)
    };
);

/// All logging macros are re-exported here for easy
/// inclusion in user code. Usage: `use tether_logging::macros::*;`.
pub mod macros {
    pub use super::{crit, debug, error, info, trace, warn};
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_config_is_test_friendly() {
        match LoggingConfig::default().target {
            LoggingTarget::File(_) => (),
            other => panic!("default logging target pollutes terminal: {:?}", other),
        }
    }

    #[test]
    fn test_logging_macros() {
        let _guard = init_test_logging();
        trace!("trace: {}", 1);
        debug!("debug: {}", 2);
        info!("info: {}", 3);
        warn!("warn: {}", 4);
        error!("error: {}", 5);
    }
}
