// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! A small `tracing`-backed logging facade shared by every component of the
//! pub-sub core. Mirrors the identifier-prefixed logging convention used
//! throughout this codebase: every call site names the component that
//! produced the log line, so correlated messages are easy to `grep` for.

use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::RwLock;
use tracing::event;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt,
    prelude::*,
    reload::{self, Handle},
    Registry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
    Off = 5,
}

impl Level {
    fn to_filter(self) -> LevelFilter {
        match self {
            Level::Trace => LevelFilter::TRACE,
            Level::Debug => LevelFilter::DEBUG,
            Level::Info => LevelFilter::INFO,
            Level::Warn => LevelFilter::WARN,
            Level::Error => LevelFilter::ERROR,
            Level::Off => LevelFilter::OFF,
        }
    }
}

struct LoggerState {
    reload_handle: Handle<LevelFilter, Registry>,
    // Keeps the non-blocking file writer thread alive for the process lifetime.
    _file_guard: RwLock<Option<WorkerGuard>>,
}

static INITIATE_ONCE: OnceCell<LoggerState> = OnceCell::new();

const ENV_LOG_DIR: &str = "DELTA_PUBSUB_LOG_DIR";

/// Attempt to read a directory path from an environment variable, creating it
/// if necessary. Returns `None` on any failure (missing var, empty value,
/// unwritable path) rather than propagating an error — logging setup must
/// never be the reason the process fails to start.
pub fn create_directory_from_env(envname: &str) -> Option<String> {
    let dirpath = std::env::var(envname).ok()?;
    if dirpath.trim().is_empty() || std::fs::create_dir_all(&dirpath).is_err() {
        return None;
    }
    Some(dirpath)
}

/// Initialize the global logger on the first call only. Subsequent calls
/// reset the minimal level via the reloadable filter handle rather than
/// re-installing a subscriber. Returns the effective level.
pub fn init(minimal_level: Option<Level>, file_name: Option<&str>) -> Level {
    let level = minimal_level.unwrap_or(Level::Warn);
    let level_filter = level.to_filter();

    INITIATE_ONCE.get_or_init(|| {
        let (filter_layer, reload_handle) = reload::Layer::new(level_filter);
        let stdout_layer = fmt::layer().with_target(false);

        let file_guard = create_directory_from_env(ENV_LOG_DIR).map(|dir| {
            let prefix = file_name.unwrap_or("delta-pubsub").to_string();
            let appender = tracing_appender::rolling::daily(Path::new(&dir), prefix);
            tracing_appender::non_blocking(appender)
        });

        let subscriber = Registry::default().with(filter_layer).with(stdout_layer);
        match file_guard {
            Some((writer, guard)) => {
                let file_layer = fmt::layer().with_ansi(false).with_writer(writer);
                let _ = tracing::subscriber::set_global_default(subscriber.with(file_layer));
                LoggerState {
                    reload_handle,
                    _file_guard: RwLock::new(Some(guard)),
                }
            }
            None => {
                let _ = tracing::subscriber::set_global_default(subscriber);
                LoggerState {
                    reload_handle,
                    _file_guard: RwLock::new(None),
                }
            }
        }
    });

    if let Some(state) = INITIATE_ONCE.get() {
        let _ = state.reload_handle.modify(|filter| *filter = level_filter);
    }

    level
}

macro_rules! create_log {
    ($name:ident, $uppercase_level:tt) => {
        /// Logs `message` tagged with `log_identifier` at this level. If no
        /// logger has been initialized yet, initializes one at `Level::Warn`.
        pub fn $name<Message: AsRef<str>, Identifier: AsRef<str>>(
            log_identifier: Identifier,
            message: Message,
        ) {
            if INITIATE_ONCE.get().is_none() {
                init(Some(Level::Warn), None);
            }
            let identifier_ref = log_identifier.as_ref();
            let message_ref = message.as_ref();
            event!(tracing::Level::$uppercase_level, "{identifier_ref} - {message_ref}");
        }
    };
}

create_log!(log_trace, TRACE);
create_log!(log_debug, DEBUG);
create_log!(log_info, INFO);
create_log!(log_warn, WARN);
create_log!(log_error, ERROR);

/// Logs at a level chosen at runtime; `Level::Off` is a no-op.
pub fn log<Message: AsRef<str>, Identifier: AsRef<str>>(
    log_level: Level,
    log_identifier: Identifier,
    message: Message,
) {
    match log_level {
        Level::Trace => log_trace(log_identifier, message),
        Level::Debug => log_debug(log_identifier, message),
        Level::Info => log_info(log_identifier, message),
        Level::Warn => log_warn(log_identifier, message),
        Level::Error => log_error(log_identifier, message),
        Level::Off => (),
    }
}
