//! Centralized file-based logging system
//!
//! Writes logs to files under the given directory, separated by concern:
//! - main/ - all events, JSON
//! - error/ - WARN and above
//! - broker/ - load-balancing broker and its workers
//! - server/ - asynchronous server
//! - client/ - asynchronous and broker clients

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_TYPES: [&str; 5] = ["main", "error", "broker", "server", "client"];

/// Initialize centralized file logging
///
/// Creates the log directory tree and installs the global subscriber.
/// The returned guards must be kept alive for the duration of the program.
pub fn init_logging(dir: impl AsRef<Path>) -> io::Result<Vec<WorkerGuard>> {
    let logs_dir = dir.as_ref();
    for log_type in LOG_TYPES {
        fs::create_dir_all(logs_dir.join(log_type))?;
    }

    let mut guards = Vec::new();

    let (main_appender, main_guard) = create_appender(logs_dir, "main");
    guards.push(main_guard);

    let (error_appender, error_guard) = create_appender(logs_dir, "error");
    guards.push(error_guard);

    let (broker_appender, broker_guard) = create_appender(logs_dir, "broker");
    guards.push(broker_guard);

    let (server_appender, server_guard) = create_appender(logs_dir, "server");
    guards.push(server_guard);

    let (client_appender, client_guard) = create_appender(logs_dir, "client");
    guards.push(client_guard);

    let main_layer = tracing_subscriber::fmt::layer()
        .with_writer(main_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json();

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::LevelFilter::WARN);

    let broker_layer = tracing_subscriber::fmt::layer()
        .with_writer(broker_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target().contains("broker")
        }));

    let server_layer = tracing_subscriber::fmt::layer()
        .with_writer(server_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target().contains("server") || metadata.target().contains("api")
        }));

    let client_layer = tracing_subscriber::fmt::layer()
        .with_writer(client_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target().contains("client")
        }));

    // Console layer for development
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(main_layer)
        .with(error_layer)
        .with(broker_layer)
        .with(server_layer)
        .with(client_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    tracing::info!(dir = %logs_dir.display(), "Logging system initialized");

    Ok(guards)
}

/// Create a daily rolling file appender in `<dir>/<name>/`
fn create_appender(dir: &Path, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, dir.join(name), name);
    tracing_appender::non_blocking(appender)
}

/// Log macro helpers for specific log types
#[macro_export]
macro_rules! log_broker {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "broker", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_server {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "server", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_client {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "client", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_main {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "main", $level, $($arg)+)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Once;

    static INSTALL: Once = Once::new();

    fn log_dir() -> PathBuf {
        std::env::temp_dir().join(format!("facility_logs_{}", std::process::id()))
    }

    #[test]
    fn test_init_logging_creates_log_tree() {
        let dir = log_dir();

        // Another test may own the global subscriber already; the tree is
        // created before the subscriber is installed either way
        INSTALL.call_once(|| match init_logging(&dir) {
            Ok(guards) => {
                tracing::info!(target: "main", "log tree ready");
                std::mem::forget(guards);
            }
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::Other),
        });

        for log_type in LOG_TYPES {
            assert!(dir.join(log_type).is_dir(), "missing {}", log_type);
        }

        // A global subscriber is installed by now, so a second call is refused
        let again = init_logging(&dir).unwrap_err();
        assert_eq!(again.kind(), io::ErrorKind::Other);
        assert!(dir.join("main").is_dir());
    }

    #[test]
    fn test_log_macros_expand() {
        crate::log_broker!(tracing::Level::INFO, worker = 1, "ready");
        crate::log_server!(tracing::Level::WARN, semester = 2, "reset refused");
        crate::log_client!(tracing::Level::DEBUG, peer = "x", "noop");
    }
}
