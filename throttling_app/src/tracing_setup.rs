use std::io;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Filter honoring `RUST_LOG`, falling back to `default_level` when it is unset or invalid
fn env_filter(default_level: Level) -> EnvFilter {
    EnvFilter::builder().with_default_directive(default_level.into()).from_env_lossy()
}

/// Initialise tracing with a non-blocking hourly file appender
///
/// Keep the returned guard alive for the lifetime of the process: dropping it
/// flushes and stops the background writer thread.
pub fn init(app_name: &str, log_dir: &str, default_level: Level) -> WorkerGuard {
    // A missing directory only means the appender fails to open files later
    let _ = std::fs::create_dir_all(log_dir);

    // Rolls over to `<app_name>.log.<yyyy-mm-dd-hh>` every hour
    let file_appender = tracing_appender::rolling::hourly(log_dir, format!("{app_name}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Admission decisions are logged from many tasks at once, so keep
    // thread ids and source lines to tell them apart
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false) // no color codes in files
        .compact();

    tracing_subscriber::registry().with(env_filter(default_level)).with(file_layer).init();

    guard
}

/// Initialise tracing with both file and stdout output
///
/// Used by the simulator when it runs interactively, so metrics snapshots
/// show up on the terminal as well as in the log file.
pub fn init_with_stdout(app_name: &str, log_dir: &str, default_level: Level) -> WorkerGuard {
    let _ = std::fs::create_dir_all(log_dir);

    // File output goes through the background writer
    let file_appender = tracing_appender::rolling::hourly(log_dir, format!("{app_name}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .compact();

    // Stdout is written synchronously and keeps colors for readability
    let stdout_layer = fmt::layer()
        .with_writer(io::stdout)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(true)
        .compact();

    // Both layers share one filter, so RUST_LOG applies to file and terminal alike
    tracing_subscriber::registry().with(env_filter(default_level)).with(file_layer).with(stdout_layer).init();

    guard
}
