use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

/// Installs a Ctrl+C handler that clears `running`
///
/// Simulated clients and the metrics reporter poll the flag between requests,
/// so in-flight requests finish and release their capacity before the
/// simulator prints its final histogram. Only one handler can be installed
/// per process; a second call returns an error.
pub fn setup(running: Arc<AtomicBool>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        // Runs on the ctrlc signal thread, not on the tokio runtime
        tracing::info!("Shutdown signal received, stopping simulated traffic");
        running.store(false, Ordering::Relaxed);
    })
}
