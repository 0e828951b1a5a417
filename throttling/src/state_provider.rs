use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::actualizer::ConfigurationActualizer;
use crate::actualizer::StateActualizer;
use crate::config::ErrorCallback;
use crate::config::ThrottlingConfiguration;
use crate::error::Result;
use crate::state::ThrottlingState;

/// Hands out the shared throttling state, refreshing it when it went stale
pub trait StateProvider: Send + Sync {
    fn obtain_state(&self) -> Result<Arc<ThrottlingState>>;
}

/// Lazily actualizes one [`ThrottlingState`] with at most one refresh in flight
///
/// After each refresh the state is flagged stale again once its refresh period
/// elapses, so the next caller after that pays for the refresh. The flip is
/// scheduled on the current tokio runtime, or on a helper thread outside of one.
pub struct ThrottlingStateProvider {
    state: Arc<ThrottlingState>,
    actualizer: Box<dyn StateActualizer>,
    error_callback: Option<ErrorCallback>,
    // Whether any refresh has succeeded yet
    actualized: Mutex<bool>,
}

impl ThrottlingStateProvider {
    pub fn new(configuration: ThrottlingConfiguration) -> Self {
        let error_callback = configuration.error_callback.clone();
        Self::with_actualizer(Box::new(ConfigurationActualizer::new(configuration)), error_callback)
    }

    pub fn with_actualizer(actualizer: Box<dyn StateActualizer>, error_callback: Option<ErrorCallback>) -> Self {
        Self { state: Arc::new(ThrottlingState::new()), actualizer, error_callback, actualized: Mutex::new(false) }
    }

    fn schedule_staleness(&self) {
        match self.state.refresh_period() {
            Some(period) if period.is_zero() => self.state.set_actual(false),
            Some(period) => mark_stale_after(Arc::downgrade(&self.state), period),
            None => {}
        }
    }
}

impl StateProvider for ThrottlingStateProvider {
    fn obtain_state(&self) -> Result<Arc<ThrottlingState>> {
        if self.state.is_actual() {
            return Ok(Arc::clone(&self.state));
        }

        let mut actualized = self.actualized.lock();
        if self.state.is_actual() {
            return Ok(Arc::clone(&self.state));
        }

        match self.actualizer.actualize(&self.state) {
            Ok(()) => {
                *actualized = true;
                self.schedule_staleness();
            }
            Err(error) => match &self.error_callback {
                Some(callback) if *actualized => {
                    warn!(%error, "Throttling state actualization failed, keeping previous state");
                    callback(&error);
                    self.state.set_actual(true);
                    self.schedule_staleness();
                }
                _ => return Err(error),
            },
        }

        Ok(Arc::clone(&self.state))
    }
}

fn mark_stale_after(state: Weak<ThrottlingState>, period: Duration) {
    let mark_stale = move || {
        if let Some(state) = state.upgrade() {
            state.set_actual(false);
        }
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                tokio::time::sleep(period).await;
                mark_stale();
            });
        }
        Err(_) => {
            std::thread::spawn(move || {
                std::thread::sleep(period);
                mark_stale();
            });
        }
    }
}
