use std::sync::Arc;

use tracing::debug;

use crate::config::ThrottlingConfiguration;
use crate::config::ThrottlingEssentials;
use crate::error::Result;
use crate::quotas::PropertiesQuota;
use crate::quotas::PropertyQuota;
use crate::semaphore::LifoSemaphore;
use crate::state::ThrottlingState;

/// Capacity limit used when neither an absolute nor a per-core limit is configured
pub const UNLIMITED_CAPACITY: i64 = i32::MAX as i64;

/// Brings a [`ThrottlingState`] in line with the current configuration
pub trait StateActualizer: Send + Sync {
    /// Recompute limits and quotas and reconcile the semaphore, marking the state actual
    ///
    /// Must leave the state untouched when it fails.
    fn actualize(&self, state: &ThrottlingState) -> Result<()>;
}

/// [`StateActualizer`] reading everything from a [`ThrottlingConfiguration`]
pub struct ConfigurationActualizer {
    configuration: ThrottlingConfiguration,
}

impl ConfigurationActualizer {
    pub fn new(configuration: ThrottlingConfiguration) -> Self {
        Self { configuration }
    }

    fn capacity_limit(&self, essentials: &ThrottlingEssentials) -> i64 {
        if let Some(limit) = essentials.capacity_limit {
            return limit.max(1);
        }

        if let Some(per_core) = essentials.capacity_limit_per_core {
            let cores = i64::try_from(self.configuration.number_of_cores()).unwrap_or(i64::MAX);
            return per_core.saturating_mul(cores).max(1);
        }

        UNLIMITED_CAPACITY
    }

    fn properties_quotas(&self) -> Result<Option<Vec<Arc<dyn PropertiesQuota>>>> {
        let custom = self.configuration.properties_quotas.as_ref().and_then(|provider| provider());

        if self.configuration.property_quotas.is_empty() {
            return Ok(custom);
        }

        let mut quotas = custom.unwrap_or_default();
        for (property, options) in &self.configuration.property_quotas {
            quotas.push(Arc::new(PropertyQuota::new(property.as_str(), &options())?));
        }

        Ok(Some(quotas))
    }
}

impl StateActualizer for ConfigurationActualizer {
    fn actualize(&self, state: &ThrottlingState) -> Result<()> {
        let essentials = self.configuration.essentials();
        let capacity_limit = self.capacity_limit(&essentials);
        let queue_limit = essentials.queue_limit.max(0);
        let properties_quotas = self.properties_quotas()?;

        let external_quotas = self.configuration.external_quotas.as_ref().and_then(|provider| provider());
        let priority_quotas = self.configuration.priority_quotas.as_ref().and_then(|provider| provider());
        let consumer_quotas = self.configuration.consumer_quotas.as_ref().and_then(|provider| provider());

        let old_capacity_limit = state.capacity_limit();

        state.set_enabled(essentials.enabled);
        state.set_capacity_limit(capacity_limit);
        state.set_queue_limit(queue_limit);
        state.set_refresh_period(essentials.refresh_period);

        state.external_quotas.store(external_quotas.map(Arc::new));
        state.priority_quotas.store(priority_quotas.map(Arc::new));
        state.consumer_quotas.store(consumer_quotas.map(Arc::new));
        state.properties_quotas.store(properties_quotas.map(Arc::new));

        let pruned = state.prune_idle_counters();
        adjust_semaphore(&state.semaphore, old_capacity_limit, capacity_limit)?;

        state.set_actual(true);

        debug!(enabled = essentials.enabled, capacity_limit, queue_limit, pruned_counters = pruned, "Throttling state actualized");
        Ok(())
    }
}

fn adjust_semaphore(semaphore: &LifoSemaphore, old_limit: i64, new_limit: i64) -> Result<()> {
    let difference = new_limit - old_limit;

    if difference > 0 {
        debug!(old_limit, new_limit, "Releasing capacity into semaphore");
        semaphore.release_many(difference)?;
    } else if difference < 0 {
        debug!(old_limit, new_limit, "Draining capacity from semaphore");
        drain_semaphore(semaphore.clone(), -difference);
    }

    Ok(())
}

// Acquired units are never released, which lowers capacity by `amount` for good.
// Admitted requests finish undisturbed and the drain completes as they release.
fn drain_semaphore(semaphore: LifoSemaphore, amount: i64) {
    let drain = async move {
        for _ in 0..amount {
            semaphore.acquire().await;
        }
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(drain);
        }
        Err(_) => {
            std::thread::spawn(move || futures::executor::block_on(drain));
        }
    }
}
