use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::runtime::Handle;

use crate::error::Result;
use crate::error::check_fraction;
use crate::quotas::ExternalQuota;
use crate::quotas::QuotaVerdict;

const SAMPLING_INTERVAL: Duration = Duration::from_secs(1);

/// Rejects a random share of all requests
///
/// Useful for load-shedding drills and for gradually draining an instance.
#[derive(Debug, Clone, Copy)]
pub struct DropRequestsQuota {
    probability: f64,
}

impl DropRequestsQuota {
    pub fn new(probability: f64) -> Result<Self> {
        Ok(Self { probability: check_fraction("Drop probability", probability)? })
    }
}

impl ExternalQuota for DropRequestsQuota {
    fn check(&self) -> QuotaVerdict {
        QuotaVerdict::allow_if(fastrand::f64() >= self.probability, || {
            format!("Request was randomly dropped (drop probability {:.2}).", self.probability)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuntimeOverloadQuotaOptions {
    /// How long the runtime may stay saturated before requests get rejected
    pub allowed_seconds_in_exhaustion: u64,
}

impl Default for RuntimeOverloadQuotaOptions {
    fn default() -> Self {
        Self { allowed_seconds_in_exhaustion: 15 }
    }
}

/// Load of the tokio runtime the quota is evaluated on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RuntimeLoad {
    pub(crate) global_queue_depth: usize,
    pub(crate) num_workers: usize,
}

impl RuntimeLoad {
    fn is_exhausted(&self) -> bool {
        self.global_queue_depth >= self.num_workers.max(1)
    }
}

#[derive(Debug, Default)]
struct Observation {
    sampled_at: Option<Instant>,
    exhausted_since: Option<Instant>,
    last_load: Option<RuntimeLoad>,
}

/// Rejects requests while the tokio runtime has been saturated for too long
///
/// The runtime counts as saturated while its global task queue holds at least
/// as many tasks as it has workers. The runtime is sampled at most once per
/// second; between samples the previous observation is reused. Outside of a
/// tokio runtime the quota always passes.
pub struct RuntimeOverloadQuota {
    allowed_exhaustion: Duration,
    sampler: fn() -> Option<RuntimeLoad>,
    observation: Mutex<Observation>,
}

impl RuntimeOverloadQuota {
    pub fn new(options: &RuntimeOverloadQuotaOptions) -> Self {
        Self::with_sampler(options, sample_current_runtime)
    }

    pub(crate) fn with_sampler(options: &RuntimeOverloadQuotaOptions, sampler: fn() -> Option<RuntimeLoad>) -> Self {
        Self {
            allowed_exhaustion: Duration::from_secs(options.allowed_seconds_in_exhaustion),
            sampler,
            observation: Mutex::new(Observation::default()),
        }
    }

    fn observe(&self, now: Instant) -> Option<(RuntimeLoad, Duration)> {
        let mut observation = self.observation.lock();

        let due = observation.sampled_at.is_none_or(|sampled_at| now.duration_since(sampled_at) >= SAMPLING_INTERVAL);
        if due {
            observation.sampled_at = Some(now);
            observation.last_load = (self.sampler)();

            match observation.last_load {
                Some(load) if load.is_exhausted() => {
                    observation.exhausted_since.get_or_insert(now);
                }
                _ => observation.exhausted_since = None,
            }
        }

        let load = observation.last_load?;
        let exhausted_for = observation.exhausted_since.map_or(Duration::ZERO, |since| now.duration_since(since));
        Some((load, exhausted_for))
    }
}

impl Default for RuntimeOverloadQuota {
    fn default() -> Self {
        Self::new(&RuntimeOverloadQuotaOptions::default())
    }
}

impl ExternalQuota for RuntimeOverloadQuota {
    fn check(&self) -> QuotaVerdict {
        let Some((load, exhausted_for)) = self.observe(Instant::now()) else {
            return QuotaVerdict::Allow;
        };

        let overloaded = load.is_exhausted() && exhausted_for >= self.allowed_exhaustion;
        QuotaVerdict::allow_if(!overloaded, || {
            format!(
                "Runtime is overloaded: {} queued tasks for {} workers, exhausted for {}s (allowed {}s).",
                load.global_queue_depth,
                load.num_workers,
                exhausted_for.as_secs(),
                self.allowed_exhaustion.as_secs()
            )
        })
    }
}

fn sample_current_runtime() -> Option<RuntimeLoad> {
    let handle = Handle::try_current().ok()?;
    let metrics = handle.metrics();
    Some(RuntimeLoad { global_queue_depth: metrics.global_queue_depth(), num_workers: metrics.num_workers() })
}
