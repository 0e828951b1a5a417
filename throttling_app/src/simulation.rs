use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Deserialize;
use throttling::ThrottlingConfiguration;
use throttling::ThrottlingError;
use throttling::ThrottlingPriority;
use throttling::ThrottlingProperties;
use throttling::ThrottlingProvider;
use throttling::ThrottlingStatus;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config_loader::SimulationConfigFile;

/// Pause after a rejection so that rejected clients do not spin
const REJECTION_BACKOFF: Duration = Duration::from_millis(2);

/// Shape of the simulated traffic
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Number of concurrent clients, each issuing requests back to back
    pub concurrency: usize,
    pub consumers: Vec<String>,
    pub duration_secs: u64,
    pub work_ms_min: u64,
    pub work_ms_max: u64,
    pub metrics_interval_ms: u64,
    pub deadline_ms: Option<u64>,
    /// Share of requests sent with critical priority
    pub critical_share: f64,
    /// Share of requests sent with sheddable priority
    pub sheddable_share: f64,
    pub log_to_stdout: bool,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            concurrency: 64,
            consumers: vec!["billing".to_string(), "search".to_string(), "reports".to_string(), "batch".to_string()],
            duration_secs: 60,
            work_ms_min: 5,
            work_ms_max: 50,
            metrics_interval_ms: 1_000,
            deadline_ms: Some(200),
            critical_share: 0.1,
            sheddable_share: 0.2,
            log_to_stdout: true,
        }
    }
}

impl SimulationSettings {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms.max(1))
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// Maps a roll in `[0, 1)` onto a priority: critical first, then sheddable, ordinary for the rest
    pub fn priority_for(&self, roll: f64) -> ThrottlingPriority {
        if roll < self.critical_share {
            ThrottlingPriority::Critical
        } else if roll < self.critical_share + self.sheddable_share {
            ThrottlingPriority::Sheddable
        } else {
            ThrottlingPriority::Ordinary
        }
    }

    pub fn random_priority(&self) -> ThrottlingPriority {
        self.priority_for(fastrand::f64())
    }

    pub fn random_consumer(&self) -> Option<&str> {
        if self.consumers.is_empty() {
            return None;
        }
        Some(&self.consumers[fastrand::usize(..self.consumers.len())])
    }

    pub fn random_work(&self) -> Duration {
        let min = self.work_ms_min.min(self.work_ms_max);
        Duration::from_millis(fastrand::u64(min..=self.work_ms_max.max(min)))
    }
}

/// Count of admission outcomes by status
#[derive(Debug, Default)]
pub struct StatusHistogram {
    counts: [AtomicU64; ThrottlingStatus::ALL.len()],
}

impl StatusHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, status: ThrottlingStatus) {
        if let Some(index) = ThrottlingStatus::ALL.iter().position(|candidate| *candidate == status) {
            self.counts[index].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|count| count.load(Ordering::Relaxed)).sum()
    }

    /// Non-zero counts only
    pub fn snapshot(&self) -> BTreeMap<ThrottlingStatus, u64> {
        ThrottlingStatus::ALL
            .into_iter()
            .zip(&self.counts)
            .map(|(status, count)| (status, count.load(Ordering::Relaxed)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}

pub fn build_configuration(config: &SimulationConfigFile) -> ThrottlingConfiguration {
    let mut builder = ThrottlingConfiguration::builder()
        .essentials(config.essentials.clone())
        .error_callback(|err: &ThrottlingError| warn!("Throttling state refresh failed: {err}"));

    for (property, options) in &config.property_quotas {
        builder = builder.property_quota(property, options.clone());
    }

    builder.build()
}

/// Issues requests back to back until `running` is cleared
pub async fn run_client(
    client: usize,
    provider: Arc<ThrottlingProvider>,
    settings: Arc<SimulationSettings>,
    histogram: Arc<StatusHistogram>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        let consumer = settings.random_consumer();
        let properties = ThrottlingProperties::builder().consumer(consumer).consumer_id(consumer).build();
        let priority = settings.random_priority();

        let result = match provider.throttle(&properties, settings.deadline(), priority).await {
            Ok(result) => result,
            Err(err) => {
                warn!("Client {client} failed to throttle: {err}");
                tokio::time::sleep(REJECTION_BACKOFF).await;
                continue;
            }
        };

        histogram.record(result.status());

        if result.is_passed() {
            tokio::time::sleep(settings.random_work()).await;
            result.dispose();
        } else {
            debug!(client, status = %result.status(), reason = ?result.rejection_reason(), "Request rejected");
            tokio::time::sleep(REJECTION_BACKOFF).await;
        }
    }
}

/// Logs a metrics snapshot every `interval` until `running` is cleared
pub async fn report_metrics(provider: Arc<ThrottlingProvider>, interval: Duration, running: Arc<AtomicBool>) {
    let mut ticker = tokio::time::interval(interval);

    while running.load(Ordering::Relaxed) {
        ticker.tick().await;

        match provider.metrics() {
            Ok(metrics) => match serde_json::to_string(&metrics) {
                Ok(json) => info!("Metrics: {json}"),
                Err(err) => warn!("Failed to serialize metrics: {err}"),
            },
            Err(err) => warn!("Failed to capture metrics: {err}"),
        }
    }
}
