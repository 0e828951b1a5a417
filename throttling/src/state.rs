use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;

use crate::properties::ThrottlingPriority;
use crate::properties::folded_chars;
use crate::quotas::ConsumerQuota;
use crate::quotas::ExternalQuota;
use crate::quotas::PriorityQuota;
use crate::quotas::PropertiesQuota;
use crate::semaphore::LifoSemaphore;

/// Number of in-flight requests attributed to one bucket
pub type Counter = Arc<AtomicI64>;

/// One quota category; `None` means every request passes it
pub type QuotaSet<Q> = ArcSwapOption<Vec<Arc<Q>>>;

const NEVER_REFRESH: u64 = u64::MAX;

/// Property value compared without regard to case, spelled the way it was first seen
#[derive(Debug, Clone)]
struct ValueKey(String);

impl ValueKey {
    fn new(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        folded_chars(&self.0).eq(folded_chars(&other.0))
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for c in folded_chars(&self.0) {
            c.hash(state);
        }
        state.write_u8(0xff);
    }
}

/// Shared throttling state: limits, quotas, the capacity semaphore and consumption counters
///
/// Fields are written only by the state actualizer, inside its single-flight
/// section; everything else reads them atomically. Limits and counters are
/// not updated as one unit, so readers may observe a mix of two refreshes.
pub struct ThrottlingState {
    pub(crate) semaphore: LifoSemaphore,

    enabled: AtomicBool,
    capacity_limit: AtomicI64,
    queue_limit: AtomicI64,
    refresh_period_nanos: AtomicU64,
    is_actual: AtomicBool,

    pub(crate) external_quotas: QuotaSet<dyn ExternalQuota>,
    pub(crate) priority_quotas: QuotaSet<dyn PriorityQuota>,
    pub(crate) consumer_quotas: QuotaSet<dyn ConsumerQuota>,
    pub(crate) properties_quotas: QuotaSet<dyn PropertiesQuota>,

    priority_counters: [Counter; 3],
    property_counters: DashMap<String, DashMap<ValueKey, Counter>>,
}

impl ThrottlingState {
    /// Fresh stale state with zero capacity
    pub fn new() -> Self {
        Self {
            semaphore: LifoSemaphore::empty(),
            enabled: AtomicBool::new(true),
            capacity_limit: AtomicI64::new(0),
            queue_limit: AtomicI64::new(0),
            refresh_period_nanos: AtomicU64::new(Duration::from_secs(5).as_nanos() as u64),
            is_actual: AtomicBool::new(false),
            external_quotas: ArcSwapOption::empty(),
            priority_quotas: ArcSwapOption::empty(),
            consumer_quotas: ArcSwapOption::empty(),
            properties_quotas: ArcSwapOption::empty(),
            priority_counters: Default::default(),
            property_counters: DashMap::new(),
        }
    }

    pub fn semaphore(&self) -> &LifoSemaphore {
        &self.semaphore
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    #[inline]
    pub fn capacity_limit(&self) -> i64 {
        self.capacity_limit.load(Ordering::Acquire)
    }

    #[inline]
    pub fn queue_limit(&self) -> i64 {
        self.queue_limit.load(Ordering::Acquire)
    }

    pub fn refresh_period(&self) -> Option<Duration> {
        match self.refresh_period_nanos.load(Ordering::Acquire) {
            NEVER_REFRESH => None,
            nanos => Some(Duration::from_nanos(nanos)),
        }
    }

    #[inline]
    pub fn is_actual(&self) -> bool {
        self.is_actual.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub(crate) fn set_capacity_limit(&self, capacity_limit: i64) {
        self.capacity_limit.store(capacity_limit, Ordering::Release);
    }

    pub(crate) fn set_queue_limit(&self, queue_limit: i64) {
        self.queue_limit.store(queue_limit, Ordering::Release);
    }

    pub(crate) fn set_refresh_period(&self, refresh_period: Option<Duration>) {
        let nanos = refresh_period.map_or(NEVER_REFRESH, |period| u64::try_from(period.as_nanos()).unwrap_or(NEVER_REFRESH - 1));
        self.refresh_period_nanos.store(nanos, Ordering::Release);
    }

    pub(crate) fn set_actual(&self, is_actual: bool) {
        self.is_actual.store(is_actual, Ordering::Release);
    }

    /// Number of capacity units currently held by admitted requests
    ///
    /// Derived from the semaphore, so it lags behind a capacity shrink until
    /// the shrink has been drained.
    #[inline]
    pub fn capacity_consumed(&self) -> i64 {
        (self.capacity_limit() - self.semaphore.current_count()).max(0)
    }

    #[inline]
    pub fn priority_counter(&self, priority: ThrottlingPriority) -> &Counter {
        &self.priority_counters[priority.index()]
    }

    /// In-flight requests carrying `key = value`, zero when there is no counter
    ///
    /// Values match regardless of case.
    pub fn consumption(&self, key: &str, value: &str) -> i64 {
        let value = ValueKey::new(value);
        self.property_counters
            .get(key)
            .and_then(|values| values.get(&value).map(|counter| counter.load(Ordering::Acquire)))
            .unwrap_or(0)
    }

    /// Counter for `key = value`, created on first use
    ///
    /// `key` must already be normalized to lowercase. Values that differ only
    /// in case share one counter.
    pub fn obtain_counter(&self, key: &str, value: &str) -> Counter {
        let value = ValueKey::new(value);
        let existing = self.property_counters.get(key).and_then(|values| values.get(&value).map(|counter| Arc::clone(counter.value())));
        if let Some(counter) = existing {
            return counter;
        }

        let values = self.property_counters.entry(key.to_string()).or_default();
        let counter = Arc::clone(values.entry(value).or_default().value());
        counter
    }

    /// Snapshot of every nonzero property counter
    pub fn property_consumption(&self) -> Vec<(String, Vec<(String, i64)>)> {
        self.property_counters
            .iter()
            .filter_map(|values| {
                let nonzero: Vec<(String, i64)> = values
                    .iter()
                    .map(|counter| (counter.key().0.clone(), counter.value().load(Ordering::Acquire)))
                    .filter(|(_, consumed)| *consumed != 0)
                    .collect();
                (!nonzero.is_empty()).then(|| (values.key().clone(), nonzero))
            })
            .collect()
    }

    /// Drop every property counter that is currently zero
    ///
    /// A request that raced with the removal keeps incrementing its own copy
    /// of the counter; the next request for that value gets a new one.
    pub(crate) fn prune_idle_counters(&self) -> usize {
        let mut pruned = 0;

        for values in self.property_counters.iter() {
            values.retain(|_, counter| {
                let idle = counter.load(Ordering::Acquire) == 0;
                pruned += usize::from(idle);
                !idle
            });
        }
        self.property_counters.retain(|_, values| !values.is_empty());

        pruned
    }
}

impl Default for ThrottlingState {
    fn default() -> Self {
        Self::new()
    }
}
