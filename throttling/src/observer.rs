use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::error::Result;
use crate::error::ThrottlingError;
use crate::properties::ThrottlingPriority;
use crate::result::ThrottlingResultInfo;

/// Load observed right before a request enters admission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThrottlingEvent {
    pub capacity_limit: i64,
    pub capacity_consumed: i64,
    pub queue_limit: i64,
    pub queue_size: i64,
    pub priority: ThrottlingPriority,
    /// Request properties, duplicates collapsed to their last occurrence
    pub properties: Vec<(String, String)>,
    /// Current consumption of each request property value
    pub property_consumption: Vec<(String, i64)>,
}

/// Receives admission events and results
///
/// Called inline on the admission path, so implementations should be quick.
/// Errors are reported to the configured error callback and do not affect admission.
pub trait ThrottlingObserver: Send + Sync {
    fn on_event(&self, _event: &ThrottlingEvent) -> Result<()> {
        Ok(())
    }

    fn on_result(&self, _result: &ThrottlingResultInfo) -> Result<()> {
        Ok(())
    }
}

type Observers = Vec<(u64, Arc<dyn ThrottlingObserver>)>;

/// Copy-on-write list of subscribed observers
pub(crate) struct ObserverRegistry {
    observers: ArcSwap<Observers>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub(crate) fn new() -> Self {
        Self { observers: ArcSwap::from_pointee(Vec::new()), next_id: AtomicU64::new(0) }
    }

    pub(crate) fn subscribe(self: &Arc<Self>, observer: Arc<dyn ThrottlingObserver>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.rcu(|observers| {
            let mut observers = Observers::clone(observers);
            observers.push((id, Arc::clone(&observer)));
            observers
        });

        Subscription { id, registry: Arc::downgrade(self) }
    }

    fn unsubscribe(&self, id: u64) {
        self.observers.rcu(|observers| observers.iter().filter(|(existing, _)| *existing != id).cloned().collect::<Observers>());
    }

    #[inline]
    pub(crate) fn has_observers(&self) -> bool {
        !self.observers.load().is_empty()
    }

    pub(crate) fn publish_event(&self, event: &ThrottlingEvent, on_error: impl Fn(ThrottlingError)) {
        for (_, observer) in self.observers.load().iter() {
            if let Err(error) = observer.on_event(event) {
                on_error(error);
            }
        }
    }

    pub(crate) fn publish_result(&self, result: &ThrottlingResultInfo, on_error: impl Fn(ThrottlingError)) {
        for (_, observer) in self.observers.load().iter() {
            if let Err(error) = observer.on_result(result) {
                on_error(error);
            }
        }
    }
}

/// Keeps an observer subscribed until dropped
#[must_use = "the observer is unsubscribed when the subscription is dropped"]
pub struct Subscription {
    id: u64,
    registry: Weak<ObserverRegistry>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}
