use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;
use tracing::warn;

use crate::checker::QuotasChecker;
use crate::config::ErrorCallback;
use crate::config::ThrottlingConfiguration;
use crate::error::Result;
use crate::error::ThrottlingError;
use crate::metrics::ThrottlingInfo;
use crate::metrics::ThrottlingMetrics;
use crate::observer::ObserverRegistry;
use crate::observer::Subscription;
use crate::observer::ThrottlingEvent;
use crate::observer::ThrottlingObserver;
use crate::properties::ThrottlingPriority;
use crate::properties::ThrottlingProperties;
use crate::result::FailedResult;
use crate::result::PassedResult;
use crate::result::ThrottlingResult;
use crate::result::ThrottlingStatus;
use crate::state::Counter;
use crate::state::ThrottlingState;
use crate::state_provider::StateProvider;
use crate::state_provider::ThrottlingStateProvider;

/// Admission control entry point
///
/// Every unit of work asks [`ThrottlingProvider::throttle`] for admission and
/// proceeds only when the result has passed. The passed result holds one unit
/// of capacity until it is disposed or dropped.
///
/// A request is checked in this order:
/// 1. throttling enabled, otherwise it passes at no cost
/// 2. queue limit, `Sheddable` requests are rejected whenever there is a queue
/// 3. quotas, as if the request was already admitted
/// 4. capacity, waiting in the LIFO queue when there is none left
///
/// Requests that had to wait are checked against their deadline and the
/// quotas once more before they pass.
pub struct ThrottlingProvider {
    state_provider: Box<dyn StateProvider>,
    checker: QuotasChecker,
    observers: Arc<ObserverRegistry>,
    error_callback: Option<ErrorCallback>,
}

impl ThrottlingProvider {
    pub fn new(configuration: ThrottlingConfiguration) -> Self {
        let error_callback = configuration.error_callback.clone();
        Self::with_state_provider(Box::new(ThrottlingStateProvider::new(configuration)), error_callback)
    }

    pub fn with_state_provider(state_provider: Box<dyn StateProvider>, error_callback: Option<ErrorCallback>) -> Self {
        Self { state_provider, checker: QuotasChecker, observers: Arc::new(ObserverRegistry::new()), error_callback }
    }

    /// Ask for admission of a request with the given properties
    ///
    /// Errors only when the state could not be refreshed from configuration;
    /// overload is always reported through the result.
    pub async fn throttle(&self, properties: &ThrottlingProperties, deadline: Option<Duration>, priority: ThrottlingPriority) -> Result<ThrottlingResult> {
        let state = self.state_provider.obtain_state()?;
        let observed = state.enabled() && self.observers.has_observers();

        if observed {
            self.publish_event(&state, properties, priority);
        }

        let result = self.throttle_with_state(&state, properties, deadline, priority).await;

        if observed {
            self.observers.publish_result(&result.info(), |error| self.report_observer_error(error));
        }

        Ok(result)
    }

    /// Ask for admission of a request attributed to `consumer_id`
    pub async fn throttle_consumer(&self, consumer_id: &str, deadline: Option<Duration>, priority: ThrottlingPriority) -> Result<ThrottlingResult> {
        self.throttle(&ThrottlingProperties::for_consumer(consumer_id), deadline, priority).await
    }

    pub fn metrics(&self) -> Result<ThrottlingMetrics> {
        let state = self.state_provider.obtain_state()?;
        Ok(ThrottlingMetrics::capture(&state))
    }

    pub fn info(&self) -> Result<ThrottlingInfo> {
        let state = self.state_provider.obtain_state()?;
        Ok(ThrottlingInfo::capture(&state))
    }

    /// Receive admission events and results until the subscription is dropped
    pub fn subscribe(&self, observer: Arc<dyn ThrottlingObserver>) -> Subscription {
        self.observers.subscribe(observer)
    }

    async fn throttle_with_state(
        &self,
        state: &ThrottlingState,
        properties: &ThrottlingProperties,
        deadline: Option<Duration>,
        priority: ThrottlingPriority,
    ) -> ThrottlingResult {
        if !state.enabled() {
            return ThrottlingResult::Disabled;
        }

        if let Err(reason) = check_queue(state, priority) {
            trace!(%priority, reason, "Request rejected by queue limit");
            return ThrottlingResult::Failed(FailedResult::new(ThrottlingStatus::RejectedDueToFullQueue, Duration::ZERO, reason));
        }

        if let Err(rejection) = self.checker.check(state, properties, priority) {
            trace!(%priority, status = %rejection.status, reason = %rejection.reason, "Request rejected by quota");
            return ThrottlingResult::Failed(FailedResult::new(rejection.status, Duration::ZERO, rejection.reason));
        }

        let counters = build_counters(state, properties, priority);

        let acquire = state.semaphore.acquire();
        if acquire.is_ready() {
            increment(&counters);
            trace!(%priority, "Request passed immediately");
            return ThrottlingResult::Passed(PassedResult::new(state.semaphore.clone(), counters, Duration::ZERO));
        }

        let wait_start = Instant::now();
        acquire.await;
        let wait_time = wait_start.elapsed();

        if let Some(deadline) = deadline.filter(|deadline| wait_time >= *deadline) {
            state.semaphore.release();
            trace!(%priority, ?wait_time, ?deadline, "Request rejected by deadline");
            return ThrottlingResult::Failed(FailedResult::new(
                ThrottlingStatus::RejectedDueToDeadline,
                wait_time,
                format!("Queue wait ({wait_time:?}) was longer than request deadline ({deadline:?})."),
            ));
        }

        if let Err(rejection) = self.checker.check(state, properties, priority) {
            state.semaphore.release();
            trace!(%priority, ?wait_time, status = %rejection.status, reason = %rejection.reason, "Request rejected by quota after waiting");
            return ThrottlingResult::Failed(FailedResult::new(rejection.status, wait_time, rejection.reason));
        }

        increment(&counters);
        trace!(%priority, ?wait_time, "Request passed after waiting");
        ThrottlingResult::Passed(PassedResult::new(state.semaphore.clone(), counters, wait_time))
    }

    fn publish_event(&self, state: &ThrottlingState, properties: &ThrottlingProperties, priority: ThrottlingPriority) {
        let distinct = properties.distinct();
        let event = ThrottlingEvent {
            capacity_limit: state.capacity_limit(),
            capacity_consumed: state.capacity_consumed(),
            queue_limit: state.queue_limit(),
            queue_size: state.semaphore.current_queue(),
            priority,
            properties: distinct.iter().map(|property| (property.key().to_string(), property.value().to_string())).collect(),
            property_consumption: distinct.iter().map(|property| (property.key().to_string(), state.consumption(property.key(), property.value()))).collect(),
        };

        self.observers.publish_event(&event, |error| self.report_observer_error(error));
    }

    fn report_observer_error(&self, error: ThrottlingError) {
        warn!(%error, "Throttling observer failed");
        if let Some(callback) = &self.error_callback {
            callback(&error);
        }
    }
}

fn check_queue(state: &ThrottlingState, priority: ThrottlingPriority) -> std::result::Result<(), &'static str> {
    let queue_size = state.semaphore.current_queue();

    if priority == ThrottlingPriority::Sheddable && queue_size > 0 {
        return Err("Sheddable requests are not queued.");
    }

    let queue_limit = state.queue_limit();
    if queue_limit > queue_size {
        return Ok(());
    }

    // Without a queue a request may still take a free unit right away
    if queue_limit == 0 && state.semaphore.current_count() > 0 {
        return Ok(());
    }

    Err("Wait queue is full.")
}

fn build_counters(state: &ThrottlingState, properties: &ThrottlingProperties, priority: ThrottlingPriority) -> Vec<Counter> {
    let distinct = properties.distinct();
    let mut counters = Vec::with_capacity(distinct.len() + 1);

    counters.extend(distinct.into_iter().map(|property| state.obtain_counter(property.key(), property.value())));
    counters.push(Arc::clone(state.priority_counter(priority)));

    counters
}

#[inline]
fn increment(counters: &[Counter]) {
    for counter in counters {
        counter.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::actualizer::StateActualizer;
    use crate::config::ThrottlingEssentials;
    use crate::properties::CONSUMER_ID;
    use crate::properties::Property;
    use crate::quotas::ExternalQuota;
    use crate::quotas::QuotaVerdict;
    use crate::result::ThrottlingResultInfo;

    const CAPACITY: i64 = 5;
    const QUEUE_LIMIT: i64 = 10;

    struct FixedState(Arc<ThrottlingState>);

    impl StateProvider for FixedState {
        fn obtain_state(&self) -> Result<Arc<ThrottlingState>> {
            Ok(Arc::clone(&self.0))
        }
    }

    struct Toggle(Arc<Mutex<QuotaVerdict>>);

    impl ExternalQuota for Toggle {
        fn check(&self) -> QuotaVerdict {
            self.0.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ThrottlingEvent>>,
        results: Mutex<Vec<ThrottlingResultInfo>>,
    }

    impl ThrottlingObserver for Recorder {
        fn on_event(&self, event: &ThrottlingEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn on_result(&self, result: &ThrottlingResultInfo) -> Result<()> {
            self.results.lock().unwrap().push(result.clone());
            Ok(())
        }
    }

    struct Fixture {
        state: Arc<ThrottlingState>,
        provider: ThrottlingProvider,
        verdict: Arc<Mutex<QuotaVerdict>>,
        recorder: Arc<Recorder>,
        errors: Arc<AtomicUsize>,
        _subscription: Subscription,
    }

    fn fixture() -> Fixture {
        let state = Arc::new(ThrottlingState::new());
        state.set_capacity_limit(CAPACITY);
        state.set_queue_limit(QUEUE_LIMIT);
        state.set_actual(true);
        state.semaphore().release_many(CAPACITY).unwrap();

        let verdict = Arc::new(Mutex::new(QuotaVerdict::Allow));
        let external: Vec<Arc<dyn ExternalQuota>> = vec![Arc::new(Toggle(Arc::clone(&verdict)))];
        state.external_quotas.store(Some(Arc::new(external)));

        let errors = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&errors);
        let callback: ErrorCallback = Arc::new(move |_: &ThrottlingError| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let provider = ThrottlingProvider::with_state_provider(Box::new(FixedState(Arc::clone(&state))), Some(callback));
        let recorder = Arc::new(Recorder::default());
        let subscription = provider.subscribe(recorder.clone());

        Fixture { state, provider, verdict, recorder, errors, _subscription: subscription }
    }

    fn properties() -> ThrottlingProperties {
        ThrottlingProperties::new(vec![Property::new("foo", "bar"), Property::consumer_id("svc")])
    }

    impl Fixture {
        async fn throttle(&self) -> ThrottlingResult {
            self.provider.throttle(&properties(), None, ThrottlingPriority::Ordinary).await.unwrap()
        }

        async fn drain_capacity(&self) -> Vec<ThrottlingResult> {
            let mut results = Vec::new();
            for _ in 0..CAPACITY {
                results.push(self.throttle().await);
            }
            results
        }

        fn reject_quota(&self) {
            *self.verdict.lock().unwrap() = QuotaVerdict::Reject("quota exhausted".to_string());
        }

        fn consumed(&self) -> i64 {
            self.state.consumption("foo", "bar")
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_disabled_state_passes_without_events() {
        let fixture = fixture();
        fixture.state.set_enabled(false);

        let result = fixture.throttle().await;

        assert!(matches!(result, ThrottlingResult::Disabled));
        assert_eq!(result.status(), ThrottlingStatus::Passed);
        assert!(fixture.recorder.events.lock().unwrap().is_empty());
        assert!(fixture.recorder.results.lock().unwrap().is_empty());
        assert_eq!(fixture.state.semaphore().current_count(), CAPACITY);
    }

    #[tokio::test]
    async fn test_passes_when_all_restrictions_are_met() {
        let fixture = fixture();

        let result = fixture.throttle().await;

        assert_eq!(result.status(), ThrottlingStatus::Passed);
        assert_eq!(result.wait_time(), Duration::ZERO);
        assert_eq!(fixture.state.semaphore().current_count(), CAPACITY - 1);
        assert_eq!(fixture.consumed(), 1);
        assert_eq!(fixture.state.consumption(CONSUMER_ID, "svc"), 1);
        assert_eq!(fixture.state.priority_counter(ThrottlingPriority::Ordinary).load(Ordering::SeqCst), 1);

        result.dispose();
        assert_eq!(fixture.state.semaphore().current_count(), CAPACITY);
        assert_eq!(fixture.consumed(), 0);
        assert_eq!(fixture.state.priority_counter(ThrottlingPriority::Ordinary).load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_quota_rejection_has_no_side_effects() {
        let fixture = fixture();
        fixture.reject_quota();

        let result = fixture.throttle().await;

        assert_eq!(result.status(), ThrottlingStatus::RejectedDueToExternalQuota);
        assert_eq!(result.rejection_reason(), Some("quota exhausted"));
        assert_eq!(fixture.state.semaphore().current_count(), CAPACITY);
        assert_eq!(fixture.consumed(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_is_rejected() {
        let fixture = Arc::new(fixture());
        let _held = fixture.drain_capacity().await;

        let mut waiters = Vec::new();
        for _ in 0..QUEUE_LIMIT {
            let fixture = Arc::clone(&fixture);
            waiters.push(tokio::spawn(async move { fixture.throttle().await.status() }));
        }
        settle().await;
        assert_eq!(fixture.state.semaphore().current_queue(), QUEUE_LIMIT);

        let result = fixture.throttle().await;
        assert_eq!(result.status(), ThrottlingStatus::RejectedDueToFullQueue);
        assert_eq!(result.rejection_reason(), Some("Wait queue is full."));
        assert_eq!(fixture.state.semaphore().current_queue(), QUEUE_LIMIT);
        assert_eq!(fixture.consumed(), CAPACITY);

        for waiter in waiters {
            waiter.abort();
        }
    }

    #[tokio::test]
    async fn test_zero_queue_limit_admits_with_free_capacity() {
        let fixture = fixture();
        fixture.state.set_queue_limit(0);

        let results = fixture.drain_capacity().await;
        assert!(results.iter().all(ThrottlingResult::is_passed));

        let result = fixture.throttle().await;
        assert_eq!(result.status(), ThrottlingStatus::RejectedDueToFullQueue);
    }

    #[tokio::test]
    async fn test_sheddable_is_rejected_when_queue_exists() {
        let fixture = Arc::new(fixture());
        let _held = fixture.drain_capacity().await;

        let waiting = {
            let fixture = Arc::clone(&fixture);
            tokio::spawn(async move { fixture.throttle().await.status() })
        };
        settle().await;

        let result = fixture.provider.throttle(&properties(), None, ThrottlingPriority::Sheddable).await.unwrap();
        assert_eq!(result.status(), ThrottlingStatus::RejectedDueToFullQueue);
        assert_eq!(fixture.state.semaphore().current_queue(), 1);

        waiting.abort();
    }

    #[tokio::test]
    async fn test_waiter_passes_when_capacity_frees_up() {
        let fixture = Arc::new(fixture());
        let mut held = fixture.drain_capacity().await;

        let waiting = {
            let fixture = Arc::clone(&fixture);
            tokio::spawn(async move { fixture.throttle().await })
        };
        settle().await;
        assert_eq!(fixture.consumed(), CAPACITY);

        held.pop().unwrap().dispose();
        let result = waiting.await.unwrap();

        assert_eq!(result.status(), ThrottlingStatus::Passed);
        assert_eq!(fixture.consumed(), CAPACITY);
        assert_eq!(fixture.state.semaphore().current_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_rejection_returns_permit() {
        let fixture = Arc::new(fixture());
        let mut held = fixture.drain_capacity().await;

        let waiting = {
            let fixture = Arc::clone(&fixture);
            tokio::spawn(async move { fixture.provider.throttle(&properties(), Some(Duration::from_millis(100)), ThrottlingPriority::Ordinary).await.unwrap() })
        };
        settle().await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        held.pop().unwrap().dispose();
        let result = waiting.await.unwrap();

        assert_eq!(result.status(), ThrottlingStatus::RejectedDueToDeadline);
        assert!(result.wait_time() >= Duration::from_millis(100));
        assert_eq!(fixture.state.semaphore().current_count(), 1);
        assert_eq!(fixture.consumed(), CAPACITY - 1);
    }

    #[tokio::test]
    async fn test_quota_recheck_after_waiting_returns_permit() {
        let fixture = Arc::new(fixture());
        let mut held = fixture.drain_capacity().await;

        let waiting = {
            let fixture = Arc::clone(&fixture);
            tokio::spawn(async move { fixture.throttle().await })
        };
        settle().await;

        fixture.reject_quota();
        held.pop().unwrap().dispose();
        let result = waiting.await.unwrap();

        assert_eq!(result.status(), ThrottlingStatus::RejectedDueToExternalQuota);
        assert_eq!(fixture.state.semaphore().current_count(), 1);
        assert_eq!(fixture.consumed(), CAPACITY - 1);
    }

    #[tokio::test]
    async fn test_observers_receive_events_and_results() {
        let fixture = fixture();
        fixture.state.obtain_counter("foo", "bar").fetch_add(2, Ordering::SeqCst);

        let _result = fixture.throttle().await;

        let events = fixture.recorder.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].capacity_limit, CAPACITY);
        assert_eq!(events[0].queue_limit, QUEUE_LIMIT);
        assert_eq!(events[0].properties, vec![("foo".to_string(), "bar".to_string()), (CONSUMER_ID.to_string(), "svc".to_string())]);
        assert_eq!(events[0].property_consumption, vec![("foo".to_string(), 2), (CONSUMER_ID.to_string(), 0)]);

        let results = fixture.recorder.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ThrottlingStatus::Passed);
    }

    #[tokio::test]
    async fn test_observer_errors_go_to_callback() {
        struct Failing;

        impl ThrottlingObserver for Failing {
            fn on_event(&self, _event: &ThrottlingEvent) -> Result<()> {
                Err(ThrottlingError::Observer("event sink closed".to_string()))
            }
        }

        let fixture = fixture();
        let _failing = fixture.provider.subscribe(Arc::new(Failing));

        let result = fixture.throttle().await;

        assert!(result.is_passed());
        assert_eq!(fixture.errors.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.recorder.results.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_and_info() {
        let fixture = fixture();
        let _held = fixture.throttle().await;

        let metrics = fixture.provider.metrics().unwrap();
        assert_eq!(metrics.capacity_limit, CAPACITY);
        assert_eq!(metrics.remaining_capacity, CAPACITY - 1);
        assert_eq!(metrics.consumed_capacity, 1);
        assert_eq!(metrics.consumed_by_consumer_id["svc"], 1);
        assert_eq!(metrics.consumed_by_priority[&ThrottlingPriority::Ordinary], 1);
        assert_eq!(metrics.consumed_by_property["foo"]["bar"], 1);

        let info = fixture.provider.info().unwrap();
        assert!(info.enabled);
        assert_eq!(info.capacity_consumed, 1);
        assert_eq!(info.queue_size, 0);
    }

    #[tokio::test]
    async fn test_throttle_consumer() {
        let fixture = fixture();

        let result = fixture.provider.throttle_consumer("billing", None, ThrottlingPriority::Critical).await.unwrap();

        assert!(result.is_passed());
        assert_eq!(fixture.state.consumption(CONSUMER_ID, "billing"), 1);
        assert_eq!(fixture.state.priority_counter(ThrottlingPriority::Critical).load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_actualization_failure_propagates() {
        struct Broken;

        impl StateActualizer for Broken {
            fn actualize(&self, _state: &ThrottlingState) -> Result<()> {
                Err(ThrottlingError::InvalidConfig("bad fraction".to_string()))
            }
        }

        let provider = ThrottlingProvider::with_state_provider(Box::new(ThrottlingStateProvider::with_actualizer(Box::new(Broken), None)), None);

        let error = provider.throttle(&ThrottlingProperties::empty(), None, ThrottlingPriority::Ordinary).await.unwrap_err();
        assert_eq!(error, ThrottlingError::InvalidConfig("bad fraction".to_string()));
    }

    #[tokio::test]
    async fn test_configured_provider() {
        let provider = ThrottlingProvider::new(
            ThrottlingConfiguration::builder().essentials(ThrottlingEssentials { capacity_limit: Some(1), queue_limit: 0, ..Default::default() }).build(),
        );

        let first = provider.throttle(&ThrottlingProperties::empty(), None, ThrottlingPriority::Ordinary).await.unwrap();
        let second = provider.throttle(&ThrottlingProperties::empty(), None, ThrottlingPriority::Ordinary).await.unwrap();

        assert!(first.is_passed());
        assert_eq!(second.status(), ThrottlingStatus::RejectedDueToFullQueue);
    }
}
