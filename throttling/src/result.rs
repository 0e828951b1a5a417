use std::fmt;
use std::sync::atomic::Ordering;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde::Serialize;

use crate::semaphore::LifoSemaphore;
use crate::state::Counter;

/// Outcome of an admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ThrottlingStatus {
    Passed,
    RejectedDueToDeadline,
    RejectedDueToFullQueue,
    RejectedDueToExternalQuota,
    RejectedDueToConsumerQuota,
    RejectedDueToPriorityQuota,
}

impl ThrottlingStatus {
    pub const ALL: [ThrottlingStatus; 6] = [
        ThrottlingStatus::Passed,
        ThrottlingStatus::RejectedDueToDeadline,
        ThrottlingStatus::RejectedDueToFullQueue,
        ThrottlingStatus::RejectedDueToExternalQuota,
        ThrottlingStatus::RejectedDueToConsumerQuota,
        ThrottlingStatus::RejectedDueToPriorityQuota,
    ];
}

impl fmt::Display for ThrottlingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of [`crate::ThrottlingProvider::throttle`]
///
/// A passed result holds one unit of capacity until it is disposed or dropped.
#[derive(Debug)]
pub enum ThrottlingResult {
    /// Throttling is turned off; the request passes at no cost
    Disabled,
    Failed(FailedResult),
    Passed(PassedResult),
}

impl ThrottlingResult {
    pub fn status(&self) -> ThrottlingStatus {
        match self {
            ThrottlingResult::Disabled | ThrottlingResult::Passed(_) => ThrottlingStatus::Passed,
            ThrottlingResult::Failed(failed) => failed.status,
        }
    }

    #[inline]
    pub fn is_passed(&self) -> bool {
        self.status() == ThrottlingStatus::Passed
    }

    /// Time spent in the waiting queue
    pub fn wait_time(&self) -> Duration {
        match self {
            ThrottlingResult::Disabled => Duration::ZERO,
            ThrottlingResult::Failed(failed) => failed.wait_time,
            ThrottlingResult::Passed(passed) => passed.wait_time,
        }
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            ThrottlingResult::Failed(failed) => failed.reason.as_deref(),
            _ => None,
        }
    }

    /// Give the held capacity back; only the first call on a passed result has an effect
    pub fn dispose(&self) {
        if let ThrottlingResult::Passed(passed) = self {
            passed.dispose();
        }
    }

    pub fn info(&self) -> ThrottlingResultInfo {
        ThrottlingResultInfo { status: self.status(), wait_time: self.wait_time(), rejection_reason: self.rejection_reason().map(str::to_string) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedResult {
    pub status: ThrottlingStatus,
    pub wait_time: Duration,
    pub reason: Option<String>,
}

impl FailedResult {
    pub fn new(status: ThrottlingStatus, wait_time: Duration, reason: impl Into<String>) -> Self {
        Self { status, wait_time, reason: Some(reason.into()) }
    }
}

/// Capacity unit and consumption counters owned by a passed request
struct Lease {
    semaphore: LifoSemaphore,
    counters: Vec<Counter>,
}

impl Lease {
    fn release(&self) {
        for counter in &self.counters {
            counter.fetch_sub(1, Ordering::AcqRel);
        }
        self.semaphore.release();
    }
}

pub struct PassedResult {
    wait_time: Duration,
    lease: ArcSwapOption<Lease>,
}

impl PassedResult {
    /// Take ownership of an acquired unit and of counters that were already incremented
    pub(crate) fn new(semaphore: LifoSemaphore, counters: Vec<Counter>, wait_time: Duration) -> Self {
        Self { wait_time, lease: ArcSwapOption::from_pointee(Lease { semaphore, counters }) }
    }

    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    pub fn is_disposed(&self) -> bool {
        self.lease.load().is_none()
    }

    pub fn dispose(&self) {
        if let Some(lease) = self.lease.swap(None) {
            lease.release();
        }
    }
}

impl Drop for PassedResult {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for PassedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassedResult").field("wait_time", &self.wait_time).field("disposed", &self.is_disposed()).finish()
    }
}

/// Owned summary of a [`ThrottlingResult`], handed to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThrottlingResultInfo {
    pub status: ThrottlingStatus,
    pub wait_time: Duration,
    pub rejection_reason: Option<String>,
}

impl From<&ThrottlingResult> for ThrottlingResultInfo {
    fn from(result: &ThrottlingResult) -> Self {
        result.info()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicI64;

    use super::*;

    fn passed(semaphore: &LifoSemaphore, counters: &[Counter]) -> ThrottlingResult {
        assert!(semaphore.acquire().is_ready());
        for counter in counters {
            counter.fetch_add(1, Ordering::AcqRel);
        }
        ThrottlingResult::Passed(PassedResult::new(semaphore.clone(), counters.to_vec(), Duration::from_millis(3)))
    }

    #[test]
    fn test_disabled_result_passes() {
        let result = ThrottlingResult::Disabled;

        assert_eq!(result.status(), ThrottlingStatus::Passed);
        assert_eq!(result.wait_time(), Duration::ZERO);
        assert_eq!(result.rejection_reason(), None);
        result.dispose();
    }

    #[test]
    fn test_failed_result_carries_reason() {
        let result = ThrottlingResult::Failed(FailedResult::new(ThrottlingStatus::RejectedDueToDeadline, Duration::from_secs(1), "too late"));

        assert!(!result.is_passed());
        assert_eq!(result.rejection_reason(), Some("too late"));
        assert_eq!(
            result.info(),
            ThrottlingResultInfo { status: ThrottlingStatus::RejectedDueToDeadline, wait_time: Duration::from_secs(1), rejection_reason: Some("too late".to_string()) }
        );
    }

    #[test]
    fn test_double_dispose_releases_once() {
        let semaphore = LifoSemaphore::new(2).unwrap();
        let counters: Vec<Counter> = vec![Arc::new(AtomicI64::new(0)), Arc::new(AtomicI64::new(5))];

        let result = passed(&semaphore, &counters);
        assert_eq!(semaphore.current_count(), 1);
        assert_eq!(counters[1].load(Ordering::Relaxed), 6);

        result.dispose();
        result.dispose();

        assert_eq!(semaphore.current_count(), 2);
        assert_eq!(counters[0].load(Ordering::Relaxed), 0);
        assert_eq!(counters[1].load(Ordering::Relaxed), 5);

        drop(result);
        assert_eq!(semaphore.current_count(), 2);
    }

    #[test]
    fn test_drop_releases() {
        let semaphore = LifoSemaphore::new(1).unwrap();
        let counter: Counter = Arc::new(AtomicI64::new(0));

        {
            let result = passed(&semaphore, std::slice::from_ref(&counter));
            assert_eq!(result.wait_time(), Duration::from_millis(3));
            assert_eq!(semaphore.current_count(), 0);
        }

        assert_eq!(semaphore.current_count(), 1);
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_results_are_shareable() {
        fn check<T: Send + Sync>() {}
        check::<ThrottlingResult>();
        check::<Arc<ThrottlingResult>>();
    }

    #[test]
    fn test_concurrent_dispose_releases_once() {
        let semaphore = LifoSemaphore::new(1).unwrap();
        let counter: Counter = Arc::new(AtomicI64::new(0));
        let result = Arc::new(passed(&semaphore, std::slice::from_ref(&counter)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let result = Arc::clone(&result);
                std::thread::spawn(move || result.dispose())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(semaphore.current_count(), 1);
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }
}
