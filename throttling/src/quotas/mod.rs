//! Quota protocol and concrete quota strategies
//!
//! Quotas divide total capacity between callers. There are four categories,
//! each a small trait, evaluated by [`crate::QuotasChecker`] in a fixed order:
//!
//! 1. [`ExternalQuota`] - resource exhaustion outside of the throttler (runtime overload, load shedding)
//! 2. [`PriorityQuota`] - share of capacity per priority class
//! 3. [`ConsumerQuota`] - share of capacity per consumer id
//! 4. [`PropertiesQuota`] - share of capacity per arbitrary request property value
//!
//! Consumption passed to a quota is always the *post-increment* value: the
//! number of in-flight requests there would be if the current one was admitted.

use std::collections::HashMap;

use crate::properties::ThrottlingPriority;

pub mod consumer;
pub mod external;
pub mod priority;
pub mod property;

pub use consumer::ConsumersBlacklistQuota;
pub use consumer::ConsumersWhitelistQuota;
pub use consumer::MaximumFractionForAnyConsumerQuota;
pub use consumer::MaximumFractionForGivenConsumersQuota;
pub use external::DropRequestsQuota;
pub use external::RuntimeOverloadQuota;
pub use external::RuntimeOverloadQuotaOptions;
pub use priority::PriorityFractionQuota;
pub use property::MaximumFractionForGivenPropertyAnyValueQuota;
pub use property::MaximumFractionForGivenPropertyGivenValuesQuota;
pub use property::PropertyQuota;
pub use property::PropertyQuotaOptions;

/// Outcome of a single quota evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaVerdict {
    Allow,
    Reject(String),
}

impl QuotaVerdict {
    #[inline]
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaVerdict::Allow)
    }

    /// Allow when `allowed` holds, otherwise reject with a lazily built reason
    #[inline]
    pub fn allow_if(allowed: bool, reason: impl FnOnce() -> String) -> Self {
        if allowed { QuotaVerdict::Allow } else { QuotaVerdict::Reject(reason()) }
    }
}

/// Value of a request property together with its post-increment consumption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedByValue {
    pub value: String,
    pub consumed: i64,
}

/// Property key to consumption of the value carried by the current request
pub type PropertyConsumption = HashMap<String, ConsumedByValue>;

/// Quota on a resource outside of the throttler's own accounting
pub trait ExternalQuota: Send + Sync {
    fn check(&self) -> QuotaVerdict;
}

pub trait PriorityQuota: Send + Sync {
    fn check(&self, priority: ThrottlingPriority, consumed: i64, capacity_limit: i64) -> QuotaVerdict;
}

pub trait ConsumerQuota: Send + Sync {
    fn check(&self, consumer_id: &str, consumed: i64, capacity_limit: i64) -> QuotaVerdict;
}

pub trait PropertiesQuota: Send + Sync {
    fn check(&self, consumed: &PropertyConsumption, capacity_limit: i64) -> QuotaVerdict;
}

/// Share of total capacity represented by `consumed`
#[inline]
pub(crate) fn utilization(consumed: i64, capacity_limit: i64) -> f64 {
    consumed as f64 / capacity_limit.max(1) as f64
}
