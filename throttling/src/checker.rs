use std::sync::atomic::Ordering;

use crate::properties::CONSUMER_ID;
use crate::properties::ThrottlingPriority;
use crate::properties::ThrottlingProperties;
use crate::quotas::ConsumedByValue;
use crate::quotas::PropertyConsumption;
use crate::quotas::QuotaVerdict;
use crate::result::ThrottlingStatus;
use crate::state::ThrottlingState;

/// First quota that rejected a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaRejection {
    pub status: ThrottlingStatus,
    pub reason: String,
}

/// Evaluates the quota categories of a state against a request
///
/// Categories run in a fixed order: external, priority, consumer, properties.
/// Every quota sees consumption as if the request had already been admitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotasChecker;

impl QuotasChecker {
    pub fn check(&self, state: &ThrottlingState, properties: &ThrottlingProperties, priority: ThrottlingPriority) -> Result<(), QuotaRejection> {
        check_external(state)?;
        check_priority(state, priority)?;

        if properties.is_empty() {
            return Ok(());
        }

        check_consumer(state, properties)?;
        check_properties(state, properties)
    }
}

#[inline]
fn reject(status: ThrottlingStatus, verdict: QuotaVerdict) -> Result<(), QuotaRejection> {
    match verdict {
        QuotaVerdict::Allow => Ok(()),
        QuotaVerdict::Reject(reason) => Err(QuotaRejection { status, reason }),
    }
}

fn check_external(state: &ThrottlingState) -> Result<(), QuotaRejection> {
    let quotas = state.external_quotas.load();
    let Some(quotas) = quotas.as_deref() else {
        return Ok(());
    };

    quotas.iter().try_for_each(|quota| reject(ThrottlingStatus::RejectedDueToExternalQuota, quota.check()))
}

fn check_priority(state: &ThrottlingState, priority: ThrottlingPriority) -> Result<(), QuotaRejection> {
    let quotas = state.priority_quotas.load();
    let Some(quotas) = quotas.as_deref() else {
        return Ok(());
    };

    let consumed = state.priority_counter(priority).load(Ordering::Acquire) + 1;
    let capacity_limit = state.capacity_limit();

    quotas.iter().try_for_each(|quota| reject(ThrottlingStatus::RejectedDueToPriorityQuota, quota.check(priority, consumed, capacity_limit)))
}

fn check_consumer(state: &ThrottlingState, properties: &ThrottlingProperties) -> Result<(), QuotaRejection> {
    let quotas = state.consumer_quotas.load();
    let Some(quotas) = quotas.as_deref() else {
        return Ok(());
    };
    let Some(consumer) = properties.get(CONSUMER_ID) else {
        return Ok(());
    };

    let consumer_id = consumer.value();
    let consumed = state.consumption(CONSUMER_ID, consumer_id) + 1;
    let capacity_limit = state.capacity_limit();

    quotas.iter().try_for_each(|quota| reject(ThrottlingStatus::RejectedDueToConsumerQuota, quota.check(consumer_id, consumed, capacity_limit)))
}

fn check_properties(state: &ThrottlingState, properties: &ThrottlingProperties) -> Result<(), QuotaRejection> {
    let quotas = state.properties_quotas.load();
    let Some(quotas) = quotas.as_deref() else {
        return Ok(());
    };

    let consumed: PropertyConsumption = properties
        .distinct()
        .into_iter()
        .map(|property| {
            let consumed = state.consumption(property.key(), property.value()) + 1;
            (property.key().to_string(), ConsumedByValue { value: property.value().to_string(), consumed })
        })
        .collect();
    let capacity_limit = state.capacity_limit();

    // Property quotas share the consumer status: they subdivide capacity between callers
    quotas.iter().try_for_each(|quota| reject(ThrottlingStatus::RejectedDueToConsumerQuota, quota.check(&consumed, capacity_limit)))
}
