use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use serde::Serialize;

use crate::properties::CONSUMER_ID;
use crate::properties::ThrottlingPriority;
use crate::state::ThrottlingState;

/// Capacity and consumption figures of a throttling provider
///
/// Every figure is read separately, so a snapshot taken under load is not
/// guaranteed to add up exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThrottlingMetrics {
    pub capacity_limit: i64,
    pub remaining_capacity: i64,
    pub consumed_capacity: i64,
    pub queue_size: i64,
    pub queue_limit: i64,
    pub consumed_by_consumer_id: BTreeMap<String, i64>,
    pub consumed_by_priority: BTreeMap<ThrottlingPriority, i64>,
    pub consumed_by_property: BTreeMap<String, BTreeMap<String, i64>>,
}

impl ThrottlingMetrics {
    pub(crate) fn capture(state: &ThrottlingState) -> Self {
        let mut consumed_by_consumer_id = BTreeMap::new();
        let mut consumed_by_property = BTreeMap::new();

        for (key, values) in state.property_consumption() {
            if key == CONSUMER_ID {
                consumed_by_consumer_id.extend(values);
            } else {
                consumed_by_property.insert(key, values.into_iter().collect());
            }
        }

        let consumed_by_priority =
            ThrottlingPriority::ALL.into_iter().map(|priority| (priority, state.priority_counter(priority).load(Ordering::Acquire))).collect();

        Self {
            capacity_limit: state.capacity_limit(),
            remaining_capacity: state.semaphore().current_count(),
            consumed_capacity: state.capacity_consumed(),
            queue_size: state.semaphore().current_queue(),
            queue_limit: state.queue_limit(),
            consumed_by_consumer_id,
            consumed_by_priority,
            consumed_by_property,
        }
    }
}

/// Snapshot of the provider state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThrottlingInfo {
    pub enabled: bool,
    pub capacity_limit: i64,
    pub capacity_consumed: i64,
    pub queue_limit: i64,
    pub queue_size: i64,
    /// Property key to its busy values, most consuming first
    pub per_property_consumption: BTreeMap<String, Vec<(String, i64)>>,
}

impl ThrottlingInfo {
    pub(crate) fn capture(state: &ThrottlingState) -> Self {
        let per_property_consumption = state
            .property_consumption()
            .into_iter()
            .map(|(key, mut values)| {
                values.sort_by(|(left_value, left), (right_value, right)| right.cmp(left).then_with(|| left_value.cmp(right_value)));
                (key, values)
            })
            .collect();

        Self {
            enabled: state.enabled(),
            capacity_limit: state.capacity_limit(),
            capacity_consumed: state.capacity_consumed(),
            queue_limit: state.queue_limit(),
            queue_size: state.semaphore().current_queue(),
            per_property_consumption,
        }
    }
}
