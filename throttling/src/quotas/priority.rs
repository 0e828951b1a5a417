use crate::error::Result;
use crate::error::check_fraction;
use crate::properties::ThrottlingPriority;
use crate::quotas::PriorityQuota;
use crate::quotas::QuotaVerdict;
use crate::quotas::utilization;

/// Caps the share of capacity a single priority class may occupy
///
/// Requests of other priorities always pass.
#[derive(Debug, Clone)]
pub struct PriorityFractionQuota {
    priority: ThrottlingPriority,
    maximum_fraction: f64,
}

impl PriorityFractionQuota {
    pub fn new(priority: ThrottlingPriority, maximum_fraction: f64) -> Result<Self> {
        Ok(Self { priority, maximum_fraction: check_fraction("Maximum fraction", maximum_fraction)? })
    }

    pub fn ordinary(maximum_fraction: f64) -> Result<Self> {
        Self::new(ThrottlingPriority::Ordinary, maximum_fraction)
    }

    pub fn sheddable(maximum_fraction: f64) -> Result<Self> {
        Self::new(ThrottlingPriority::Sheddable, maximum_fraction)
    }
}

impl PriorityQuota for PriorityFractionQuota {
    fn check(&self, priority: ThrottlingPriority, consumed: i64, capacity_limit: i64) -> QuotaVerdict {
        if priority != self.priority {
            return QuotaVerdict::Allow;
        }

        let utilization = utilization(consumed, capacity_limit);
        QuotaVerdict::allow_if(utilization <= self.maximum_fraction, || {
            format!("Capacity utilization by {priority} requests ({utilization:.2}) would exceed the configured limit ({:.2}).", self.maximum_fraction)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_other_priorities_pass() {
        let quota = PriorityFractionQuota::sheddable(0.0).unwrap();

        assert!(quota.check(ThrottlingPriority::Critical, 100, 10).is_allowed());
        assert!(quota.check(ThrottlingPriority::Ordinary, 100, 10).is_allowed());
        assert!(!quota.check(ThrottlingPriority::Sheddable, 1, 10).is_allowed());
    }

    #[test]
    fn test_fraction_boundary() {
        let quota = PriorityFractionQuota::ordinary(0.5).unwrap();

        assert!(quota.check(ThrottlingPriority::Ordinary, 5, 10).is_allowed());
        assert!(!quota.check(ThrottlingPriority::Ordinary, 6, 10).is_allowed());
    }

    #[test]
    fn test_invalid_fraction() {
        assert!(PriorityFractionQuota::ordinary(1.5).is_err());
        assert!(PriorityFractionQuota::sheddable(-0.5).is_err());
    }
}
