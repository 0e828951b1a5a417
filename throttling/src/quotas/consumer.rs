use std::collections::HashMap;
use std::collections::HashSet;

use crate::error::Result;
use crate::error::check_fraction;
use crate::quotas::ConsumerQuota;
use crate::quotas::QuotaVerdict;
use crate::quotas::utilization;

/// Rejects every consumer on the list
#[derive(Debug, Clone)]
pub struct ConsumersBlacklistQuota {
    blacklist: HashSet<String>,
}

impl ConsumersBlacklistQuota {
    pub fn new<I, S>(blacklist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { blacklist: blacklist.into_iter().map(Into::into).collect() }
    }
}

impl ConsumerQuota for ConsumersBlacklistQuota {
    fn check(&self, consumer_id: &str, _consumed: i64, _capacity_limit: i64) -> QuotaVerdict {
        QuotaVerdict::allow_if(!self.blacklist.contains(consumer_id), || format!("Consumer '{consumer_id}' is blacklisted."))
    }
}

/// Admits only the consumers on the list
#[derive(Debug, Clone)]
pub struct ConsumersWhitelistQuota {
    whitelist: HashSet<String>,
}

impl ConsumersWhitelistQuota {
    pub fn new<I, S>(whitelist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { whitelist: whitelist.into_iter().map(Into::into).collect() }
    }
}

impl ConsumerQuota for ConsumersWhitelistQuota {
    fn check(&self, consumer_id: &str, _consumed: i64, _capacity_limit: i64) -> QuotaVerdict {
        QuotaVerdict::allow_if(self.whitelist.contains(consumer_id), || format!("Consumer '{consumer_id}' is not whitelisted."))
    }
}

/// Caps the share of capacity any single consumer may occupy
#[derive(Debug, Clone, Copy)]
pub struct MaximumFractionForAnyConsumerQuota {
    maximum_fraction: f64,
}

impl MaximumFractionForAnyConsumerQuota {
    pub fn new(maximum_fraction: f64) -> Result<Self> {
        Ok(Self { maximum_fraction: check_fraction("Maximum fraction", maximum_fraction)? })
    }

    #[inline]
    pub(crate) fn allows(&self, consumed: i64, capacity_limit: i64) -> bool {
        utilization(consumed, capacity_limit) <= self.maximum_fraction
    }

    pub(crate) fn maximum_fraction(&self) -> f64 {
        self.maximum_fraction
    }
}

impl ConsumerQuota for MaximumFractionForAnyConsumerQuota {
    fn check(&self, consumer_id: &str, consumed: i64, capacity_limit: i64) -> QuotaVerdict {
        QuotaVerdict::allow_if(self.allows(consumed, capacity_limit), || {
            format!(
                "Capacity utilization by consumer '{consumer_id}' ({:.2}) would exceed the configured limit ({:.2}).",
                utilization(consumed, capacity_limit),
                self.maximum_fraction
            )
        })
    }
}

/// Per-consumer capacity shares; consumers without an entry always pass
#[derive(Debug, Clone)]
pub struct MaximumFractionForGivenConsumersQuota {
    individual_quotas: HashMap<String, MaximumFractionForAnyConsumerQuota>,
}

impl MaximumFractionForGivenConsumersQuota {
    pub fn new<I, S>(maximum_fractions: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let individual_quotas = maximum_fractions
            .into_iter()
            .map(|(consumer, fraction)| Ok((consumer.into(), MaximumFractionForAnyConsumerQuota::new(fraction)?)))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self { individual_quotas })
    }
}

impl ConsumerQuota for MaximumFractionForGivenConsumersQuota {
    fn check(&self, consumer_id: &str, consumed: i64, capacity_limit: i64) -> QuotaVerdict {
        match self.individual_quotas.get(consumer_id) {
            Some(quota) => quota.check(consumer_id, consumed, capacity_limit),
            None => QuotaVerdict::Allow,
        }
    }
}
