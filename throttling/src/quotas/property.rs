use std::collections::HashMap;
use std::collections::HashSet;

use serde::Deserialize;

use crate::error::Result;
use crate::error::check_fraction;
use crate::properties::fold_case;
use crate::quotas::MaximumFractionForAnyConsumerQuota;
use crate::quotas::PropertiesQuota;
use crate::quotas::PropertyConsumption;
use crate::quotas::QuotaVerdict;
use crate::quotas::utilization;

/// Caps the share of capacity any single value of one property may occupy
#[derive(Debug, Clone)]
pub struct MaximumFractionForGivenPropertyAnyValueQuota {
    key: String,
    fraction_quota: MaximumFractionForAnyConsumerQuota,
}

impl MaximumFractionForGivenPropertyAnyValueQuota {
    pub fn new(key: impl Into<String>, maximum_fraction: f64) -> Result<Self> {
        Ok(Self { key: normalize_key(key), fraction_quota: MaximumFractionForAnyConsumerQuota::new(maximum_fraction)? })
    }
}

impl PropertiesQuota for MaximumFractionForGivenPropertyAnyValueQuota {
    fn check(&self, consumed: &PropertyConsumption, capacity_limit: i64) -> QuotaVerdict {
        let Some(entry) = consumed.get(&self.key) else {
            return QuotaVerdict::Allow;
        };

        QuotaVerdict::allow_if(self.fraction_quota.allows(entry.consumed, capacity_limit), || {
            utilization_reason(&self.key, &entry.value, utilization(entry.consumed, capacity_limit), self.fraction_quota.maximum_fraction())
        })
    }
}

/// Per-value capacity shares of one property; values without an entry always pass
#[derive(Debug, Clone)]
pub struct MaximumFractionForGivenPropertyGivenValuesQuota {
    key: String,
    individual_quotas: HashMap<String, MaximumFractionForAnyConsumerQuota>,
}

impl MaximumFractionForGivenPropertyGivenValuesQuota {
    pub fn new<I, S>(key: impl Into<String>, maximum_fractions: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let individual_quotas = maximum_fractions
            .into_iter()
            .map(|(value, fraction)| Ok((value.into(), MaximumFractionForAnyConsumerQuota::new(fraction)?)))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self { key: normalize_key(key), individual_quotas })
    }
}

impl PropertiesQuota for MaximumFractionForGivenPropertyGivenValuesQuota {
    fn check(&self, consumed: &PropertyConsumption, capacity_limit: i64) -> QuotaVerdict {
        let Some(entry) = consumed.get(&self.key) else {
            return QuotaVerdict::Allow;
        };
        let Some(quota) = self.individual_quotas.get(&entry.value) else {
            return QuotaVerdict::Allow;
        };

        QuotaVerdict::allow_if(quota.allows(entry.consumed, capacity_limit), || {
            utilization_reason(&self.key, &entry.value, utilization(entry.consumed, capacity_limit), quota.maximum_fraction())
        })
    }
}

/// Options of a [`PropertyQuota`]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PropertyQuotaOptions {
    /// Values that are always rejected. Takes precedence over everything else.
    pub blacklist: Vec<String>,

    /// Values that are always admitted. Takes precedence over the limits.
    pub whitelist: Vec<String>,

    /// Maximum share of total capacity any single value may occupy, unlimited when `None`
    pub global_limit: Option<f64>,

    /// Per-value overrides of `global_limit`
    pub individual_limits: HashMap<String, f64>,
}

impl Default for PropertyQuotaOptions {
    fn default() -> Self {
        Self { blacklist: Vec::new(), whitelist: Vec::new(), global_limit: Some(0.75), individual_limits: HashMap::new() }
    }
}

/// General-purpose quota for one property, compiled from [`PropertyQuotaOptions`]
///
/// Evaluation order: absent property passes, blacklisted value rejects,
/// whitelisted value passes, then utilization is compared against the
/// per-value limit or the global one.
#[derive(Debug, Clone)]
pub struct PropertyQuota {
    property: String,
    blacklist: HashSet<String>,
    whitelist: HashSet<String>,
    global_limit: f64,
    individual_limits: HashMap<String, f64>,
}

impl PropertyQuota {
    pub fn new(property: impl Into<String>, options: &PropertyQuotaOptions) -> Result<Self> {
        let global_limit = match options.global_limit {
            Some(limit) => check_fraction("Global limit", limit)?,
            None => f64::MAX,
        };

        let individual_limits = options
            .individual_limits
            .iter()
            .map(|(value, limit)| Ok((fold_case(value), check_fraction("Individual limit", *limit)?)))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            property: normalize_key(property),
            blacklist: options.blacklist.iter().map(|value| fold_case(value)).collect(),
            whitelist: options.whitelist.iter().map(|value| fold_case(value)).collect(),
            global_limit,
            individual_limits,
        })
    }

    pub fn property(&self) -> &str {
        &self.property
    }
}

impl PropertiesQuota for PropertyQuota {
    fn check(&self, consumed: &PropertyConsumption, capacity_limit: i64) -> QuotaVerdict {
        let Some(entry) = consumed.get(&self.property) else {
            return QuotaVerdict::Allow;
        };

        let value = fold_case(&entry.value);

        if self.blacklist.contains(&value) {
            return QuotaVerdict::Reject(format!("'{}' = '{}' is blacklisted.", self.property, entry.value));
        }

        if self.whitelist.contains(&value) {
            return QuotaVerdict::Allow;
        }

        let utilization = utilization(entry.consumed, capacity_limit);
        let limit = self.individual_limits.get(&value).copied().unwrap_or(self.global_limit);

        QuotaVerdict::allow_if(utilization <= limit, || utilization_reason(&self.property, &entry.value, utilization, limit))
    }
}

fn normalize_key(key: impl Into<String>) -> String {
    let mut key = key.into();
    key.make_ascii_lowercase();
    key
}

fn utilization_reason(key: &str, value: &str, utilization: f64, limit: f64) -> String {
    format!("Capacity utilization for '{key}' = '{value}' ({utilization:.2}) would exceed the configured limit ({limit:.2}).")
}
