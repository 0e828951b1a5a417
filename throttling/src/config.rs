use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Deserializer;

use crate::error::ThrottlingError;
use crate::properties;
use crate::quotas::ConsumerQuota;
use crate::quotas::ExternalQuota;
use crate::quotas::PriorityQuota;
use crate::quotas::PropertiesQuota;
use crate::quotas::PropertyQuotaOptions;

pub type EssentialsProvider = Arc<dyn Fn() -> ThrottlingEssentials + Send + Sync>;
pub type PropertyQuotaOptionsProvider = Arc<dyn Fn() -> PropertyQuotaOptions + Send + Sync>;
pub type QuotasProvider<Q> = Arc<dyn Fn() -> Option<Vec<Arc<Q>>> + Send + Sync>;
pub type CoresProvider = Arc<dyn Fn() -> usize + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&ThrottlingError) + Send + Sync>;

/// General options that are not related to quotas
///
/// Loaded from TOML through serde; every field is optional in the source.
/// `refresh_period` is given in seconds there. Zero makes every read refresh
/// the options; a negative value means they are read once and never refreshed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ThrottlingEssentials {
    /// Disables throttling entirely when false
    pub enabled: bool,

    /// Total capacity limit, takes precedence over `capacity_limit_per_core`
    pub capacity_limit: Option<i64>,

    /// Capacity limit expressed as a multiplier of the number of cores
    pub capacity_limit_per_core: Option<i64>,

    /// Maximum size of the waiting queue that forms once capacity is exhausted
    pub queue_limit: i64,

    /// How often the options are re-read, `None` to read them only once
    #[serde(deserialize_with = "deserialize_refresh_period")]
    pub refresh_period: Option<Duration>,
}

impl Default for ThrottlingEssentials {
    fn default() -> Self {
        Self { enabled: true, capacity_limit: None, capacity_limit_per_core: Some(24), queue_limit: 500, refresh_period: Some(Duration::from_secs(5)) }
    }
}

fn deserialize_refresh_period<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = Option::<f64>::deserialize(deserializer)?;
    Ok(seconds.filter(|seconds| seconds.is_finite() && *seconds >= 0.0).map(Duration::from_secs_f64))
}

/// Everything the state actualizer reads on each refresh
///
/// Built with [`ThrottlingConfigurationBuilder`]. All options are providers so
/// that they can be backed by a live configuration source.
#[derive(Clone)]
pub struct ThrottlingConfiguration {
    pub(crate) essentials: EssentialsProvider,
    pub(crate) property_quotas: Vec<(String, PropertyQuotaOptionsProvider)>,
    pub(crate) external_quotas: Option<QuotasProvider<dyn ExternalQuota>>,
    pub(crate) priority_quotas: Option<QuotasProvider<dyn PriorityQuota>>,
    pub(crate) consumer_quotas: Option<QuotasProvider<dyn ConsumerQuota>>,
    pub(crate) properties_quotas: Option<QuotasProvider<dyn PropertiesQuota>>,
    pub(crate) number_of_cores: CoresProvider,
    pub(crate) error_callback: Option<ErrorCallback>,
}

impl ThrottlingConfiguration {
    /// Create a builder for configuring throttling
    pub fn builder() -> ThrottlingConfigurationBuilder {
        ThrottlingConfigurationBuilder::new()
    }

    pub fn essentials(&self) -> ThrottlingEssentials {
        (self.essentials)()
    }

    pub fn number_of_cores(&self) -> usize {
        (self.number_of_cores)()
    }

    pub fn error_callback(&self) -> Option<&ErrorCallback> {
        self.error_callback.as_ref()
    }
}

impl Default for ThrottlingConfiguration {
    fn default() -> Self {
        ThrottlingConfigurationBuilder::new().build()
    }
}

/// Builder for [`ThrottlingConfiguration`]
///
/// Property names are case-insensitive: setting a quota for `"Method"` replaces
/// one previously set for `"method"`.
pub struct ThrottlingConfigurationBuilder {
    essentials: EssentialsProvider,
    property_quotas: HashMap<String, PropertyQuotaOptionsProvider>,
    property_order: Vec<String>,
    external_quotas: Option<QuotasProvider<dyn ExternalQuota>>,
    priority_quotas: Option<QuotasProvider<dyn PriorityQuota>>,
    consumer_quotas: Option<QuotasProvider<dyn ConsumerQuota>>,
    properties_quotas: Option<QuotasProvider<dyn PropertiesQuota>>,
    number_of_cores: CoresProvider,
    error_callback: Option<ErrorCallback>,
}

impl ThrottlingConfigurationBuilder {
    pub fn new() -> Self {
        Self {
            essentials: Arc::new(ThrottlingEssentials::default),
            property_quotas: HashMap::new(),
            property_order: Vec::new(),
            external_quotas: None,
            priority_quotas: None,
            consumer_quotas: None,
            properties_quotas: None,
            number_of_cores: Arc::new(num_cpus::get),
            error_callback: None,
        }
    }

    /// Use fixed essentials
    pub fn essentials(self, essentials: ThrottlingEssentials) -> Self {
        self.essentials_provider(move || essentials.clone())
    }

    /// Re-read essentials from `provider` on every refresh
    pub fn essentials_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> ThrottlingEssentials + Send + Sync + 'static,
    {
        self.essentials = Arc::new(provider);
        self
    }

    pub fn property_quota(self, property: &str, options: PropertyQuotaOptions) -> Self {
        self.property_quota_provider(property, move || options.clone())
    }

    pub fn property_quota_provider<F>(mut self, property: &str, provider: F) -> Self
    where
        F: Fn() -> PropertyQuotaOptions + Send + Sync + 'static,
    {
        let property = property.to_ascii_lowercase();
        if self.property_quotas.insert(property.clone(), Arc::new(provider)).is_none() {
            self.property_order.push(property);
        }
        self
    }

    pub fn consumer_quota(self, options: PropertyQuotaOptions) -> Self {
        self.property_quota(properties::CONSUMER, options)
    }

    pub fn priority_quota(self, options: PropertyQuotaOptions) -> Self {
        self.property_quota(properties::PRIORITY, options)
    }

    pub fn method_quota(self, options: PropertyQuotaOptions) -> Self {
        self.property_quota(properties::METHOD, options)
    }

    pub fn url_quota(self, options: PropertyQuotaOptions) -> Self {
        self.property_quota(properties::URL, options)
    }

    pub fn external_quotas(self, quotas: Vec<Arc<dyn ExternalQuota>>) -> Self {
        self.external_quotas_provider(move || Some(quotas.clone()))
    }

    pub fn external_quotas_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Option<Vec<Arc<dyn ExternalQuota>>> + Send + Sync + 'static,
    {
        self.external_quotas = Some(Arc::new(provider));
        self
    }

    pub fn priority_quotas(self, quotas: Vec<Arc<dyn PriorityQuota>>) -> Self {
        self.priority_quotas_provider(move || Some(quotas.clone()))
    }

    pub fn priority_quotas_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Option<Vec<Arc<dyn PriorityQuota>>> + Send + Sync + 'static,
    {
        self.priority_quotas = Some(Arc::new(provider));
        self
    }

    pub fn consumer_quotas(self, quotas: Vec<Arc<dyn ConsumerQuota>>) -> Self {
        self.consumer_quotas_provider(move || Some(quotas.clone()))
    }

    pub fn consumer_quotas_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Option<Vec<Arc<dyn ConsumerQuota>>> + Send + Sync + 'static,
    {
        self.consumer_quotas = Some(Arc::new(provider));
        self
    }

    pub fn properties_quotas(self, quotas: Vec<Arc<dyn PropertiesQuota>>) -> Self {
        self.properties_quotas_provider(move || Some(quotas.clone()))
    }

    pub fn properties_quotas_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Option<Vec<Arc<dyn PropertiesQuota>>> + Send + Sync + 'static,
    {
        self.properties_quotas = Some(Arc::new(provider));
        self
    }

    pub fn number_of_cores(self, cores: usize) -> Self {
        self.number_of_cores_provider(move || cores)
    }

    pub fn number_of_cores_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> usize + Send + Sync + 'static,
    {
        self.number_of_cores = Arc::new(provider);
        self
    }

    /// Receives actualization and observer failures
    pub fn error_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ThrottlingError) + Send + Sync + 'static,
    {
        self.error_callback = Some(Arc::new(callback));
        self
    }

    pub fn build(mut self) -> ThrottlingConfiguration {
        let property_quotas =
            self.property_order.into_iter().filter_map(|property| self.property_quotas.remove(&property).map(|provider| (property, provider))).collect();

        ThrottlingConfiguration {
            essentials: self.essentials,
            property_quotas,
            external_quotas: self.external_quotas,
            priority_quotas: self.priority_quotas,
            consumer_quotas: self.consumer_quotas,
            properties_quotas: self.properties_quotas,
            number_of_cores: self.number_of_cores,
            error_callback: self.error_callback,
        }
    }
}

impl Default for ThrottlingConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}
