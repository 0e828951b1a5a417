use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Name of the client application that sent the request
pub const CONSUMER: &str = "consumer";

/// Priority of the request
pub const PRIORITY: &str = "priority";

/// HTTP request method
pub const METHOD: &str = "method";

/// HTTP request url
pub const URL: &str = "url";

/// Reserved key of the property evaluated by consumer quotas
pub const CONSUMER_ID: &str = "consumer_id";

const UNKNOWN_VALUE: &str = "unknown";

/// Priority class of a request
///
/// `Sheddable` requests are never queued: they are either admitted right away
/// or rejected as soon as any queue exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThrottlingPriority {
    Critical,
    #[default]
    Ordinary,
    Sheddable,
}

impl ThrottlingPriority {
    pub const ALL: [ThrottlingPriority; 3] = [ThrottlingPriority::Critical, ThrottlingPriority::Ordinary, ThrottlingPriority::Sheddable];

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ThrottlingPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThrottlingPriority::Critical => "Critical",
            ThrottlingPriority::Ordinary => "Ordinary",
            ThrottlingPriority::Sheddable => "Sheddable",
        };
        f.write_str(name)
    }
}

/// A request-classifying key/value pair
///
/// Keys are case-insensitive and stored in ASCII lowercase. Values are kept
/// verbatim but compared without regard to case wherever they are counted or
/// matched against quotas.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Property {
    key: String,
    value: String,
}

impl Property {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut key = key.into();
        key.make_ascii_lowercase();
        Self { key, value: value.into() }
    }

    /// Property identifying the consumer for consumer quotas
    pub fn consumer_id(value: impl Into<String>) -> Self {
        Self::new(CONSUMER_ID, value)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Case folding used to compare property values
pub(crate) fn folded_chars(value: &str) -> impl Iterator<Item = char> + '_ {
    value.chars().flat_map(char::to_lowercase)
}

pub(crate) fn fold_case(value: &str) -> String {
    folded_chars(value).collect()
}

/// Ordered list of request properties
///
/// Duplicate keys are allowed; lookups resolve to the last occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThrottlingProperties {
    properties: Vec<Property>,
}

impl ThrottlingProperties {
    pub fn new(properties: Vec<Property>) -> Self {
        Self { properties }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> ThrottlingPropertiesBuilder {
        ThrottlingPropertiesBuilder::new()
    }

    /// Properties carrying only a consumer id
    pub fn for_consumer(consumer_id: impl Into<String>) -> Self {
        Self { properties: vec![Property::consumer_id(consumer_id)] }
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    /// Last property with the given key, if any
    pub fn get(&self, key: &str) -> Option<&Property> {
        self.properties.iter().rev().find(|property| property.key.eq_ignore_ascii_case(key))
    }

    /// Properties with duplicate keys collapsed to their last occurrence, in first-seen key order
    pub fn distinct(&self) -> Vec<&Property> {
        let mut distinct: Vec<&Property> = Vec::with_capacity(self.properties.len());

        for property in &self.properties {
            match distinct.iter_mut().find(|existing| existing.key == property.key) {
                Some(existing) => *existing = property,
                None => distinct.push(property),
            }
        }

        distinct
    }
}

impl FromIterator<Property> for ThrottlingProperties {
    fn from_iter<I: IntoIterator<Item = Property>>(iter: I) -> Self {
        Self { properties: iter.into_iter().collect() }
    }
}

/// Builder for [`ThrottlingProperties`]
///
/// Missing values are recorded as `"unknown"` so that every request lands in some bucket.
#[derive(Debug, Default)]
pub struct ThrottlingPropertiesBuilder {
    properties: Vec<Property>,
}

impl ThrottlingPropertiesBuilder {
    pub fn new() -> Self {
        Self { properties: Vec::with_capacity(4) }
    }

    pub fn consumer(self, consumer: Option<&str>) -> Self {
        self.property(CONSUMER, consumer)
    }

    pub fn consumer_id(self, consumer_id: Option<&str>) -> Self {
        self.property(CONSUMER_ID, consumer_id)
    }

    pub fn priority(self, priority: Option<&str>) -> Self {
        self.property(PRIORITY, priority)
    }

    pub fn method(self, method: Option<&str>) -> Self {
        self.property(METHOD, method)
    }

    pub fn url(self, url: Option<&str>) -> Self {
        self.property(URL, url)
    }

    pub fn property(mut self, key: &str, value: Option<&str>) -> Self {
        self.properties.push(Property::new(key, value.unwrap_or(UNKNOWN_VALUE)));
        self
    }

    pub fn build(self) -> ThrottlingProperties {
        ThrottlingProperties { properties: self.properties }
    }
}
