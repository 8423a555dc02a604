//! Connector configuration and pool settings.
//!
//! A connector instance carries a base property map; each resource bound to
//! it may override individual properties. The merged view is what the
//! gateway hands to the connector implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use idflow_core::ConnectorId;

use crate::types::CapabilitySet;

/// Connection pool parameters for one connector instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Maximum live connections.
    pub max_objects: u32,
    /// Maximum idle connections retained.
    pub max_idle: u32,
    /// Minimum idle connections kept warm.
    pub min_idle: u32,
    /// Seconds an idle connection may live before eviction.
    pub min_evictable_idle_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_objects: 10,
            max_idle: 10,
            min_idle: 1,
            min_evictable_idle_secs: 120,
        }
    }
}

/// Configuration of a connector instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Identifier of the connector instance.
    pub connector_id: ConnectorId,
    /// Bundle identifier selecting the implementation.
    pub bundle: String,
    /// Bundle version.
    pub version: String,
    /// Capabilities natively supported by the implementation.
    pub capabilities: CapabilitySet,
    /// Base configuration properties.
    pub properties: BTreeMap<String, Value>,
    /// Pool parameters.
    #[serde(default)]
    pub pool: PoolSettings,
    /// Per-operation timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl ConnectorConfig {
    /// Create a configuration with default pool and timeout.
    pub fn new(bundle: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            connector_id: ConnectorId::new(),
            bundle: bundle.into(),
            version: version.into(),
            capabilities: CapabilitySet::full(),
            properties: BTreeMap::new(),
            pool: PoolSettings::default(),
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Builder-style capability set.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Builder-style property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Per-operation timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Merge per-resource overrides over the base properties.
    ///
    /// Overridden keys replace the base value; keys absent from the override
    /// map keep their base value.
    #[must_use]
    pub fn merged_with(&self, overrides: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        let mut merged = self.properties.clone();
        for (k, v) in overrides {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}
