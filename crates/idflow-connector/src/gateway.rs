//! The connector gateway.
//!
//! Uniform, capability-gated entry point for every external-system
//! operation. Before any call the gateway computes the resource's effective
//! capability set; an operation whose capability is absent fails with
//! [`ConnectorError::Unsupported`] and the remote call is never issued.
//! Every dispatched call is bounded by the instance's per-operation timeout
//! and by the pool's concurrency limit.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, ConnectorResult};
use crate::operation::{AttributeSet, Filter, PageRequest, RemoteObject, SearchPage, SyncBatch, Uid};
use crate::registry::{BoxedConnector, ConnectorRegistry};
use crate::types::{effective_capabilities, Capability, CapabilitySet};

/// What the gateway needs to know about a resource binding.
///
/// Built by the provisioning layer from its resource configuration.
#[derive(Debug, Clone)]
pub struct ResourceProfile {
    /// Resource name, used as the instance cache key.
    pub name: String,
    /// Configuration of the referenced connector instance.
    pub config: ConnectorConfig,
    /// Per-resource property overrides merged over the base configuration.
    pub config_overrides: BTreeMap<String, Value>,
    /// Capability override set.
    pub capability_overrides: CapabilitySet,
    /// When set, the override set replaces the connector's native set.
    pub override_capabilities: bool,
}

impl ResourceProfile {
    /// A profile using the connector's native capabilities and no overrides.
    pub fn new(name: impl Into<String>, config: ConnectorConfig) -> Self {
        Self {
            name: name.into(),
            config,
            config_overrides: BTreeMap::new(),
            capability_overrides: CapabilitySet::new(),
            override_capabilities: false,
        }
    }

    /// Builder-style capability override.
    #[must_use]
    pub fn with_capability_overrides(mut self, set: CapabilitySet) -> Self {
        self.capability_overrides = set;
        self.override_capabilities = true;
        self
    }

    /// Builder-style property override.
    #[must_use]
    pub fn with_config_override(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config_overrides.insert(key.into(), value);
        self
    }

    /// The capability set actually in force for this resource.
    #[must_use]
    pub fn effective_capabilities(&self) -> &CapabilitySet {
        effective_capabilities(
            &self.config.capabilities,
            &self.capability_overrides,
            self.override_capabilities,
        )
    }
}

/// Capability-gated facade over connector operations.
pub struct ConnectorGateway {
    registry: Arc<ConnectorRegistry>,
}

impl ConnectorGateway {
    /// Create a gateway over the given registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectorRegistry>) -> Self {
        Self { registry }
    }

    /// The underlying registry (for factory registration and disposal).
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectorRegistry> {
        &self.registry
    }

    /// Create an object on the resource.
    #[instrument(skip(self, attributes), fields(resource = %profile.name))]
    pub async fn create(
        &self,
        profile: &ResourceProfile,
        object_class: &str,
        attributes: AttributeSet,
    ) -> ConnectorResult<Uid> {
        self.require(profile, Capability::Create)?;
        let (connector, permits) = self.instance(profile).await?;
        let _permit = acquire(&permits).await?;
        with_timeout(profile.config.timeout(), async move {
            connector.create(object_class, attributes).await
        })
        .await
    }

    /// Update an object on the resource.
    #[instrument(skip(self, attributes), fields(resource = %profile.name, uid = %uid))]
    pub async fn update(
        &self,
        profile: &ResourceProfile,
        object_class: &str,
        uid: &Uid,
        attributes: AttributeSet,
    ) -> ConnectorResult<Uid> {
        self.require(profile, Capability::Update)?;
        let (connector, permits) = self.instance(profile).await?;
        let _permit = acquire(&permits).await?;
        with_timeout(profile.config.timeout(), async move {
            connector.update(object_class, uid, attributes).await
        })
        .await
    }

    /// Delete an object from the resource.
    #[instrument(skip(self), fields(resource = %profile.name, uid = %uid))]
    pub async fn delete(
        &self,
        profile: &ResourceProfile,
        object_class: &str,
        uid: &Uid,
    ) -> ConnectorResult<()> {
        self.require(profile, Capability::Delete)?;
        let (connector, permits) = self.instance(profile).await?;
        let _permit = acquire(&permits).await?;
        with_timeout(profile.config.timeout(), async move {
            connector.delete(object_class, uid).await
        })
        .await
    }

    /// Search objects on the resource, one page at a time.
    #[instrument(skip(self, filter, page), fields(resource = %profile.name))]
    pub async fn search(
        &self,
        profile: &ResourceProfile,
        object_class: &str,
        filter: Option<&Filter>,
        page: &PageRequest,
    ) -> ConnectorResult<SearchPage> {
        self.require(profile, Capability::Search)?;
        let (connector, permits) = self.instance(profile).await?;
        let _permit = acquire(&permits).await?;
        with_timeout(profile.config.timeout(), async move {
            connector.search(object_class, filter, page).await
        })
        .await
    }

    /// Read a single object by remote identifier.
    #[instrument(skip(self), fields(resource = %profile.name, uid = %uid))]
    pub async fn read(
        &self,
        profile: &ResourceProfile,
        object_class: &str,
        uid: &Uid,
    ) -> ConnectorResult<Option<RemoteObject>> {
        self.require(profile, Capability::Search)?;
        let (connector, permits) = self.instance(profile).await?;
        let _permit = acquire(&permits).await?;
        with_timeout(profile.config.timeout(), async move {
            connector.read(object_class, uid).await
        })
        .await
    }

    /// Fetch changes since the given sync token.
    #[instrument(skip(self), fields(resource = %profile.name))]
    pub async fn sync(
        &self,
        profile: &ResourceProfile,
        object_class: &str,
        token: Option<&str>,
    ) -> ConnectorResult<SyncBatch> {
        self.require(profile, Capability::Sync)?;
        let (connector, permits) = self.instance(profile).await?;
        let _permit = acquire(&permits).await?;
        with_timeout(profile.config.timeout(), async move {
            connector.sync(object_class, token).await
        })
        .await
    }

    /// Diagnostics: verify the resource's connection.
    #[instrument(skip(self), fields(resource = %profile.name))]
    pub async fn check(&self, profile: &ResourceProfile) -> ConnectorResult<()> {
        let (connector, permits) = self.instance(profile).await?;
        let _permit = acquire(&permits).await?;
        with_timeout(profile.config.timeout(), async move {
            connector.test_connection().await
        })
        .await
    }

    fn require(&self, profile: &ResourceProfile, capability: Capability) -> ConnectorResult<()> {
        if profile.effective_capabilities().contains(capability) {
            Ok(())
        } else {
            warn!(
                resource = %profile.name,
                capability = %capability,
                "Operation rejected by capability gate"
            );
            Err(ConnectorError::unsupported(&profile.name, capability))
        }
    }

    async fn instance(
        &self,
        profile: &ResourceProfile,
    ) -> ConnectorResult<(BoxedConnector, Arc<Semaphore>)> {
        self.registry
            .get_or_create(&profile.name, &profile.config, &profile.config_overrides)
            .await
    }
}

async fn acquire(permits: &Arc<Semaphore>) -> ConnectorResult<tokio::sync::OwnedSemaphorePermit> {
    let permits = permits.clone();
    debug!(available = permits.available_permits(), "Acquiring pool permit");
    permits
        .acquire_owned()
        .await
        .map_err(|_| ConnectorError::operation_failed("connector pool closed"))
}

async fn with_timeout<T, F>(timeout: Duration, fut: F) -> ConnectorResult<T>
where
    F: std::future::Future<Output = ConnectorResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ConnectorError::Timeout {
            timeout_secs: timeout.as_secs(),
        }),
    }
}
