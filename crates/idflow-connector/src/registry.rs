//! Connector factory registry and pooled instance management.
//!
//! Implementations register a factory per bundle id; the registry hands out
//! cached instances per resource, created from the connector's base
//! configuration merged with the resource's overrides.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info};

use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, ConnectorResult};
use crate::traits::{Connector, CreateOp, DeleteOp, SearchOp, SyncOp, UpdateOp};

/// The full connector surface the gateway dispatches against.
///
/// Connectors advertise what they actually support through their capability
/// set; the gateway never dispatches an operation outside the effective set,
/// so implementations may answer un-advertised operations with
/// [`ConnectorError::Unsupported`].
pub trait FullConnector: CreateOp + UpdateOp + DeleteOp + SearchOp + SyncOp {}

impl<T> FullConnector for T where T: CreateOp + UpdateOp + DeleteOp + SearchOp + SyncOp {}

impl std::fmt::Debug for dyn FullConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn FullConnector")
    }
}

/// Shared handle to a connector implementation.
pub type BoxedConnector = Arc<dyn FullConnector>;

/// Factory producing connector instances from merged configuration.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    /// Instantiate a connector from the given merged properties.
    async fn create(&self, properties: &BTreeMap<String, Value>) -> ConnectorResult<BoxedConnector>;
}

struct PooledInstance {
    connector: BoxedConnector,
    /// Bounds concurrent live calls per the instance's pool settings.
    permits: Arc<Semaphore>,
}

/// Registry of connector factories and per-resource instances.
#[derive(Default)]
pub struct ConnectorRegistry {
    factories: RwLock<HashMap<String, Arc<dyn ConnectorFactory>>>,
    instances: RwLock<HashMap<String, Arc<PooledInstance>>>,
}

impl ConnectorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a bundle id, replacing any previous one.
    pub async fn register_factory(&self, bundle: impl Into<String>, factory: Arc<dyn ConnectorFactory>) {
        let bundle = bundle.into();
        info!(bundle = %bundle, "Registering connector factory");
        self.factories.write().await.insert(bundle, factory);
    }

    /// Get the cached instance for a resource, creating it on first use.
    ///
    /// The instance is built from the connector's base properties merged
    /// with the resource's overrides, and is bounded by the pool's
    /// `max_objects` for concurrent calls.
    pub async fn get_or_create(
        &self,
        resource: &str,
        config: &ConnectorConfig,
        overrides: &BTreeMap<String, Value>,
    ) -> ConnectorResult<(BoxedConnector, Arc<Semaphore>)> {
        if let Some(instance) = self.instances.read().await.get(resource) {
            return Ok((instance.connector.clone(), instance.permits.clone()));
        }

        let factory = self
            .factories
            .read()
            .await
            .get(&config.bundle)
            .cloned()
            .ok_or(ConnectorError::ConnectorNotFound {
                connector_id: config.connector_id,
            })?;

        let merged = config.merged_with(overrides);
        let connector = factory.create(&merged).await?;
        debug!(resource = %resource, bundle = %config.bundle, "Created connector instance");

        let instance = Arc::new(PooledInstance {
            connector,
            permits: Arc::new(Semaphore::new(config.pool.max_objects as usize)),
        });

        let mut instances = self.instances.write().await;
        // Another task may have raced us; keep the first instance.
        let entry = instances
            .entry(resource.to_string())
            .or_insert_with(|| instance);
        Ok((entry.connector.clone(), entry.permits.clone()))
    }

    /// Dispose and drop the cached instance for a resource, if any.
    ///
    /// Used after configuration changes so the next call rebuilds the
    /// instance from fresh merged properties.
    pub async fn dispose(&self, resource: &str) -> ConnectorResult<()> {
        let removed = self.instances.write().await.remove(resource);
        if let Some(instance) = removed {
            instance.connector.dispose().await?;
            info!(resource = %resource, "Disposed connector instance");
        }
        Ok(())
    }
}
