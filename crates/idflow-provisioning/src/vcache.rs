//! Virtual attribute cache.
//!
//! Virtual attribute values live on the external resource; the cache keeps
//! them for a bounded TTL so repeated reads of the same entity do not hammer
//! the connector. Each (entity, schema) pair owns its own cell; concurrent
//! loads of the same cell collapse into a single connector call while
//! distinct cells load in parallel.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use idflow_connector::{ConnectorGateway, Uid};
use idflow_core::{Entity, EntityKey};

use crate::error::{ProvisioningError, ProvisioningResult};
use crate::resource::{Resource, ResourceDirectory};

#[derive(Debug, Clone)]
struct CacheEntry {
    values: Vec<String>,
    cached_at: Instant,
}

type Cell = Arc<Mutex<Option<CacheEntry>>>;

/// TTL-bounded cache of virtual attribute values.
pub struct VirtualAttrCache {
    cells: RwLock<HashMap<(EntityKey, String), Cell>>,
    ttl: Duration,
}

impl VirtualAttrCache {
    /// Create a cache with the given entry TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            cells: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Create a cache with the default 60 second TTL.
    #[must_use]
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(60))
    }

    async fn cell(&self, key: EntityKey, schema: &str) -> Cell {
        let mut cells = self.cells.write().await;
        cells
            .entry((key, schema.to_string()))
            .or_default()
            .clone()
    }

    /// Return the cached values, loading them on a miss or expired entry.
    ///
    /// The loader runs under the cell lock, so at most one load per cell is
    /// in flight at any time.
    pub async fn get_or_load<F, Fut>(
        &self,
        key: EntityKey,
        schema: &str,
        load: F,
    ) -> ProvisioningResult<Vec<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProvisioningResult<Vec<String>>>,
    {
        let cell = self.cell(key, schema).await;
        let mut entry = cell.lock().await;

        if let Some(cached) = entry.as_ref() {
            if cached.cached_at.elapsed() < self.ttl {
                debug!(%key, schema, "Virtual attribute cache hit");
                return Ok(cached.values.clone());
            }
        }

        debug!(%key, schema, "Virtual attribute cache miss");
        let values = load().await?;
        *entry = Some(CacheEntry {
            values: values.clone(),
            cached_at: Instant::now(),
        });
        Ok(values)
    }

    /// The cached values, if present and fresh. Never loads.
    pub async fn peek(&self, key: EntityKey, schema: &str) -> Option<Vec<String>> {
        let cell = self
            .cells
            .read()
            .await
            .get(&(key, schema.to_string()))
            .cloned()?;
        let entry = cell.lock().await;
        entry
            .as_ref()
            .filter(|e| e.cached_at.elapsed() < self.ttl)
            .map(|e| e.values.clone())
    }

    /// Seed fresh values without a connector read (template application,
    /// successful propagation of known values).
    pub async fn put(&self, key: EntityKey, schema: &str, values: Vec<String>) {
        let cell = self.cell(key, schema).await;
        *cell.lock().await = Some(CacheEntry {
            values,
            cached_at: Instant::now(),
        });
    }

    /// Drop one cached schema of an entity.
    pub async fn invalidate(&self, key: EntityKey, schema: &str) {
        self.cells
            .write()
            .await
            .remove(&(key, schema.to_string()));
    }

    /// Drop every cached schema of an entity. Called after a successful
    /// propagation, whose writes may have changed remote state.
    pub async fn invalidate_entity(&self, key: EntityKey) {
        self.cells.write().await.retain(|(k, _), _| *k != key);
    }
}

/// Reads virtual attribute values from their owning resource, through the
/// cache.
pub struct VirtualAttrResolver {
    gateway: Arc<ConnectorGateway>,
    directory: Arc<ResourceDirectory>,
    cache: Arc<VirtualAttrCache>,
}

impl VirtualAttrResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(
        gateway: Arc<ConnectorGateway>,
        directory: Arc<ResourceDirectory>,
        cache: Arc<VirtualAttrCache>,
    ) -> Self {
        Self {
            gateway,
            directory,
            cache,
        }
    }

    /// The cache behind this resolver.
    #[must_use]
    pub fn cache(&self) -> &Arc<VirtualAttrCache> {
        &self.cache
    }

    /// Current values of a virtual attribute of an entity, served from the
    /// cache when fresh.
    ///
    /// The owning resource must map the schema; the mapping's key item
    /// provides the remote identifier to read. A missing remote object
    /// yields no values.
    pub async fn values(
        &self,
        entity: &Entity,
        resource_name: &str,
        schema: &str,
    ) -> ProvisioningResult<Vec<String>> {
        let resource = self.directory.get(resource_name).await.ok_or_else(|| {
            ProvisioningError::task_failure(format!("unknown resource '{resource_name}'"))
        })?;

        self.cache
            .get_or_load(entity.key, schema, || {
                read_remote_values(&self.gateway, &resource, entity, schema)
            })
            .await
    }
}

async fn read_remote_values(
    gateway: &ConnectorGateway,
    resource: &Resource,
    entity: &Entity,
    schema: &str,
) -> ProvisioningResult<Vec<String>> {
    let provision = resource.provision(entity.kind).ok_or_else(|| {
        ProvisioningError::task_failure(format!(
            "resource '{}' has no provision for {}",
            resource.name(),
            entity.kind
        ))
    })?;

    let item = provision
        .mapping
        .items
        .iter()
        .find(|i| i.int_attr_name == schema)
        .ok_or_else(|| {
            ProvisioningError::task_failure(format!(
                "resource '{}' does not map virtual attribute '{schema}'",
                resource.name()
            ))
        })?;

    let key_item = provision.mapping.conn_object_key_item().ok_or_else(|| {
        ProvisioningError::task_failure(format!(
            "resource '{}' mapping declares no connector-object key",
            resource.name()
        ))
    })?;

    let key_value = if key_item.int_attr_name == "name" {
        entity.name.clone()
    } else {
        entity
            .attr(&key_item.int_attr_name)
            .and_then(|v| v.first().map(str::to_string))
            .unwrap_or_else(|| entity.name.clone())
    };
    let uid_attr = if key_item.ext_attr_name.is_empty() {
        "uid"
    } else {
        &key_item.ext_attr_name
    };
    let uid = Uid::new(uid_attr, key_value);

    let object = gateway
        .read(&resource.profile, &provision.object_class, &uid)
        .await?;

    Ok(object
        .and_then(|o| o.attributes.get(&item.ext_attr_name).cloned())
        .map(|v| v.as_strings())
        .unwrap_or_default())
}
