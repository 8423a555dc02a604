//! Action hooks.
//!
//! Tasks reference actions by id; the registry resolves ids to
//! implementations at execution time. Hook errors abort the surrounding
//! unit of work (the object for pull hooks, the resource for propagation
//! hooks).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use idflow_connector::SyncEvent;
use idflow_core::Entity;

use crate::error::{ProvisioningError, ProvisioningResult};
use crate::task::{PropagationStatus, PropagationTask, PullTask};

/// Hook invoked around each pulled object.
#[async_trait]
pub trait PullAction: Send + Sync {
    /// Called before correlation; may veto the object by returning an error.
    async fn before(&self, _task: &PullTask, _event: &SyncEvent) -> ProvisioningResult<()> {
        Ok(())
    }

    /// Called after the internal operation committed.
    async fn after(
        &self,
        _task: &PullTask,
        _event: &SyncEvent,
        _entity: &Entity,
    ) -> ProvisioningResult<()> {
        Ok(())
    }

    /// Called when processing an object failed; the error is still counted.
    async fn on_error(&self, _task: &PullTask, _event: &SyncEvent, _error: &ProvisioningError) {}
}

impl std::fmt::Debug for dyn PullAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn PullAction")
    }
}

/// Hook invoked around each propagation attempt.
#[async_trait]
pub trait PropagationAction: Send + Sync {
    /// Called before the connector call; may veto by returning an error.
    async fn before(&self, _task: &PropagationTask) -> ProvisioningResult<()> {
        Ok(())
    }

    /// Called once the per-resource status is known.
    async fn after(&self, _task: &PropagationTask, _status: &PropagationStatus) {}
}

/// Registry of named pull and propagation actions.
#[derive(Default)]
pub struct ActionRegistry {
    pull: RwLock<HashMap<String, Arc<dyn PullAction>>>,
    propagation: RwLock<HashMap<String, Arc<dyn PropagationAction>>>,
}

impl ActionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pull action under an id.
    pub async fn register_pull(&self, id: impl Into<String>, action: Arc<dyn PullAction>) {
        self.pull.write().await.insert(id.into(), action);
    }

    /// Register a propagation action under an id.
    pub async fn register_propagation(
        &self,
        id: impl Into<String>,
        action: Arc<dyn PropagationAction>,
    ) {
        self.propagation.write().await.insert(id.into(), action);
    }

    /// Resolve the ordered pull actions of a task.
    pub async fn resolve_pull(
        &self,
        ids: &[String],
    ) -> ProvisioningResult<Vec<Arc<dyn PullAction>>> {
        let map = self.pull.read().await;
        ids.iter()
            .map(|id| {
                map.get(id)
                    .cloned()
                    .ok_or_else(|| ProvisioningError::UnknownExtension { id: id.clone() })
            })
            .collect()
    }

    /// Resolve an ordered list of propagation action ids.
    pub async fn resolve_propagation(
        &self,
        ids: &[String],
    ) -> ProvisioningResult<Vec<Arc<dyn PropagationAction>>> {
        let map = self.propagation.read().await;
        ids.iter()
            .map(|id| {
                map.get(id)
                    .cloned()
                    .ok_or_else(|| ProvisioningError::UnknownExtension { id: id.clone() })
            })
            .collect()
    }
}
