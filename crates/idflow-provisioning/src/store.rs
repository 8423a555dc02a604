//! Persistence collaborators.
//!
//! The engine consumes these traits; actual storage is out of scope.
//! In-memory implementations back the engines' tests and embedders that do
//! not bring their own database.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use idflow_core::{Entity, EntityKey, EntityKind, GroupDef, RemediationId, SchemaDef, TaskId};

use crate::error::StoreError;
use crate::remediation::Remediation;
use crate::task::{PropagationTask, TaskExecution};

/// CRUD + attribute-predicate search over internal entities, groups and
/// schemas, plus the implicit (dynamic) membership edges.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Read an entity by key.
    async fn get(&self, key: &EntityKey) -> Result<Option<Entity>, StoreError>;

    /// Insert or update an entity. Entity names are unique per kind.
    async fn save(&self, entity: &Entity) -> Result<(), StoreError>;

    /// Delete an entity.
    async fn delete(&self, key: &EntityKey) -> Result<(), StoreError>;

    /// All entities of a kind.
    async fn list(&self, kind: EntityKind) -> Result<Vec<Entity>, StoreError>;

    /// Entities of a kind matching every (schema, value) equality pair.
    /// The schema name "name" addresses the entity name.
    async fn search(
        &self,
        kind: EntityKind,
        criteria: &[(String, String)],
    ) -> Result<Vec<Entity>, StoreError>;

    /// All group definitions.
    async fn groups(&self) -> Result<Vec<GroupDef>, StoreError>;

    /// Insert or update a group definition.
    async fn save_group(&self, group: &GroupDef) -> Result<(), StoreError>;

    /// Dynamic (implicit) memberships of an entity.
    async fn dyn_memberships(&self, key: &EntityKey) -> Result<BTreeSet<EntityKey>, StoreError>;

    /// Replace the dynamic memberships of an entity.
    async fn set_dyn_memberships(
        &self,
        key: &EntityKey,
        groups: BTreeSet<EntityKey>,
    ) -> Result<(), StoreError>;

    /// Schema definition for an entity kind and schema name.
    async fn schema(&self, kind: EntityKind, name: &str)
        -> Result<Option<SchemaDef>, StoreError>;

    /// All schema definitions for an entity kind.
    async fn schemas(&self, kind: EntityKind) -> Result<Vec<SchemaDef>, StoreError>;

    /// Register a schema definition.
    async fn save_schema(&self, kind: EntityKind, schema: SchemaDef) -> Result<(), StoreError>;
}

/// Persistence of propagation tasks and task executions.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or update a propagation task (with its execution history).
    async fn save_propagation(&self, task: &PropagationTask) -> Result<(), StoreError>;

    /// Propagation tasks recorded for an entity, oldest first.
    async fn propagations_for(
        &self,
        entity: &EntityKey,
    ) -> Result<Vec<PropagationTask>, StoreError>;

    /// Append an execution record for a pull/push task.
    async fn save_execution(
        &self,
        task_id: TaskId,
        execution: TaskExecution,
    ) -> Result<(), StoreError>;

    /// Execution history of a pull/push task, oldest first.
    async fn executions(&self, task_id: TaskId) -> Result<Vec<TaskExecution>, StoreError>;
}

/// Persistence of remediation records.
#[async_trait]
pub trait RemediationStore: Send + Sync {
    /// Persist a remediation record.
    async fn save(&self, remediation: &Remediation) -> Result<(), StoreError>;

    /// Read one record.
    async fn get(&self, id: &RemediationId) -> Result<Option<Remediation>, StoreError>;

    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<Remediation>, StoreError>;

    /// Delete a record (after successful remedy).
    async fn delete(&self, id: &RemediationId) -> Result<(), StoreError>;
}

/// Persistence of sync tokens, one per (resource, entity kind).
#[async_trait]
pub trait SyncTokenStore: Send + Sync {
    /// The stored token; `None` means never synchronized.
    async fn get(&self, resource: &str, kind: EntityKind) -> Result<Option<String>, StoreError>;

    /// Commit a new token.
    async fn set(
        &self,
        resource: &str,
        kind: EntityKind,
        token: String,
    ) -> Result<(), StoreError>;

    /// Drop the token, forcing full reconciliation on the next run.
    async fn clear(&self, resource: &str, kind: EntityKind) -> Result<(), StoreError>;
}

fn entity_matches(entity: &Entity, criteria: &[(String, String)]) -> bool {
    criteria.iter().all(|(schema, value)| {
        if schema == "name" {
            entity.name == *value
        } else {
            entity
                .attr(schema)
                .is_some_and(|v| v.values().iter().any(|s| s == value))
        }
    })
}

/// In-memory entity store.
#[derive(Default)]
pub struct InMemoryEntityStore {
    entities: RwLock<HashMap<EntityKey, Entity>>,
    groups: RwLock<HashMap<EntityKey, GroupDef>>,
    dyn_memberships: RwLock<HashMap<EntityKey, BTreeSet<EntityKey>>>,
    schemas: RwLock<HashMap<EntityKind, Vec<SchemaDef>>>,
}

impl InMemoryEntityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle, ready to hand to the engines.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get(&self, key: &EntityKey) -> Result<Option<Entity>, StoreError> {
        Ok(self.entities.read().await.get(key).cloned())
    }

    async fn save(&self, entity: &Entity) -> Result<(), StoreError> {
        let mut entities = self.entities.write().await;
        let clash = entities.values().any(|e| {
            e.kind == entity.kind && e.name == entity.name && e.key != entity.key
        });
        if clash {
            return Err(StoreError::conflict(format!(
                "{} '{}' already exists",
                entity.kind, entity.name
            )));
        }
        entities.insert(entity.key, entity.clone());
        Ok(())
    }

    async fn delete(&self, key: &EntityKey) -> Result<(), StoreError> {
        self.entities.write().await.remove(key);
        self.dyn_memberships.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<Entity>, StoreError> {
        let mut out: Vec<Entity> = self
            .entities
            .read()
            .await
            .values()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn search(
        &self,
        kind: EntityKind,
        criteria: &[(String, String)],
    ) -> Result<Vec<Entity>, StoreError> {
        let mut out: Vec<Entity> = self
            .entities
            .read()
            .await
            .values()
            .filter(|e| e.kind == kind && entity_matches(e, criteria))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn groups(&self) -> Result<Vec<GroupDef>, StoreError> {
        let mut out: Vec<GroupDef> = self.groups.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn save_group(&self, group: &GroupDef) -> Result<(), StoreError> {
        self.groups.write().await.insert(group.key, group.clone());
        Ok(())
    }

    async fn dyn_memberships(&self, key: &EntityKey) -> Result<BTreeSet<EntityKey>, StoreError> {
        Ok(self
            .dyn_memberships
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_dyn_memberships(
        &self,
        key: &EntityKey,
        groups: BTreeSet<EntityKey>,
    ) -> Result<(), StoreError> {
        self.dyn_memberships.write().await.insert(*key, groups);
        Ok(())
    }

    async fn schema(
        &self,
        kind: EntityKind,
        name: &str,
    ) -> Result<Option<SchemaDef>, StoreError> {
        Ok(self
            .schemas
            .read()
            .await
            .get(&kind)
            .and_then(|ss| ss.iter().find(|s| s.name == name))
            .cloned())
    }

    async fn schemas(&self, kind: EntityKind) -> Result<Vec<SchemaDef>, StoreError> {
        Ok(self.schemas.read().await.get(&kind).cloned().unwrap_or_default())
    }

    async fn save_schema(&self, kind: EntityKind, schema: SchemaDef) -> Result<(), StoreError> {
        let mut schemas = self.schemas.write().await;
        let list = schemas.entry(kind).or_default();
        list.retain(|s| s.name != schema.name);
        list.push(schema);
        Ok(())
    }
}

/// In-memory task store.
#[derive(Default)]
pub struct InMemoryTaskStore {
    propagations: RwLock<HashMap<TaskId, PropagationTask>>,
    executions: RwLock<HashMap<TaskId, Vec<TaskExecution>>>,
}

impl InMemoryTaskStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn save_propagation(&self, task: &PropagationTask) -> Result<(), StoreError> {
        self.propagations.write().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn propagations_for(
        &self,
        entity: &EntityKey,
    ) -> Result<Vec<PropagationTask>, StoreError> {
        let mut out: Vec<PropagationTask> = self
            .propagations
            .read()
            .await
            .values()
            .filter(|t| t.entity_key == *entity)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.id);
        Ok(out)
    }

    async fn save_execution(
        &self,
        task_id: TaskId,
        execution: TaskExecution,
    ) -> Result<(), StoreError> {
        self.executions
            .write()
            .await
            .entry(task_id)
            .or_default()
            .push(execution);
        Ok(())
    }

    async fn executions(&self, task_id: TaskId) -> Result<Vec<TaskExecution>, StoreError> {
        Ok(self
            .executions
            .read()
            .await
            .get(&task_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// In-memory remediation store.
#[derive(Default)]
pub struct InMemoryRemediationStore {
    records: RwLock<Vec<Remediation>>,
}

impl InMemoryRemediationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl RemediationStore for InMemoryRemediationStore {
    async fn save(&self, remediation: &Remediation) -> Result<(), StoreError> {
        self.records.write().await.push(remediation.clone());
        Ok(())
    }

    async fn get(&self, id: &RemediationId) -> Result<Option<Remediation>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.id == *id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Remediation>, StoreError> {
        Ok(self.records.read().await.clone())
    }

    async fn delete(&self, id: &RemediationId) -> Result<(), StoreError> {
        self.records.write().await.retain(|r| r.id != *id);
        Ok(())
    }
}

/// In-memory sync token store.
#[derive(Default)]
pub struct InMemorySyncTokenStore {
    tokens: RwLock<HashMap<(String, EntityKind), String>>,
}

impl InMemorySyncTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl SyncTokenStore for InMemorySyncTokenStore {
    async fn get(&self, resource: &str, kind: EntityKind) -> Result<Option<String>, StoreError> {
        Ok(self
            .tokens
            .read()
            .await
            .get(&(resource.to_string(), kind))
            .cloned())
    }

    async fn set(
        &self,
        resource: &str,
        kind: EntityKind,
        token: String,
    ) -> Result<(), StoreError> {
        self.tokens
            .write()
            .await
            .insert((resource.to_string(), kind), token);
        Ok(())
    }

    async fn clear(&self, resource: &str, kind: EntityKind) -> Result<(), StoreError> {
        self.tokens
            .write()
            .await
            .remove(&(resource.to_string(), kind));
        Ok(())
    }
}
