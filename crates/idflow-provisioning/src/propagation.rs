//! Propagation orchestration.
//!
//! Fans one internal change out to every affected resource. Prioritized
//! resources execute first, sequentially, in (priority, name) order;
//! resources without a priority execute afterwards, concurrently. A failure
//! on one resource never stops the others: each attempt yields its own
//! per-resource status.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{instrument, warn};

use idflow_connector::{
    AttributeSet, ConnectorError, ConnectorGateway, ConnectorResult, Uid,
};
use idflow_core::{Entity, SchemaClass, TaskId};

use crate::error::ProvisioningResult;
use crate::hooks::{ActionRegistry, PropagationAction};
use crate::mapping::MappingResolver;
use crate::membership::DynMembershipEvaluator;
use crate::resource::{Resource, ResourceDirectory};
use crate::store::{EntityStore, TaskStore};
use crate::task::{
    ExecStatus, Operation, PropagationStatus, PropagationTask, PushTask, TaskExecution,
};
use crate::vcache::VirtualAttrCache;

/// How a propagation batch is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Wait for every resource; the returned statuses are final.
    #[default]
    Synchronous,
    /// Spawn the batch and return immediately; every status reads CREATED
    /// and final outcomes land in the task store.
    FireAndForget,
}

struct PlannedTask {
    task: PropagationTask,
    cleartext: AttributeSet,
    resource: Arc<Resource>,
}

/// Fans internal changes out to resources.
pub struct PropagationOrchestrator {
    gateway: Arc<ConnectorGateway>,
    directory: Arc<ResourceDirectory>,
    resolver: Arc<MappingResolver>,
    store: Arc<dyn EntityStore>,
    tasks: Arc<dyn TaskStore>,
    cache: Arc<VirtualAttrCache>,
    actions: Arc<ActionRegistry>,
    memberships: Arc<DynMembershipEvaluator>,
}

impl PropagationOrchestrator {
    /// Create an orchestrator.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        gateway: Arc<ConnectorGateway>,
        directory: Arc<ResourceDirectory>,
        resolver: Arc<MappingResolver>,
        store: Arc<dyn EntityStore>,
        tasks: Arc<dyn TaskStore>,
        cache: Arc<VirtualAttrCache>,
        actions: Arc<ActionRegistry>,
        memberships: Arc<DynMembershipEvaluator>,
    ) -> Self {
        Self {
            gateway,
            directory,
            resolver,
            store,
            tasks,
            cache,
            actions,
            memberships,
        }
    }

    /// Propagate one entity operation to the given resources.
    ///
    /// Resources that do not provision the entity's kind are skipped.
    /// Unknown resource names yield a FAILURE status without touching the
    /// others.
    #[instrument(skip(self, entity, resources, action_ids), fields(entity = %entity.key, %operation))]
    pub async fn propagate(
        self: &Arc<Self>,
        entity: &Entity,
        operation: Operation,
        resources: &BTreeSet<String>,
        mode: ExecutionMode,
        action_ids: &[String],
    ) -> ProvisioningResult<Vec<PropagationStatus>> {
        let chain = self.actions.resolve_propagation(action_ids).await?;

        let mut statuses = Vec::new();
        let mut prioritized = Vec::new();
        let mut unprioritized = Vec::new();

        for name in resources {
            let Some(resource) = self.directory.get(name).await else {
                statuses.push(PropagationStatus::failure(
                    name.clone(),
                    format!("unknown resource '{name}'"),
                ));
                continue;
            };
            let Some(provision) = resource.provision(entity.kind) else {
                continue;
            };
            let object_class = provision.object_class.clone();

            // A mapping that fails to resolve costs only this resource its
            // attempt; the rest of the batch still runs.
            let prepared = match self.resolver.to_remote(entity, &resource).await {
                Ok(prepared) => prepared,
                Err(err) => {
                    statuses.push(PropagationStatus::failure(name.clone(), err.to_string()));
                    continue;
                }
            };
            let plan = PlannedTask {
                task: PropagationTask {
                    id: TaskId::new(),
                    entity_key: entity.key,
                    entity_kind: entity.kind,
                    operation,
                    resource: name.clone(),
                    object_class,
                    attributes: prepared.persisted,
                    conn_object_uid: prepared.uid,
                    mandatory_missing: prepared.mandatory_missing,
                    executions: Vec::new(),
                },
                cleartext: prepared.attributes,
                resource: resource.clone(),
            };
            if resource.propagation_priority.is_some() {
                prioritized.push(plan);
            } else {
                unprioritized.push(plan);
            }
        }

        // BTreeSet iteration already ordered by name; a stable sort on the
        // priority keeps the name order within equal priorities.
        prioritized.sort_by_key(|p| p.resource.propagation_priority);

        match mode {
            ExecutionMode::Synchronous => {
                for plan in prioritized {
                    statuses.push(self.execute_one(plan, &chain).await);
                }
                let concurrent = unprioritized
                    .into_iter()
                    .map(|plan| self.execute_one(plan, &chain));
                statuses.extend(join_all(concurrent).await);
            }
            ExecutionMode::FireAndForget => {
                for plan in prioritized.into_iter().chain(unprioritized) {
                    statuses.push(PropagationStatus::created(plan.task.resource.clone()));
                    let this = self.clone();
                    let chain = chain.clone();
                    tokio::spawn(async move {
                        this.execute_one(plan, &chain).await;
                    });
                }
            }
        }

        Ok(statuses)
    }

    /// Push every entity of the task's kind whose effective resources
    /// include the target resource, then record one summary execution.
    #[instrument(skip(self, task), fields(task = %task.id, resource = %task.resource))]
    pub async fn execute_push(
        self: &Arc<Self>,
        task: &PushTask,
    ) -> ProvisioningResult<TaskExecution> {
        let started = Utc::now();
        let mut pushed = 0usize;
        let mut failed = 0usize;
        let target = BTreeSet::from([task.resource.clone()]);

        for entity in self.store.list(task.kind).await? {
            let effective = self.memberships.effective_resources(&entity).await?;
            if !effective.contains(&task.resource) {
                continue;
            }
            let statuses = self
                .propagate(
                    &entity,
                    Operation::Update,
                    &target,
                    ExecutionMode::Synchronous,
                    &task.actions,
                )
                .await?;
            for status in statuses {
                match status.status {
                    ExecStatus::Success => pushed += 1,
                    _ => failed += 1,
                }
            }
        }

        let status = if failed == 0 {
            ExecStatus::Success
        } else {
            ExecStatus::Failure
        };
        let execution = TaskExecution::now(
            status,
            format!("[pushed/failures]: {pushed}/{failed}"),
            started,
        );
        self.tasks.save_execution(task.id, execution.clone()).await?;
        Ok(execution)
    }

    async fn execute_one(
        &self,
        mut plan: PlannedTask,
        chain: &[Arc<dyn PropagationAction>],
    ) -> PropagationStatus {
        let started = Utc::now();
        let resource_name = plan.task.resource.clone();

        let status = if plan.task.mandatory_missing.is_empty() {
            match self.run_hooks_and_dispatch(&mut plan, chain).await {
                Ok(()) => {
                    self.invalidate_pushed_virtuals(&plan).await;
                    PropagationStatus::success(&resource_name)
                }
                Err(ConnectorError::Unsupported { .. }) => PropagationStatus::not_attempted(
                    &resource_name,
                    format!(
                        "{} capability not available on '{resource_name}'",
                        plan.task.operation
                    ),
                ),
                Err(err) => PropagationStatus::failure(&resource_name, err.to_string()),
            }
        } else {
            PropagationStatus::not_attempted(
                &resource_name,
                format!(
                    "Not attempted because there are mandatory attributes without value(s): [{}]",
                    plan.task.mandatory_missing.join(", ")
                ),
            )
        };

        let success = status.status == ExecStatus::Success;
        if plan.resource.trace_level.records(success) {
            plan.task.executions.push(TaskExecution::now(
                status.status,
                status.failure_reason.clone().unwrap_or_default(),
                started,
            ));
        }
        if let Err(err) = self.tasks.save_propagation(&plan.task).await {
            warn!(task = %plan.task.id, %err, "Failed to persist propagation task");
        }
        for action in chain {
            action.after(&plan.task, &status).await;
        }
        status
    }

    /// Drop the cache cells of virtual schemas this propagation may have
    /// rewritten: the resource's mapped virtual items with propagation
    /// purpose. Cells of other resources' schemas stay valid.
    async fn invalidate_pushed_virtuals(&self, plan: &PlannedTask) {
        let Some(provision) = plan.resource.provision(plan.task.entity_kind) else {
            return;
        };
        for item in &provision.mapping.items {
            if !item.purpose.includes_propagation() {
                continue;
            }
            let is_virtual = self
                .store
                .schema(plan.task.entity_kind, &item.int_attr_name)
                .await
                .ok()
                .flatten()
                .is_some_and(|s| s.class == SchemaClass::Virtual);
            if is_virtual {
                self.cache
                    .invalidate(plan.task.entity_key, &item.int_attr_name)
                    .await;
            }
        }
    }

    async fn run_hooks_and_dispatch(
        &self,
        plan: &mut PlannedTask,
        chain: &[Arc<dyn PropagationAction>],
    ) -> ConnectorResult<()> {
        for action in chain {
            if let Err(err) = action.before(&plan.task).await {
                return Err(ConnectorError::operation_failed(format!(
                    "vetoed by propagation action: {err}"
                )));
            }
        }
        if let Some(uid) = self.dispatch(plan).await? {
            plan.task.conn_object_uid = Some(uid);
        }
        Ok(())
    }

    async fn dispatch(&self, plan: &mut PlannedTask) -> ConnectorResult<Option<Uid>> {
        let profile = &plan.resource.profile;
        let class = &plan.task.object_class;
        match plan.task.operation {
            Operation::Create => self
                .gateway
                .create(profile, class, plan.cleartext.clone())
                .await
                .map(Some),
            Operation::Update => {
                let uid = plan.task.conn_object_uid.clone().ok_or_else(|| {
                    ConnectorError::operation_failed("no remote identifier resolved for update")
                })?;
                match self
                    .gateway
                    .update(profile, class, &uid, plan.cleartext.clone())
                    .await
                {
                    // The object vanished remotely: recreate it.
                    Err(ConnectorError::ObjectNotFound { .. }) => self
                        .gateway
                        .create(profile, class, plan.cleartext.clone())
                        .await
                        .map(Some),
                    other => other.map(Some),
                }
            }
            Operation::Delete => {
                let uid = plan.task.conn_object_uid.clone().ok_or_else(|| {
                    ConnectorError::operation_failed("no remote identifier resolved for delete")
                })?;
                self.gateway.delete(profile, class, &uid).await.map(|()| None)
            }
        }
    }
}
