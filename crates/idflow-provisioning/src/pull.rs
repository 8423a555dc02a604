//! Pull reconciliation.
//!
//! A pull task fetches remote state (full listing, incremental change
//! stream, or filtered listing), correlates each object against the internal
//! store and applies the configured create/update/delete handling, routing
//! non-reconcilable objects to remediation. Processing is at-least-once: the
//! sync token advances only after the batch has been processed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use idflow_connector::{ConnectorGateway, PageRequest, SyncEvent};
use idflow_core::{Entity, RemediationId, TaskId};

use crate::correlation::{CorrelationOutcome, CorrelationRegistry, CorrelationRule};
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::hooks::{ActionRegistry, PullAction};
use crate::mapping::{MappingResolver, PulledAttrs};
use crate::membership::DynMembershipEvaluator;
use crate::propagation::{ExecutionMode, PropagationOrchestrator};
use crate::resource::{Provision, Resource, ResourceDirectory};
use crate::store::{EntityStore, RemediationStore, SyncTokenStore, TaskStore};
use crate::task::{ExecStatus, Operation, PullMode, PullTask, TaskExecution, Template};
use crate::vcache::VirtualAttrCache;
use crate::remediation::Remediation;

const PAGE_SIZE: u32 = 100;

/// What happened to one pulled object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// A new internal entity was created.
    Created,
    /// An existing entity was updated.
    Updated,
    /// An entity was deleted.
    Deleted,
    /// The resource was unlinked from the entity instead of deleting it.
    Unlinked,
    /// The object matched no enabled handling and was skipped.
    Ignored,
}

/// Counters for one pull run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PullSummary {
    /// Entities created.
    pub created: usize,
    /// Entities updated.
    pub updated: usize,
    /// Entities deleted.
    pub deleted: usize,
    /// Resource unlinks performed.
    pub unlinked: usize,
    /// Objects ignored (handling disabled or nothing to do).
    pub ignored: usize,
    /// Objects that failed to reconcile.
    pub failed: usize,
    /// Remediation records captured.
    pub remediations: usize,
    /// True when the run stopped early on a cancel request.
    pub interrupted: bool,
}

impl PullSummary {
    /// Failures that were not captured as remediation records.
    #[must_use]
    pub fn fatal(&self) -> usize {
        self.failed.saturating_sub(self.remediations)
    }

    fn record(&mut self, outcome: PullOutcome) {
        match outcome {
            PullOutcome::Created => self.created += 1,
            PullOutcome::Updated => self.updated += 1,
            PullOutcome::Deleted => self.deleted += 1,
            PullOutcome::Unlinked => self.unlinked += 1,
            PullOutcome::Ignored => self.ignored += 1,
        }
    }

    /// Objects reconciled successfully.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.created + self.updated + self.deleted + self.unlinked
    }
}

impl std::fmt::Display for PullSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[updated/failures]: {}/{}", self.succeeded(), self.failed)
    }
}

/// Executes pull tasks.
pub struct PullEngine {
    gateway: Arc<ConnectorGateway>,
    directory: Arc<ResourceDirectory>,
    resolver: Arc<MappingResolver>,
    correlations: Arc<CorrelationRegistry>,
    store: Arc<dyn EntityStore>,
    tasks: Arc<dyn TaskStore>,
    remediations: Arc<dyn RemediationStore>,
    tokens: Arc<dyn SyncTokenStore>,
    cache: Arc<VirtualAttrCache>,
    actions: Arc<ActionRegistry>,
    memberships: Arc<DynMembershipEvaluator>,
    propagator: Arc<PropagationOrchestrator>,
    running: Mutex<HashMap<TaskId, Arc<AtomicBool>>>,
}

impl PullEngine {
    /// Create an engine.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        gateway: Arc<ConnectorGateway>,
        directory: Arc<ResourceDirectory>,
        resolver: Arc<MappingResolver>,
        correlations: Arc<CorrelationRegistry>,
        store: Arc<dyn EntityStore>,
        tasks: Arc<dyn TaskStore>,
        remediations: Arc<dyn RemediationStore>,
        tokens: Arc<dyn SyncTokenStore>,
        cache: Arc<VirtualAttrCache>,
        actions: Arc<ActionRegistry>,
        memberships: Arc<DynMembershipEvaluator>,
        propagator: Arc<PropagationOrchestrator>,
    ) -> Self {
        Self {
            gateway,
            directory,
            resolver,
            correlations,
            store,
            tasks,
            remediations,
            tokens,
            cache,
            actions,
            memberships,
            propagator,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Request cancellation of a running task. Returns false when the task
    /// is not currently running. The run stops before its next object.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let running = self
            .running
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match running.get(&task_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Execute a pull task and record one execution with its summary.
    ///
    /// A task already running is rejected with
    /// [`ProvisioningError::ConcurrentModification`].
    #[instrument(skip(self, task), fields(task = %task.id, resource = %task.resource))]
    pub async fn execute(&self, task: &PullTask) -> ProvisioningResult<PullSummary> {
        let cancel = {
            let mut running = self
                .running
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if running.contains_key(&task.id) {
                return Err(ProvisioningError::ConcurrentModification { task_id: task.id });
            }
            let flag = Arc::new(AtomicBool::new(false));
            running.insert(task.id, flag.clone());
            flag
        };

        let started = Utc::now();
        let result = self.run(task, &cancel).await;
        self.running
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&task.id);

        match result {
            Ok(summary) => {
                // Remediated failures keep their payload and are replayable;
                // only unremediated ones fail the execution.
                let status = if summary.fatal() == 0 {
                    ExecStatus::Success
                } else {
                    ExecStatus::Failure
                };
                self.tasks
                    .save_execution(task.id, TaskExecution::now(status, summary.to_string(), started))
                    .await?;
                info!(%summary, "Pull task finished");
                Ok(summary)
            }
            Err(err) => {
                self.tasks
                    .save_execution(
                        task.id,
                        TaskExecution::now(ExecStatus::Failure, err.to_string(), started),
                    )
                    .await?;
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        task: &PullTask,
        cancel: &AtomicBool,
    ) -> ProvisioningResult<PullSummary> {
        let resource = self.directory.get(&task.resource).await.ok_or_else(|| {
            ProvisioningError::task_failure(format!("unknown resource '{}'", task.resource))
        })?;
        let chain = self.actions.resolve_pull(&task.actions).await?;
        let rule = self
            .correlations
            .resolve(task.correlation_rule.as_deref())
            .await?;

        let mut summary = PullSummary::default();

        let mut provisions: Vec<&Provision> = resource.provisions.values().collect();
        provisions.sort_by(|a, b| a.object_class.cmp(&b.object_class));

        for provision in provisions {
            match &task.mode {
                PullMode::Full => {
                    self.pull_listing(task, &resource, provision, None, &rule, &chain, cancel, &mut summary)
                        .await?;
                }
                PullMode::Filtered { filter } => {
                    self.pull_listing(
                        task,
                        &resource,
                        provision,
                        Some(filter),
                        &rule,
                        &chain,
                        cancel,
                        &mut summary,
                    )
                    .await?;
                }
                PullMode::Incremental => {
                    let token = self.tokens.get(&task.resource, provision.kind).await?;
                    let batch = self
                        .gateway
                        .sync(&resource.profile, &provision.object_class, token.as_deref())
                        .await?;
                    let fatal_before = summary.fatal();
                    for event in &batch.events {
                        if cancel.load(Ordering::SeqCst) {
                            summary.interrupted = true;
                            break;
                        }
                        self.handle_event(task, &resource, provision, event, &rule, &chain, &mut summary)
                            .await?;
                    }
                    // At-least-once: the token moves only once the whole
                    // batch has been handled and every failure in it was
                    // captured for remediation.
                    if !summary.interrupted && summary.fatal() == fatal_before {
                        if let Some(new_token) = batch.new_token {
                            self.tokens
                                .set(&task.resource, provision.kind, new_token)
                                .await?;
                        }
                    }
                }
            }
            if summary.interrupted {
                break;
            }
        }

        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pull_listing(
        &self,
        task: &PullTask,
        resource: &Arc<Resource>,
        provision: &Provision,
        filter: Option<&idflow_connector::Filter>,
        rule: &Arc<dyn CorrelationRule>,
        chain: &[Arc<dyn PullAction>],
        cancel: &AtomicBool,
        summary: &mut PullSummary,
    ) -> ProvisioningResult<()> {
        let mut page = PageRequest::new(PAGE_SIZE);
        loop {
            let result = self
                .gateway
                .search(&resource.profile, &provision.object_class, filter, &page)
                .await?;
            for object in result.objects {
                if cancel.load(Ordering::SeqCst) {
                    summary.interrupted = true;
                    return Ok(());
                }
                let event = SyncEvent::upsert(object.uid, object.object_class, object.attributes);
                self.handle_event(task, resource, provision, &event, rule, chain, summary)
                    .await?;
            }
            match result.next_cookie {
                Some(cookie) => page = PageRequest::new(PAGE_SIZE).with_cookie(cookie),
                None => break,
            }
        }
        Ok(())
    }

    async fn handle_event(
        &self,
        task: &PullTask,
        resource: &Arc<Resource>,
        provision: &Provision,
        event: &SyncEvent,
        rule: &Arc<dyn CorrelationRule>,
        chain: &[Arc<dyn PullAction>],
        summary: &mut PullSummary,
    ) -> ProvisioningResult<()> {
        match self
            .process_event(task, resource, provision, event, rule, chain)
            .await
        {
            Ok(outcome) => {
                summary.record(outcome);
                Ok(())
            }
            Err(err) => {
                warn!(uid = %event.uid, %err, "Failed to reconcile pulled object");
                for action in chain {
                    action.on_error(task, event, &err).await;
                }
                summary.failed += 1;
                if task.remediation {
                    let operation = if event.is_delete() {
                        Operation::Delete
                    } else {
                        Operation::Create
                    };
                    self.remediations
                        .save(&Remediation::capture(
                            &task.resource,
                            provision.kind,
                            operation,
                            event.uid.to_string(),
                            event.attributes.clone(),
                            err.to_string(),
                        ))
                        .await?;
                    summary.remediations += 1;
                }
                if task.fail_fast {
                    return Err(ProvisioningError::task_failure(format!(
                        "aborted on first failure: {err}"
                    )));
                }
                Ok(())
            }
        }
    }

    async fn process_event(
        &self,
        task: &PullTask,
        resource: &Arc<Resource>,
        provision: &Provision,
        event: &SyncEvent,
        rule: &Arc<dyn CorrelationRule>,
        chain: &[Arc<dyn PullAction>],
    ) -> ProvisioningResult<PullOutcome> {
        for action in chain {
            action.before(task, event).await?;
        }

        if event.is_delete() {
            return self.process_delete(task, provision, event, chain).await;
        }

        let attributes = event.attributes.clone().unwrap_or_default();
        let pulled = self.resolver.to_local(provision, &attributes).await?;

        match rule
            .correlate(self.store.as_ref(), provision, event, &pulled)
            .await?
        {
            CorrelationOutcome::NoMatch => {
                if !task.perform_create {
                    return Ok(PullOutcome::Ignored);
                }
                let entity = self
                    .create_entity(task, resource, provision, event, &pulled)
                    .await?;
                for action in chain {
                    action.after(task, event, &entity).await?;
                }
                self.propagate_onwards(&entity, Operation::Create, &task.resource)
                    .await?;
                Ok(PullOutcome::Created)
            }
            CorrelationOutcome::Match(entity) => {
                if !task.perform_update {
                    return Ok(PullOutcome::Ignored);
                }
                let entity = self
                    .update_entity(resource, entity, &pulled)
                    .await?;
                for action in chain {
                    action.after(task, event, &entity).await?;
                }
                self.propagate_onwards(&entity, Operation::Update, &task.resource)
                    .await?;
                Ok(PullOutcome::Updated)
            }
            CorrelationOutcome::Ambiguous { count } => {
                Err(ProvisioningError::AmbiguousCorrelation {
                    remote_key: event.uid.to_string(),
                    count,
                })
            }
        }
    }

    async fn process_delete(
        &self,
        task: &PullTask,
        provision: &Provision,
        event: &SyncEvent,
        chain: &[Arc<dyn PullAction>],
    ) -> ProvisioningResult<PullOutcome> {
        // Delete events carry no attributes; correlate on the key item's
        // internal attribute against the remote identifier value.
        let schema = provision
            .mapping
            .conn_object_key_item()
            .map_or("name", |item| item.int_attr_name.as_str());
        let mut matches = self
            .store
            .search(
                provision.kind,
                &[(schema.to_string(), event.uid.value().to_string())],
            )
            .await?;

        match matches.len() {
            0 => Ok(PullOutcome::Ignored),
            1 => {
                let mut entity = matches.remove(0);
                let outcome = if task.unlink_only {
                    entity.resources.remove(&task.resource);
                    self.store.save(&entity).await?;
                    PullOutcome::Unlinked
                } else if task.perform_delete {
                    let mut targets = self.memberships.effective_resources(&entity).await?;
                    targets.remove(&task.resource);
                    self.store.delete(&entity.key).await?;
                    self.cache.invalidate_entity(entity.key).await;
                    if !targets.is_empty() {
                        self.propagator
                            .propagate(
                                &entity,
                                Operation::Delete,
                                &targets,
                                ExecutionMode::Synchronous,
                                &[],
                            )
                            .await?;
                    }
                    PullOutcome::Deleted
                } else {
                    PullOutcome::Ignored
                };
                for action in chain {
                    action.after(task, event, &entity).await?;
                }
                Ok(outcome)
            }
            count => Err(ProvisioningError::AmbiguousCorrelation {
                remote_key: event.uid.to_string(),
                count,
            }),
        }
    }

    async fn create_entity(
        &self,
        task: &PullTask,
        resource: &Arc<Resource>,
        provision: &Provision,
        event: &SyncEvent,
        pulled: &PulledAttrs,
    ) -> ProvisioningResult<Entity> {
        let name = pulled
            .name
            .clone()
            .unwrap_or_else(|| event.uid.value().to_string());
        let mut entity = Entity::new(provision.kind, name);
        apply_pulled(&mut entity, pulled);
        entity.resources.insert(resource.name().to_string());

        let mut virtual_seeds = pulled.virtual_attrs.clone();
        if let Some(template) = task.templates.get(&provision.kind) {
            apply_template(&mut entity, template, &mut virtual_seeds);
        }

        self.store.save(&entity).await?;
        for (schema, values) in virtual_seeds {
            self.cache.put(entity.key, &schema, values).await;
        }
        self.memberships.refresh(&entity).await?;
        Ok(entity)
    }

    async fn update_entity(
        &self,
        resource: &Arc<Resource>,
        mut entity: Entity,
        pulled: &PulledAttrs,
    ) -> ProvisioningResult<Entity> {
        apply_pulled(&mut entity, pulled);
        entity.resources.insert(resource.name().to_string());
        self.store.save(&entity).await?;
        for (schema, values) in &pulled.virtual_attrs {
            self.cache.put(entity.key, schema, values.clone()).await;
        }
        self.memberships.refresh(&entity).await?;
        Ok(entity)
    }

    async fn propagate_onwards(
        &self,
        entity: &Entity,
        operation: Operation,
        source: &str,
    ) -> ProvisioningResult<()> {
        let mut targets = self.memberships.effective_resources(entity).await?;
        targets.remove(source);
        if targets.is_empty() {
            return Ok(());
        }
        // Per-resource outcomes land in the task store; a propagation
        // failure does not fail the pulled object.
        self.propagator
            .propagate(entity, operation, &targets, ExecutionMode::Synchronous, &[])
            .await?;
        Ok(())
    }

    /// Replay a remediation record. On success the record is deleted.
    #[instrument(skip(self), fields(remediation = %id))]
    pub async fn remedy(&self, id: &RemediationId) -> ProvisioningResult<PullOutcome> {
        let record = self
            .remediations
            .get(id)
            .await?
            .ok_or_else(|| crate::error::StoreError::not_found(format!("remediation {id}")))?;

        let resource = self.directory.get(&record.resource).await.ok_or_else(|| {
            ProvisioningError::task_failure(format!("unknown resource '{}'", record.resource))
        })?;
        let provision = resource.provision(record.kind).ok_or_else(|| {
            ProvisioningError::task_failure(format!(
                "resource '{}' has no provision for {}",
                record.resource, record.kind
            ))
        })?;

        let uid = parse_remote_key(&record.remote_key);
        let event = match record.operation {
            Operation::Delete => SyncEvent::deleted(uid, provision.object_class.clone()),
            _ => SyncEvent::upsert(
                uid,
                provision.object_class.clone(),
                record.attributes.clone().unwrap_or_default(),
            ),
        };

        let task = {
            let mut t = PullTask::full(record.resource.clone());
            t.remediation = false;
            t
        };
        let rule = self.correlations.resolve(None).await?;
        let outcome = self
            .process_event(&task, &resource, provision, &event, &rule, &[])
            .await?;
        self.remediations.delete(id).await?;
        Ok(outcome)
    }
}

fn apply_pulled(entity: &mut Entity, pulled: &PulledAttrs) {
    for (schema, value) in &pulled.plain_attrs {
        entity.plain_attrs.insert(schema.clone(), value.clone());
    }
    if let Some(password) = &pulled.password {
        entity.password = Some(password.clone());
    }
}

fn apply_template(
    entity: &mut Entity,
    template: &Template,
    virtual_seeds: &mut HashMap<String, Vec<String>>,
) {
    // Template values are defaults: they never overwrite pulled values.
    for (schema, value) in &template.plain_attrs {
        entity
            .plain_attrs
            .entry(schema.clone())
            .or_insert_with(|| value.clone());
    }
    for (schema, values) in &template.virtual_attrs {
        virtual_seeds
            .entry(schema.clone())
            .or_insert_with(|| values.clone());
    }
    entity.resources.extend(template.resources.iter().cloned());
    entity
        .memberships
        .extend(template.memberships.iter().copied());
}

fn parse_remote_key(remote_key: &str) -> idflow_connector::Uid {
    match remote_key.split_once('=') {
        Some((attr, value)) => idflow_connector::Uid::new(attr, value),
        None => idflow_connector::Uid::from_value(remote_key),
    }
}
