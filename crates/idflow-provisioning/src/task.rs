//! Task and execution model.
//!
//! Pull, push and propagation tasks, per-resource propagation statuses and
//! execution records.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use idflow_connector::{AttributeSet, Filter, Uid};
use idflow_core::{AttrValue, EntityKey, EntityKind, ExecutionId, TaskId};

/// Operation performed against a resource or the internal store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "CREATE"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
        }
    }
}

/// Outcome of one propagation attempt or execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecStatus {
    /// Task built but not yet executed (asynchronous modes).
    Created,
    /// The operation completed on the target system.
    Success,
    /// The connector call failed.
    Failure,
    /// The capability gate or a mandatory-value gap prevented the call.
    NotAttempted,
}

impl std::fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecStatus::Created => "CREATED",
            ExecStatus::Success => "SUCCESS",
            ExecStatus::Failure => "FAILURE",
            ExecStatus::NotAttempted => "NOT_ATTEMPTED",
        };
        write!(f, "{s}")
    }
}

/// Per-resource outcome of a batch operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationStatus {
    /// Resource the attempt targeted.
    pub resource: String,
    /// Outcome.
    pub status: ExecStatus,
    /// Failure reason, for FAILURE and NOT_ATTEMPTED.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl PropagationStatus {
    /// A successful attempt.
    pub fn success(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            status: ExecStatus::Success,
            failure_reason: None,
        }
    }

    /// A failed attempt with its reason.
    pub fn failure(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            status: ExecStatus::Failure,
            failure_reason: Some(reason.into()),
        }
    }

    /// An attempt stopped before the connector call.
    pub fn not_attempted(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            status: ExecStatus::NotAttempted,
            failure_reason: Some(reason.into()),
        }
    }

    /// A task created but deferred to background execution.
    pub fn created(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            status: ExecStatus::Created,
            failure_reason: None,
        }
    }
}

/// One recorded execution of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    /// Execution identifier.
    pub id: ExecutionId,
    /// Outcome.
    pub status: ExecStatus,
    /// Human-readable message (failure reason or summary).
    pub message: String,
    /// When the execution started.
    pub started_at: DateTime<Utc>,
    /// When the execution ended.
    pub ended_at: DateTime<Utc>,
}

impl TaskExecution {
    /// Record an execution ending now.
    pub fn now(status: ExecStatus, message: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: ExecutionId::new(),
            status,
            message: message.into(),
            started_at,
            ended_at: Utc::now(),
        }
    }
}

/// One queued push of an entity state to a single resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationTask {
    /// Task identifier.
    pub id: TaskId,
    /// Affected entity.
    pub entity_key: EntityKey,
    /// Entity kind.
    pub entity_kind: EntityKind,
    /// Operation to perform.
    pub operation: Operation,
    /// Target resource name.
    pub resource: String,
    /// Remote object class.
    pub object_class: String,
    /// Resolved external attribute payload. Password values are masked
    /// here; cleartext exists only in the in-flight call.
    pub attributes: AttributeSet,
    /// Remote identifier, when known (update/delete).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conn_object_uid: Option<Uid>,
    /// External names of connector-mandatory attributes with no value.
    /// Non-empty forces NOT_ATTEMPTED without any connector call.
    #[serde(default)]
    pub mandatory_missing: Vec<String>,
    /// Ordered execution history.
    #[serde(default)]
    pub executions: Vec<TaskExecution>,
}

impl PropagationTask {
    /// Terminal once a SUCCESS execution has been recorded.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.executions
            .iter()
            .any(|e| e.status == ExecStatus::Success)
    }

    /// The latest recorded execution, if any.
    #[must_use]
    pub fn latest_execution(&self) -> Option<&TaskExecution> {
        self.executions.last()
    }
}

/// Reconciliation mode of a pull task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PullMode {
    /// List every remote object.
    Full,
    /// Follow the change stream from the stored sync token.
    Incremental,
    /// List remote objects matching a reconciliation filter.
    Filtered {
        /// The filter, consumed opaquely by the connector.
        filter: Filter,
    },
}

/// Default attribute/resource/membership values merged into pulled entities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Template {
    /// Plain attribute defaults (additive; never overwrite mapped values).
    #[serde(default)]
    pub plain_attrs: HashMap<String, AttrValue>,
    /// Virtual attribute defaults, seeded into the cache.
    #[serde(default)]
    pub virtual_attrs: HashMap<String, Vec<String>>,
    /// Resource assignments.
    #[serde(default)]
    pub resources: BTreeSet<String>,
    /// Group memberships.
    #[serde(default)]
    pub memberships: BTreeSet<EntityKey>,
}

/// A scheduled or ad-hoc pull reconciliation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullTask {
    /// Task identifier.
    pub id: TaskId,
    /// Source resource name.
    pub resource: String,
    /// Reconciliation mode.
    pub mode: PullMode,
    /// Allow creating internal entities.
    pub perform_create: bool,
    /// Allow updating internal entities.
    pub perform_update: bool,
    /// Allow deleting internal entities.
    pub perform_delete: bool,
    /// On delete events, unlink the resource instead of deleting the entity.
    #[serde(default)]
    pub unlink_only: bool,
    /// Per-entity-kind templates applied on CREATE.
    #[serde(default)]
    pub templates: HashMap<EntityKind, Template>,
    /// Ordered pull action ids (before/after hooks).
    #[serde(default)]
    pub actions: Vec<String>,
    /// Correlation rule override id.
    #[serde(default)]
    pub correlation_rule: Option<String>,
    /// Record non-reconcilable events instead of dropping them.
    pub remediation: bool,
    /// Abort the task on the first per-object failure.
    #[serde(default)]
    pub fail_fast: bool,
}

impl PullTask {
    /// A full-reconciliation task with create/update/delete enabled and
    /// remediation on.
    pub fn full(resource: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            resource: resource.into(),
            mode: PullMode::Full,
            perform_create: true,
            perform_update: true,
            perform_delete: true,
            unlink_only: false,
            templates: HashMap::new(),
            actions: Vec::new(),
            correlation_rule: None,
            remediation: true,
            fail_fast: false,
        }
    }

    /// Builder-style mode.
    #[must_use]
    pub fn with_mode(mut self, mode: PullMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builder-style template.
    #[must_use]
    pub fn with_template(mut self, kind: EntityKind, template: Template) -> Self {
        self.templates.insert(kind, template);
        self
    }
}

/// A scheduled or ad-hoc push job: propagate matching entities to a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTask {
    /// Task identifier.
    pub id: TaskId,
    /// Target resource name.
    pub resource: String,
    /// Entity kind to push.
    pub kind: EntityKind,
    /// Ordered propagation action ids.
    #[serde(default)]
    pub actions: Vec<String>,
}

impl PushTask {
    /// Push all entities of a kind to a resource.
    pub fn new(resource: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id: TaskId::new(),
            resource: resource.into(),
            kind,
            actions: Vec::new(),
        }
    }
}
