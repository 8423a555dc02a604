//! # idflow-provisioning
//!
//! Provisioning and reconciliation on top of [`idflow-connector`]:
//!
//! - **Mapping resolution** translates internal entity state to external
//!   attribute payloads and back, applying transformer chains, password
//!   handling and the connector-object key.
//! - **Propagation** fans one internal change out to every affected
//!   resource: prioritized resources first, sequentially, then the rest
//!   concurrently; failures stay isolated per resource and mandatory-value
//!   gaps stop an attempt before any remote call.
//! - **Pull reconciliation** fetches remote state (full, incremental or
//!   filtered), correlates each object against the internal store, applies
//!   create/update/delete handling with additive templates, and routes
//!   non-reconcilable objects to remediation. Sync tokens advance only
//!   after a batch is processed (at-least-once).
//! - **Dynamic membership** re-evaluates conditioned groups after each
//!   entity change and reports gained/lost resources.
//! - **Virtual attributes** are cached per (entity, schema) with a TTL and
//!   invalidated by successful propagations.
//!
//! Persistence is pluggable through the store traits in [`store`];
//! in-memory implementations back tests and small embeddings.
//!
//! [`idflow-connector`]: idflow_connector

pub mod correlation;
pub mod error;
pub mod hooks;
pub mod mapping;
pub mod membership;
pub mod propagation;
pub mod pull;
pub mod remediation;
pub mod resource;
pub mod store;
pub mod task;
pub mod transform;
pub mod vcache;

pub use correlation::{
    CorrelationOutcome, CorrelationRegistry, CorrelationRule, DefaultCorrelationRule,
};
pub use error::{ProvisioningError, ProvisioningResult, StoreError};
pub use hooks::{ActionRegistry, PropagationAction, PullAction};
pub use mapping::{MappingResolver, PreparedAttrs, PulledAttrs, PASSWORD_MASK};
pub use membership::{
    DynMembershipEvaluator, EqualsPredicateEvaluator, MembershipOutcome, PredicateEvaluator,
};
pub use propagation::{ExecutionMode, PropagationOrchestrator};
pub use pull::{PullEngine, PullOutcome, PullSummary};
pub use remediation::{Remediation, RemediationService};
pub use resource::{Mapping, MappingItem, Provision, Purpose, Resource, ResourceDirectory};
pub use store::{
    EntityStore, InMemoryEntityStore, InMemoryRemediationStore, InMemorySyncTokenStore,
    InMemoryTaskStore, RemediationStore, SyncTokenStore, TaskStore,
};
pub use task::{
    ExecStatus, Operation, PropagationStatus, PropagationTask, PullMode, PullTask, PushTask,
    TaskExecution, Template,
};
pub use transform::{ItemTransformer, TransformerRegistry};
pub use vcache::{VirtualAttrCache, VirtualAttrResolver};
