//! # idflow-connector
//!
//! Uniform, capability-gated access to external identity systems.
//!
//! The crate follows a capability-based trait design: connectors implement
//! only the operations their target system supports ([`CreateOp`],
//! [`UpdateOp`], [`DeleteOp`], [`SearchOp`], [`SyncOp`]), advertise a
//! [`CapabilitySet`], and are reached exclusively through the
//! [`ConnectorGateway`], which:
//!
//! - computes the **effective capability set** per resource (override set if
//!   the resource's override flag is on, the connector's native set
//!   otherwise) and rejects unsupported operations before any remote call;
//! - merges per-resource configuration overrides over the connector's base
//!   configuration when instantiating pooled instances;
//! - bounds concurrent live calls per instance and wraps every call in the
//!   configured per-operation timeout.
//!
//! Errors carry a transient/permanent classification so callers can decide
//! about retries; the gateway itself never retries.

pub mod config;
pub mod error;
pub mod gateway;
pub mod operation;
pub mod registry;
pub mod traits;
pub mod types;

pub use config::{ConnectorConfig, PoolSettings};
pub use error::{ConnectorError, ConnectorResult};
pub use gateway::{ConnectorGateway, ResourceProfile};
pub use operation::{
    AttributeSet, ChangeKind, ExtValue, Filter, PageRequest, RemoteObject, SearchPage, SyncBatch,
    SyncEvent, Uid,
};
pub use registry::{BoxedConnector, ConnectorFactory, ConnectorRegistry, FullConnector};
pub use traits::{Connector, CreateOp, DeleteOp, SearchOp, SyncOp, UpdateOp};
pub use types::{effective_capabilities, Capability, CapabilitySet, TraceLevel};

// Re-export async_trait for connector implementors.
pub use async_trait::async_trait;
