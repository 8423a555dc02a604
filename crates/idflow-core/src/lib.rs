//! # idflow-core
//!
//! Core identity model shared by the idflow provisioning engine:
//! strongly typed identifiers, the internal entity representation
//! (users, groups, any-objects), plain attribute values, schema
//! definitions and the validation error taxonomy.
//!
//! This crate is deliberately free of I/O: everything here is plain data
//! consumed by `idflow-connector` and `idflow-provisioning`.

pub mod attr;
pub mod entity;
pub mod error;
pub mod ids;

pub use attr::AttrValue;
pub use entity::{Entity, EntityKind, GroupDef, SchemaClass, SchemaDef};
pub use error::ValidationError;
pub use ids::{ConnectorId, EntityKey, ExecutionId, ParseIdError, RemediationId, TaskId};
