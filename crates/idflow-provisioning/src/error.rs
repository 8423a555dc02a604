//! Provisioning error taxonomy.

use thiserror::Error;

use idflow_connector::ConnectorError;
use idflow_core::{TaskId, ValidationError};

/// Error raised by the provisioning and reconciliation engines.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// Pre-connector validation failure; never retried automatically.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Connector or gateway failure; transient variants are retryable by
    /// the caller.
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// More than one internal entity matched a remote object.
    #[error("ambiguous correlation: {count} entities match remote object '{remote_key}'")]
    AmbiguousCorrelation { remote_key: String, count: usize },

    /// The task is already running; the new invocation was rejected.
    #[error("task {task_id} is already running")]
    ConcurrentModification { task_id: TaskId },

    /// An extension point id has no registered implementation.
    #[error("no implementation registered for extension '{id}'")]
    UnknownExtension { id: String },

    /// Task-level failure (fetch phase, unknown resource, fail-fast abort).
    #[error("task failed: {message}")]
    TaskFailure { message: String },

    /// Storage layer failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProvisioningError {
    /// Convenience constructor for a task-level failure.
    pub fn task_failure(message: impl Into<String>) -> Self {
        ProvisioningError::TaskFailure {
            message: message.into(),
        }
    }
}

/// Error raised by the persistence collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness or integrity constraint was violated.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// The referenced record does not exist.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Any other storage failure.
    #[error("storage error: {message}")]
    Internal { message: String },
}

impl StoreError {
    /// Convenience constructor for a conflict.
    pub fn conflict(message: impl Into<String>) -> Self {
        StoreError::Conflict {
            message: message.into(),
        }
    }

    /// Convenience constructor for a missing record.
    pub fn not_found(message: impl Into<String>) -> Self {
        StoreError::NotFound {
            message: message.into(),
        }
    }
}

/// Result type for provisioning operations.
pub type ProvisioningResult<T> = Result<T, ProvisioningError>;
