//! Connector error types with transient/permanent classification.

use thiserror::Error;

use idflow_core::ConnectorId;

/// Error raised by connector operations or the gateway in front of them.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Failed to establish a connection to the target system.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The per-operation timeout elapsed before the target answered.
    #[error("operation timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// The target system reported a transient condition.
    #[error("target system unavailable: {message}")]
    TargetUnavailable { message: String },

    /// The required capability is absent from the effective capability set.
    /// The remote call was never issued.
    #[error("operation not supported by resource '{resource}': requires {capability}")]
    Unsupported {
        resource: String,
        capability: String,
    },

    /// Connector configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// No connector registered under the requested bundle.
    #[error("connector not found: {connector_id}")]
    ConnectorNotFound { connector_id: ConnectorId },

    /// Object already exists in the target system.
    #[error("object already exists: {identifier}")]
    ObjectAlreadyExists { identifier: String },

    /// Object not found in the target system.
    #[error("object not found: {identifier}")]
    ObjectNotFound { identifier: String },

    /// The target system rejected the operation.
    #[error("operation failed: {message}")]
    OperationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The sync token is no longer accepted by the target system.
    #[error("sync token invalid or expired")]
    InvalidSyncToken,
}

impl ConnectorError {
    /// Transient errors may resolve on their own; callers may retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::ConnectionFailed { .. }
                | ConnectorError::Timeout { .. }
                | ConnectorError::TargetUnavailable { .. }
        )
    }

    /// Permanent errors require configuration or data changes.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Create a connection-failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an operation-failed error.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(resource: impl Into<String>, capability: impl std::fmt::Display) -> Self {
        ConnectorError::Unsupported {
            resource: resource.into(),
            capability: capability.to_string(),
        }
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
