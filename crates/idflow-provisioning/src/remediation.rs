//! Remediation records.
//!
//! When a pull task cannot reconcile a remote object (ambiguous correlation,
//! validation failure, store conflict) and remediation is enabled, the
//! object and the intended operation are captured for an operator to replay
//! or discard. Without remediation the object is only counted as failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use idflow_connector::AttributeSet;
use idflow_core::{EntityKind, RemediationId};

use crate::error::{ProvisioningResult, StoreError};
use crate::store::RemediationStore;
use crate::task::Operation;

/// A captured non-reconcilable pull event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Remediation {
    /// Record identifier.
    pub id: RemediationId,
    /// Resource the object was pulled from.
    pub resource: String,
    /// Entity kind the provision maps to.
    pub kind: EntityKind,
    /// Operation that was intended.
    pub operation: Operation,
    /// Remote identifier of the object.
    pub remote_key: String,
    /// Remote attributes at pull time; absent for delete events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<AttributeSet>,
    /// Why reconciliation failed.
    pub error: String,
    /// When the record was captured.
    pub created_at: DateTime<Utc>,
}

impl Remediation {
    /// Capture a failed pull event.
    pub fn capture(
        resource: impl Into<String>,
        kind: EntityKind,
        operation: Operation,
        remote_key: impl Into<String>,
        attributes: Option<AttributeSet>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: RemediationId::new(),
            resource: resource.into(),
            kind,
            operation,
            remote_key: remote_key.into(),
            attributes,
            error: error.into(),
            created_at: Utc::now(),
        }
    }
}

/// Operator-facing view over stored remediations.
///
/// Replaying a record is the pull engine's job; this service only lists,
/// reads and discards.
pub struct RemediationService {
    store: Arc<dyn RemediationStore>,
}

impl RemediationService {
    /// Create a service over a store.
    #[must_use]
    pub fn new(store: Arc<dyn RemediationStore>) -> Self {
        Self { store }
    }

    /// All pending records, oldest first.
    pub async fn list(&self) -> ProvisioningResult<Vec<Remediation>> {
        Ok(self.store.list().await?)
    }

    /// One record by id.
    pub async fn get(&self, id: &RemediationId) -> ProvisioningResult<Remediation> {
        Ok(self
            .store
            .get(id)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("remediation {id}")))?)
    }

    /// Discard a record without replaying it.
    pub async fn discard(&self, id: &RemediationId) -> ProvisioningResult<()> {
        Ok(self.store.delete(id).await?)
    }
}
