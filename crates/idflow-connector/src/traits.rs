//! Capability-based connector traits.
//!
//! Connectors implement only the operations the target system supports.
//! The gateway checks the effective capability set before dispatching, so a
//! missing capability is reported without a remote call ever being issued.

use async_trait::async_trait;

use crate::error::ConnectorResult;
use crate::operation::{AttributeSet, Filter, PageRequest, RemoteObject, SearchPage, SyncBatch, Uid};

/// Base trait for all connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Bundle identifier of this implementation.
    fn bundle(&self) -> &str;

    /// Test connectivity to the target system.
    async fn test_connection(&self) -> ConnectorResult<()>;

    /// Release held resources; called when the instance is evicted.
    async fn dispose(&self) -> ConnectorResult<()> {
        Ok(())
    }
}

/// Create objects in the target system.
#[async_trait]
pub trait CreateOp: Connector {
    /// Create a new object, returning its remote identifier.
    async fn create(&self, object_class: &str, attributes: AttributeSet) -> ConnectorResult<Uid>;
}

/// Update existing objects.
#[async_trait]
pub trait UpdateOp: Connector {
    /// Apply the given attribute values to an existing object.
    ///
    /// Returns the (possibly renamed) remote identifier.
    async fn update(
        &self,
        object_class: &str,
        uid: &Uid,
        attributes: AttributeSet,
    ) -> ConnectorResult<Uid>;
}

/// Delete objects.
#[async_trait]
pub trait DeleteOp: Connector {
    /// Delete an object from the target system.
    async fn delete(&self, object_class: &str, uid: &Uid) -> ConnectorResult<()>;
}

/// Search and read objects.
#[async_trait]
pub trait SearchOp: Connector {
    /// Search for objects matching an optional filter, one page at a time.
    async fn search(
        &self,
        object_class: &str,
        filter: Option<&Filter>,
        page: &PageRequest,
    ) -> ConnectorResult<SearchPage>;

    /// Read a single object by its remote identifier.
    async fn read(&self, object_class: &str, uid: &Uid) -> ConnectorResult<Option<RemoteObject>> {
        let filter = Filter::eq(uid.attribute_name(), uid.value());
        let page = self
            .search(object_class, Some(&filter), &PageRequest::new(2))
            .await?;
        Ok(page.objects.into_iter().next())
    }
}

/// Incremental change detection via sync tokens.
#[async_trait]
pub trait SyncOp: Connector {
    /// Fetch changes since the given token.
    ///
    /// A `None` token asks for an initial sync: all current objects are
    /// reported as upserts together with a fresh token.
    async fn sync(&self, object_class: &str, token: Option<&str>) -> ConnectorResult<SyncBatch>;
}
