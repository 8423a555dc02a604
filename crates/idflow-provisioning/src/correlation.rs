//! Correlation of remote objects to internal entities.
//!
//! Every pulled object is matched against the internal store before any
//! write. Zero matches lead to a create, exactly one to an update; more
//! than one is never auto-resolved.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use idflow_connector::SyncEvent;
use idflow_core::Entity;

use crate::error::{ProvisioningError, ProvisioningResult};
use crate::mapping::PulledAttrs;
use crate::resource::Provision;
use crate::store::EntityStore;

/// Result of correlating one remote object.
#[derive(Debug, Clone)]
pub enum CorrelationOutcome {
    /// No internal entity matches; a create is in order.
    NoMatch,
    /// Exactly one entity matches; an update is in order.
    Match(Entity),
    /// Several entities match; the object cannot be reconciled.
    Ambiguous {
        /// Number of matching entities.
        count: usize,
    },
}

/// Pluggable correlation strategy.
#[async_trait]
pub trait CorrelationRule: Send + Sync {
    /// Match a remote object against the internal store.
    async fn correlate(
        &self,
        store: &dyn EntityStore,
        provision: &Provision,
        event: &SyncEvent,
        pulled: &PulledAttrs,
    ) -> ProvisioningResult<CorrelationOutcome>;
}

impl std::fmt::Debug for dyn CorrelationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn CorrelationRule")
    }
}

/// Equality conjunction over a configured list of schemas.
///
/// Each schema's pulled value becomes one equality criterion; the schema
/// name "name" addresses the entity name. An object yielding no value for
/// any configured schema cannot be correlated and counts as no match.
pub struct DefaultCorrelationRule {
    schemas: Vec<String>,
}

impl DefaultCorrelationRule {
    /// Correlate on the given schemas.
    #[must_use]
    pub fn new(schemas: Vec<String>) -> Self {
        Self { schemas }
    }

    /// Correlate on the entity name only.
    #[must_use]
    pub fn by_name() -> Self {
        Self::new(vec!["name".to_string()])
    }
}

#[async_trait]
impl CorrelationRule for DefaultCorrelationRule {
    async fn correlate(
        &self,
        store: &dyn EntityStore,
        provision: &Provision,
        event: &SyncEvent,
        pulled: &PulledAttrs,
    ) -> ProvisioningResult<CorrelationOutcome> {
        let mut criteria = Vec::with_capacity(self.schemas.len());
        for schema in &self.schemas {
            let value = if schema == "name" {
                pulled.name.clone()
            } else {
                pulled
                    .plain_attrs
                    .get(schema)
                    .and_then(|v| v.first().map(str::to_string))
            };
            match value {
                Some(v) => criteria.push((schema.clone(), v)),
                None => {
                    debug!(uid = %event.uid, schema, "No pulled value for correlation schema");
                    return Ok(CorrelationOutcome::NoMatch);
                }
            }
        }

        let mut matches = store.search(provision.kind, &criteria).await?;
        Ok(match matches.len() {
            0 => CorrelationOutcome::NoMatch,
            1 => CorrelationOutcome::Match(matches.remove(0)),
            count => CorrelationOutcome::Ambiguous { count },
        })
    }
}

/// Registry of named correlation rules, with a default for tasks that name
/// none.
pub struct CorrelationRegistry {
    rules: RwLock<HashMap<String, Arc<dyn CorrelationRule>>>,
    default: Arc<dyn CorrelationRule>,
}

impl CorrelationRegistry {
    /// A registry whose default rule correlates on the entity name.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            default: Arc::new(DefaultCorrelationRule::by_name()),
        }
    }

    /// Replace the default rule.
    #[must_use]
    pub fn with_default(mut self, rule: Arc<dyn CorrelationRule>) -> Self {
        self.default = rule;
        self
    }

    /// Register a named rule.
    pub async fn register(&self, id: impl Into<String>, rule: Arc<dyn CorrelationRule>) {
        self.rules.write().await.insert(id.into(), rule);
    }

    /// Resolve a rule id, falling back to the default when none is named.
    pub async fn resolve(
        &self,
        id: Option<&str>,
    ) -> ProvisioningResult<Arc<dyn CorrelationRule>> {
        match id {
            None => Ok(self.default.clone()),
            Some(id) => self
                .rules
                .read()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| ProvisioningError::UnknownExtension { id: id.to_string() }),
        }
    }
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Mapping;
    use crate::store::InMemoryEntityStore;
    use idflow_connector::{AttributeSet, Uid};
    use idflow_core::EntityKind;

    fn provision() -> Provision {
        Provision::new(EntityKind::User, "account", Mapping::default())
    }

    fn upsert(name: &str) -> SyncEvent {
        SyncEvent::upsert(Uid::from_value(name), "account", AttributeSet::new())
    }

    fn pulled_named(name: &str) -> PulledAttrs {
        PulledAttrs {
            name: Some(name.to_string()),
            ..PulledAttrs::default()
        }
    }

    #[tokio::test]
    async fn zero_one_many() {
        let store = InMemoryEntityStore::new();
        store
            .save(&Entity::new(EntityKind::User, "alice").with_attr("dept", "eng"))
            .await
            .unwrap();
        store
            .save(&Entity::new(EntityKind::User, "bob").with_attr("dept", "eng"))
            .await
            .unwrap();

        let rule = DefaultCorrelationRule::by_name();
        let provision = provision();

        let outcome = rule
            .correlate(&store, &provision, &upsert("carol"), &pulled_named("carol"))
            .await
            .unwrap();
        assert!(matches!(outcome, CorrelationOutcome::NoMatch));

        let outcome = rule
            .correlate(&store, &provision, &upsert("alice"), &pulled_named("alice"))
            .await
            .unwrap();
        match outcome {
            CorrelationOutcome::Match(e) => assert_eq!(e.name, "alice"),
            other => panic!("expected match, got {other:?}"),
        }

        let by_dept = DefaultCorrelationRule::new(vec!["dept".to_string()]);
        let pulled = PulledAttrs {
            plain_attrs: [("dept".to_string(), "eng".into())].into_iter().collect(),
            ..PulledAttrs::default()
        };
        let outcome = by_dept
            .correlate(&store, &provision, &upsert("x"), &pulled)
            .await
            .unwrap();
        assert!(matches!(outcome, CorrelationOutcome::Ambiguous { count: 2 }));
    }

    #[tokio::test]
    async fn missing_correlation_value_is_no_match() {
        let store = InMemoryEntityStore::new();
        let rule = DefaultCorrelationRule::by_name();
        let outcome = rule
            .correlate(&store, &provision(), &upsert("x"), &PulledAttrs::default())
            .await
            .unwrap();
        assert!(matches!(outcome, CorrelationOutcome::NoMatch));
    }

    #[tokio::test]
    async fn registry_falls_back_to_default() {
        let registry = CorrelationRegistry::new();
        assert!(registry.resolve(None).await.is_ok());
        assert!(matches!(
            registry.resolve(Some("ghost")).await.unwrap_err(),
            ProvisioningError::UnknownExtension { .. }
        ));
    }
}
