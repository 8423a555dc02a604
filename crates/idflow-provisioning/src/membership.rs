//! Dynamic group membership.
//!
//! Groups may carry a membership condition; entities matching it become
//! implicit members without any explicit assignment. The evaluator refreshes
//! an entity's implicit memberships after each change and reports which
//! resources the entity gained or lost through them.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, instrument};

use idflow_core::{Entity, EntityKey, GroupDef};

use crate::error::ProvisioningResult;
use crate::store::EntityStore;

/// Evaluates an opaque membership condition against an entity.
pub trait PredicateEvaluator: Send + Sync {
    /// True when the entity satisfies the condition.
    fn matches(&self, entity: &Entity, condition: &str) -> bool;
}

/// Minimal condition syntax: `schema==value` terms joined by ` and `.
///
/// The schema name "name" addresses the entity name. Embedders with a real
/// query language plug in their own [`PredicateEvaluator`].
pub struct EqualsPredicateEvaluator;

impl PredicateEvaluator for EqualsPredicateEvaluator {
    fn matches(&self, entity: &Entity, condition: &str) -> bool {
        condition.split(" and ").all(|term| {
            let Some((schema, value)) = term.split_once("==") else {
                return false;
            };
            let (schema, value) = (schema.trim(), value.trim());
            if schema == "name" {
                entity.name == value
            } else {
                entity
                    .attr(schema)
                    .is_some_and(|v| v.values().iter().any(|s| *s == value))
            }
        })
    }
}

/// Membership delta produced by one refresh.
#[derive(Debug, Clone)]
pub struct MembershipOutcome {
    /// Groups the entity just became an implicit member of.
    pub gained: BTreeSet<EntityKey>,
    /// Groups the entity just ceased to be an implicit member of.
    pub lost: BTreeSet<EntityKey>,
    /// Resources now reachable that were not before.
    pub added_resources: BTreeSet<String>,
    /// Resources no longer reachable.
    pub removed_resources: BTreeSet<String>,
    /// Full current resource set: explicit assignments plus every resource
    /// of every (explicit or implicit) group.
    pub effective_resources: BTreeSet<String>,
}

impl MembershipOutcome {
    /// True when the refresh changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.gained.is_empty() && self.lost.is_empty()
    }
}

/// Recomputes implicit memberships and effective resources.
pub struct DynMembershipEvaluator {
    store: Arc<dyn EntityStore>,
    evaluator: Arc<dyn PredicateEvaluator>,
}

impl DynMembershipEvaluator {
    /// Create an evaluator.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, evaluator: Arc<dyn PredicateEvaluator>) -> Self {
        Self { store, evaluator }
    }

    /// Re-evaluate every conditioned group against the entity, persist the
    /// new implicit membership set and report the delta.
    #[instrument(skip(self, entity), fields(entity = %entity.key))]
    pub async fn refresh(&self, entity: &Entity) -> ProvisioningResult<MembershipOutcome> {
        let groups = self.store.groups().await?;
        let by_key: HashMap<EntityKey, &GroupDef> = groups.iter().map(|g| (g.key, g)).collect();

        let previous = self.store.dyn_memberships(&entity.key).await?;
        let current: BTreeSet<EntityKey> = groups
            .iter()
            .filter(|g| {
                g.dynamic_condition
                    .as_deref()
                    .is_some_and(|c| self.evaluator.matches(entity, c))
            })
            .map(|g| g.key)
            .collect();

        let gained: BTreeSet<EntityKey> = current.difference(&previous).copied().collect();
        let lost: BTreeSet<EntityKey> = previous.difference(&current).copied().collect();

        let old_effective = effective_resources(entity, &by_key, &previous);
        let new_effective = effective_resources(entity, &by_key, &current);
        let added_resources = new_effective
            .difference(&old_effective)
            .cloned()
            .collect::<BTreeSet<_>>();
        let removed_resources = old_effective
            .difference(&new_effective)
            .cloned()
            .collect::<BTreeSet<_>>();

        if !gained.is_empty() || !lost.is_empty() {
            debug!(
                gained = gained.len(),
                lost = lost.len(),
                "Implicit memberships changed"
            );
            self.store
                .set_dyn_memberships(&entity.key, current)
                .await?;
        }

        Ok(MembershipOutcome {
            gained,
            lost,
            added_resources,
            removed_resources,
            effective_resources: new_effective,
        })
    }

    /// Current effective resource set of an entity, without re-evaluating
    /// conditions.
    pub async fn effective_resources(
        &self,
        entity: &Entity,
    ) -> ProvisioningResult<BTreeSet<String>> {
        let groups = self.store.groups().await?;
        let by_key: HashMap<EntityKey, &GroupDef> = groups.iter().map(|g| (g.key, g)).collect();
        let implicit = self.store.dyn_memberships(&entity.key).await?;
        Ok(effective_resources(entity, &by_key, &implicit))
    }
}

fn effective_resources(
    entity: &Entity,
    groups: &HashMap<EntityKey, &GroupDef>,
    implicit: &BTreeSet<EntityKey>,
) -> BTreeSet<String> {
    let mut resources = entity.resources.clone();
    for key in entity.memberships.iter().chain(implicit.iter()) {
        if let Some(group) = groups.get(key) {
            resources.extend(group.resources.iter().cloned());
        }
    }
    resources
}
