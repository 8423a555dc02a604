//! Mapping resolution.
//!
//! Translates internal entity state into external attribute payloads (push)
//! and external attributes back into internal values (pull), honoring item
//! purposes, transformer chains, password handling and the connector-object
//! key.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use idflow_connector::{AttributeSet, ExtValue, Uid};
use idflow_core::{AttrValue, Entity, EntityKind, SchemaClass};

use crate::error::{ProvisioningError, ProvisioningResult};
use crate::resource::{MappingItem, Provision, Resource};
use crate::store::EntityStore;
use crate::transform::{apply_backward, apply_forward, TransformerRegistry};
use crate::vcache::VirtualAttrCache;

/// Placeholder stored in persisted task payloads in place of a password.
pub const PASSWORD_MASK: &str = "<hidden>";

/// Outcome of resolving a mapping in the push direction.
#[derive(Debug, Clone)]
pub struct PreparedAttrs {
    /// Payload for the connector call, cleartext password included.
    pub attributes: AttributeSet,
    /// Payload safe to persist on the task: password values are masked.
    pub persisted: AttributeSet,
    /// Remote identifier derived from the connector-object key item.
    pub uid: Option<Uid>,
    /// External names of mandatory attributes that resolved to no value.
    pub mandatory_missing: Vec<String>,
}

/// Outcome of resolving a mapping in the pull direction.
#[derive(Debug, Clone, Default)]
pub struct PulledAttrs {
    /// Internal entity name, when the mapping binds one.
    pub name: Option<String>,
    /// Cleartext password, when the mapping pulls one.
    pub password: Option<String>,
    /// Plain attribute values keyed by schema name.
    pub plain_attrs: HashMap<String, AttrValue>,
    /// Virtual attribute values, to be seeded into the cache.
    pub virtual_attrs: HashMap<String, Vec<String>>,
}

/// Resolves mappings in both directions.
pub struct MappingResolver {
    store: Arc<dyn EntityStore>,
    transformers: Arc<TransformerRegistry>,
    cache: Arc<VirtualAttrCache>,
}

impl MappingResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore>,
        transformers: Arc<TransformerRegistry>,
        cache: Arc<VirtualAttrCache>,
    ) -> Self {
        Self {
            store,
            transformers,
            cache,
        }
    }

    /// Resolve the push payload for an entity on a resource.
    ///
    /// Pull-only items are skipped; the connector-object key item always
    /// contributes the remote identifier, whatever its purpose. Read-only
    /// virtual items never enter the payload. An item is recorded as
    /// missing-mandatory when it is connector-mandatory, or schema-mandatory
    /// on a resource that enforces the mandatory condition, and resolves to
    /// no value.
    #[instrument(skip(self, entity, resource), fields(entity = %entity.key, resource = %resource.name()))]
    pub async fn to_remote(
        &self,
        entity: &Entity,
        resource: &Resource,
    ) -> ProvisioningResult<PreparedAttrs> {
        let provision = require_provision(resource, entity.kind)?;

        let mut attributes = AttributeSet::new();
        let mut persisted = AttributeSet::new();
        let mut uid = None;
        let mut mandatory_missing = Vec::new();

        for item in &provision.mapping.items {
            if !item.purpose.includes_propagation() && !item.conn_object_key {
                continue;
            }

            let schema = self
                .store
                .schema(entity.kind, &item.int_attr_name)
                .await?;
            let virtual_schema = schema
                .as_ref()
                .is_some_and(|s| s.class == SchemaClass::Virtual);
            let read_only = schema.as_ref().is_some_and(|s| s.read_only);

            let derived_expr = schema
                .as_ref()
                .filter(|s| s.class == SchemaClass::Derived)
                .and_then(|s| s.expression.as_deref());

            let raw = if item.password {
                entity.password.clone().into_iter().collect()
            } else if item.int_attr_name == "name" {
                vec![entity.name.clone()]
            } else if let Some(expression) = derived_expr {
                let value = derive_value(entity, expression);
                if value.is_empty() {
                    Vec::new()
                } else {
                    vec![value]
                }
            } else if virtual_schema {
                self.cache
                    .peek(entity.key, &item.int_attr_name)
                    .await
                    .unwrap_or_default()
            } else {
                entity
                    .attr(&item.int_attr_name)
                    .map(|v| v.values().iter().map(|s| s.to_string()).collect())
                    .unwrap_or_default()
            };

            let chain = self.transformers.resolve(&item.transformers).await?;
            let values: Vec<String> = apply_forward(&chain, raw)
                .into_iter()
                .filter(|v| !v.is_empty())
                .collect();

            if item.conn_object_key {
                if let Some(first) = values.first() {
                    uid = Some(Uid::new(key_attr_name(item), first.clone()));
                }
                if !item.purpose.includes_propagation() {
                    continue;
                }
            }

            let schema_mandatory = schema.as_ref().is_some_and(|s| s.mandatory);
            let required =
                item.mandatory || (resource.enforce_mandatory_condition && schema_mandatory);
            if values.is_empty() {
                if required {
                    mandatory_missing.push(display_name(item).to_string());
                }
                continue;
            }

            if virtual_schema && read_only {
                debug!(attr = %item.int_attr_name, "Skipping read-only virtual attribute");
                continue;
            }

            if item.ext_attr_name.is_empty() {
                continue;
            }

            attributes.set(&item.ext_attr_name, ext_value(values.clone()));
            if item.password {
                persisted.set(&item.ext_attr_name, PASSWORD_MASK);
            } else {
                persisted.set(&item.ext_attr_name, ext_value(values));
            }
        }

        mandatory_missing.sort();
        Ok(PreparedAttrs {
            attributes,
            persisted,
            uid,
            mandatory_missing,
        })
    }

    /// Resolve external attributes into internal values.
    ///
    /// Push-only items are skipped; transformer chains run inverted, last
    /// transformer first. Virtual values are returned separately so the
    /// caller can seed the cache instead of the store.
    pub async fn to_local(
        &self,
        provision: &Provision,
        attributes: &AttributeSet,
    ) -> ProvisioningResult<PulledAttrs> {
        let mut pulled = PulledAttrs::default();

        for item in &provision.mapping.items {
            if !item.purpose.includes_pull() {
                continue;
            }
            if item.ext_attr_name.is_empty() {
                continue;
            }
            let Some(ext) = attributes.get(&item.ext_attr_name) else {
                continue;
            };

            let chain = self.transformers.resolve(&item.transformers).await?;
            let values: Vec<String> = apply_backward(&chain, ext.as_strings())
                .into_iter()
                .filter(|v| !v.is_empty())
                .collect();
            if values.is_empty() {
                continue;
            }

            if item.password {
                pulled.password = values.into_iter().next();
                continue;
            }
            if item.int_attr_name == "name" {
                pulled.name = values.into_iter().next();
                continue;
            }

            let schema = self
                .store
                .schema(provision.kind, &item.int_attr_name)
                .await?;
            if schema
                .as_ref()
                .is_some_and(|s| s.class == SchemaClass::Virtual)
            {
                pulled
                    .virtual_attrs
                    .insert(item.int_attr_name.clone(), values);
            } else {
                pulled
                    .plain_attrs
                    .insert(item.int_attr_name.clone(), AttrValue::from_values(values));
            }
        }

        Ok(pulled)
    }

    /// The internal value the connector-object key item reads from an
    /// entity, transformer chain applied.
    pub async fn key_value(
        &self,
        entity: &Entity,
        provision: &Provision,
    ) -> ProvisioningResult<Option<String>> {
        let Some(item) = provision.mapping.conn_object_key_item() else {
            return Ok(None);
        };
        let raw = if item.int_attr_name == "name" {
            vec![entity.name.clone()]
        } else {
            entity
                .attr(&item.int_attr_name)
                .map(|v| v.values().iter().map(|s| s.to_string()).collect())
                .unwrap_or_default()
        };
        let chain = self.transformers.resolve(&item.transformers).await?;
        Ok(apply_forward(&chain, raw).into_iter().next())
    }
}

fn require_provision(resource: &Resource, kind: EntityKind) -> ProvisioningResult<&Provision> {
    resource.provision(kind).ok_or_else(|| {
        ProvisioningError::task_failure(format!(
            "resource '{}' has no provision for {kind}",
            resource.name()
        ))
    })
}

fn key_attr_name(item: &MappingItem) -> &str {
    if item.ext_attr_name.is_empty() {
        "uid"
    } else {
        &item.ext_attr_name
    }
}

fn display_name(item: &MappingItem) -> &str {
    if item.ext_attr_name.is_empty() {
        &item.int_attr_name
    } else {
        &item.ext_attr_name
    }
}

/// Evaluate a derived-schema expression: literal text with `{schema}`
/// placeholders replaced by the first plain value of that schema (`{name}`
/// by the entity name). Unresolvable placeholders expand to nothing.
fn derive_value(entity: &Entity, expression: &str) -> String {
    let mut out = String::new();
    let mut rest = expression;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let Some(end) = rest[start + 1..].find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let schema = &rest[start + 1..start + 1 + end];
        if schema == "name" {
            out.push_str(&entity.name);
        } else if let Some(value) = entity.attr(schema).and_then(AttrValue::first) {
            out.push_str(value);
        }
        rest = &rest[start + end + 2..];
    }
    out.push_str(rest);
    out
}

fn ext_value(mut values: Vec<String>) -> ExtValue {
    if values.len() == 1 {
        ExtValue::String(values.remove(0))
    } else {
        ExtValue::Multi(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Mapping, MappingItem, Purpose, Resource};
    use crate::store::InMemoryEntityStore;
    use idflow_connector::{ConnectorConfig, ResourceProfile};
    use idflow_core::{EntityKey, SchemaDef};
    use std::time::Duration;

    fn resolver_with(store: Arc<InMemoryEntityStore>) -> MappingResolver {
        MappingResolver::new(
            store,
            Arc::new(TransformerRegistry::with_builtins()),
            Arc::new(VirtualAttrCache::new(Duration::from_secs(60))),
        )
    }

    fn resource_with(mapping: Mapping) -> Resource {
        Resource::new(ResourceProfile::new(
            "ldap",
            ConnectorConfig::new("mock", "1.0"),
        ))
        .with_provision(Provision::new(EntityKind::User, "account", mapping))
    }

    #[tokio::test]
    async fn push_applies_transformers_and_derives_uid() {
        let store = InMemoryEntityStore::shared();
        let resolver = resolver_with(store);
        let resource = resource_with(Mapping::new(vec![
            MappingItem::new("name", "uid")
                .as_conn_object_key()
                .with_transformers(vec!["lowercase".to_string()]),
            MappingItem::new("email", "mail"),
        ]));

        let entity =
            Entity::new(EntityKind::User, "Alice").with_attr("email", "alice@example.com");
        let prepared = resolver.to_remote(&entity, &resource).await.unwrap();

        assert_eq!(prepared.uid.as_ref().unwrap().value(), "alice");
        assert_eq!(prepared.attributes.get_first("uid").as_deref(), Some("alice"));
        assert_eq!(
            prepared.attributes.get_first("mail").as_deref(),
            Some("alice@example.com")
        );
        assert!(prepared.mandatory_missing.is_empty());
    }

    #[tokio::test]
    async fn push_collects_missing_mandatory() {
        let store = InMemoryEntityStore::shared();
        let resolver = resolver_with(store);
        let resource = resource_with(Mapping::new(vec![
            MappingItem::new("name", "uid").as_conn_object_key(),
            MappingItem::new("email", "mail").mandatory(),
            MappingItem::new("phone", "telephoneNumber").mandatory(),
        ]));

        let entity = Entity::new(EntityKind::User, "bob");
        let prepared = resolver.to_remote(&entity, &resource).await.unwrap();

        assert_eq!(prepared.mandatory_missing, vec!["mail", "telephoneNumber"]);
        assert!(!prepared.attributes.has("mail"));
    }

    #[tokio::test]
    async fn schema_mandatory_enforced_only_when_flagged() {
        let store = InMemoryEntityStore::shared();
        store
            .save_schema(EntityKind::User, SchemaDef::plain("email").mandatory())
            .await
            .unwrap();
        let resolver = resolver_with(store);

        let mapping = Mapping::new(vec![
            MappingItem::new("name", "uid").as_conn_object_key(),
            MappingItem::new("email", "mail"),
        ]);
        let entity = Entity::new(EntityKind::User, "carol");

        let lax = resource_with(mapping.clone());
        let prepared = resolver.to_remote(&entity, &lax).await.unwrap();
        assert!(prepared.mandatory_missing.is_empty());

        let strict = resource_with(mapping).enforcing_mandatory();
        let prepared = resolver.to_remote(&entity, &strict).await.unwrap();
        assert_eq!(prepared.mandatory_missing, vec!["mail"]);
    }

    #[test]
    fn derive_value_substitutes_placeholders() {
        let entity = Entity::new(EntityKind::User, "kate").with_attr("dept", "eng");
        assert_eq!(
            derive_value(&entity, "{name}@{dept}.example.com"),
            "kate@eng.example.com"
        );
        assert_eq!(derive_value(&entity, "{missing}-x"), "-x");
        assert_eq!(derive_value(&entity, "plain"), "plain");
    }

    #[tokio::test]
    async fn derived_schema_computed_from_expression() {
        let store = InMemoryEntityStore::shared();
        store
            .save_schema(
                EntityKind::User,
                SchemaDef::derived("displayName", "{firstname} {surname}"),
            )
            .await
            .unwrap();
        let resolver = resolver_with(store);
        let resource = resource_with(Mapping::new(vec![
            MappingItem::new("name", "uid").as_conn_object_key(),
            MappingItem::new("displayName", "cn"),
        ]));

        let entity = Entity::new(EntityKind::User, "kmiller")
            .with_attr("firstname", "Kate")
            .with_attr("surname", "Miller");
        let prepared = resolver.to_remote(&entity, &resource).await.unwrap();
        assert_eq!(
            prepared.attributes.get_first("cn").as_deref(),
            Some("Kate Miller")
        );
    }

    #[tokio::test]
    async fn password_masked_in_persisted_payload() {
        let store = InMemoryEntityStore::shared();
        let resolver = resolver_with(store);
        let resource = resource_with(Mapping::new(vec![
            MappingItem::new("name", "uid").as_conn_object_key(),
            MappingItem::new("password", "userPassword").as_password(),
        ]));

        let mut entity = Entity::new(EntityKind::User, "dave");
        entity.password = Some("s3cret".to_string());
        let prepared = resolver.to_remote(&entity, &resource).await.unwrap();

        assert_eq!(
            prepared.attributes.get_first("userPassword").as_deref(),
            Some("s3cret")
        );
        assert_eq!(
            prepared.persisted.get_first("userPassword").as_deref(),
            Some(PASSWORD_MASK)
        );
    }

    #[tokio::test]
    async fn pull_only_items_skipped_on_push() {
        let store = InMemoryEntityStore::shared();
        let resolver = resolver_with(store);
        let resource = resource_with(Mapping::new(vec![
            MappingItem::new("name", "uid").as_conn_object_key(),
            MappingItem::new("source", "origin").with_purpose(Purpose::Pull),
        ]));

        let entity = Entity::new(EntityKind::User, "erin").with_attr("source", "hr");
        let prepared = resolver.to_remote(&entity, &resource).await.unwrap();
        assert!(!prepared.attributes.has("origin"));
    }

    #[tokio::test]
    async fn inert_key_item_still_yields_uid() {
        let store = InMemoryEntityStore::shared();
        let resolver = resolver_with(store);
        let resource = resource_with(Mapping::new(vec![MappingItem::new("name", "uid")
            .as_conn_object_key()
            .with_purpose(Purpose::None)]));

        let entity = Entity::new(EntityKind::User, "frank");
        let prepared = resolver.to_remote(&entity, &resource).await.unwrap();
        assert_eq!(prepared.uid.as_ref().unwrap().value(), "frank");
        assert!(prepared.attributes.is_empty());
    }

    #[tokio::test]
    async fn read_only_virtual_excluded_from_push() {
        let store = InMemoryEntityStore::shared();
        store
            .save_schema(EntityKind::User, SchemaDef::virtual_("badge").read_only())
            .await
            .unwrap();
        let resolver = resolver_with(store);

        let resource = resource_with(Mapping::new(vec![
            MappingItem::new("name", "uid").as_conn_object_key(),
            MappingItem::new("badge", "badgeNumber"),
        ]));
        let entity = Entity::new(EntityKind::User, "grace");
        resolver
            .cache
            .put(entity.key, "badge", vec!["b-2".into()])
            .await;

        let prepared = resolver.to_remote(&entity, &resource).await.unwrap();
        assert!(!prepared.attributes.has("badgeNumber"));
    }

    #[tokio::test]
    async fn pull_inverts_transformers_and_splits_virtuals() {
        let store = InMemoryEntityStore::shared();
        store
            .save_schema(EntityKind::User, SchemaDef::virtual_("groups"))
            .await
            .unwrap();
        let resolver = resolver_with(store);

        let provision = Provision::new(
            EntityKind::User,
            "account",
            Mapping::new(vec![
                MappingItem::new("name", "uid").as_conn_object_key(),
                MappingItem::new("email", "mail"),
                MappingItem::new("groups", "memberOf"),
            ]),
        );

        let attrs = AttributeSet::new()
            .with("uid", "hank")
            .with("mail", "hank@example.com")
            .with("memberOf", vec!["staff".to_string(), "dev".to_string()]);

        let pulled = resolver.to_local(&provision, &attrs).await.unwrap();
        assert_eq!(pulled.name.as_deref(), Some("hank"));
        assert_eq!(
            pulled.plain_attrs.get("email"),
            Some(&AttrValue::Single("hank@example.com".to_string()))
        );
        assert_eq!(
            pulled.virtual_attrs.get("groups").unwrap(),
            &vec!["staff".to_string(), "dev".to_string()]
        );
    }

    #[tokio::test]
    async fn virtual_push_reads_cached_values() {
        let store = InMemoryEntityStore::shared();
        store
            .save_schema(EntityKind::User, SchemaDef::virtual_("groups"))
            .await
            .unwrap();
        let resolver = resolver_with(store);

        let resource = resource_with(Mapping::new(vec![
            MappingItem::new("name", "uid").as_conn_object_key(),
            MappingItem::new("groups", "memberOf"),
        ]));
        let entity = Entity::new(EntityKind::User, "ivy");
        resolver
            .cache
            .put(entity.key, "groups", vec!["staff".into(), "dev".into()])
            .await;

        let prepared = resolver.to_remote(&entity, &resource).await.unwrap();
        assert_eq!(
            prepared.attributes.get("memberOf").unwrap().as_strings(),
            vec!["staff", "dev"]
        );

        // No cache entry for another entity: attribute simply absent.
        let other = Entity::new(EntityKind::User, "jack");
        assert_ne!(other.key, entity.key);
        let prepared = resolver.to_remote(&other, &resource).await.unwrap();
        assert!(!prepared.attributes.has("memberOf"));
    }
}
