//! Resource, provision and mapping configuration.
//!
//! A resource binds a connector instance to the engine: per entity kind it
//! carries a provision (remote object class + attribute mapping), a
//! propagation priority, a trace level and the mandatory-enforcement flag.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use idflow_connector::{ResourceProfile, TraceLevel};
use idflow_core::{EntityKind, ValidationError};

/// Direction(s) a mapping item applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Purpose {
    /// Item is inert in both directions.
    None,
    /// Push only: internal value flows to the external attribute.
    Propagation,
    /// Pull only: external value flows to the internal attribute.
    Pull,
    /// Both directions.
    Both,
}

impl Purpose {
    /// Whether the item participates in push.
    #[must_use]
    pub fn includes_propagation(&self) -> bool {
        matches!(self, Purpose::Propagation | Purpose::Both)
    }

    /// Whether the item participates in pull.
    #[must_use]
    pub fn includes_pull(&self) -> bool {
        matches!(self, Purpose::Pull | Purpose::Both)
    }
}

/// One attribute binding inside a mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingItem {
    /// Internal attribute (schema) name; "name" addresses the entity name.
    pub int_attr_name: String,
    /// External attribute name on the remote object class.
    pub ext_attr_name: String,
    /// Direction applicability.
    pub purpose: Purpose,
    /// This item carries the connector-object key.
    #[serde(default)]
    pub conn_object_key: bool,
    /// This item carries the password; cleartext only within calls.
    #[serde(default)]
    pub password: bool,
    /// The connector side requires a value for this attribute.
    #[serde(default)]
    pub mandatory: bool,
    /// Ordered ids of value transformers applied on push (inverted on pull).
    #[serde(default)]
    pub transformers: Vec<String>,
}

impl MappingItem {
    /// A bidirectional item between an internal and external attribute.
    pub fn new(int_attr: impl Into<String>, ext_attr: impl Into<String>) -> Self {
        Self {
            int_attr_name: int_attr.into(),
            ext_attr_name: ext_attr.into(),
            purpose: Purpose::Both,
            conn_object_key: false,
            password: false,
            mandatory: false,
            transformers: Vec::new(),
        }
    }

    /// Builder-style purpose.
    #[must_use]
    pub fn with_purpose(mut self, purpose: Purpose) -> Self {
        self.purpose = purpose;
        self
    }

    /// Mark as the connector-object key item.
    #[must_use]
    pub fn as_conn_object_key(mut self) -> Self {
        self.conn_object_key = true;
        self
    }

    /// Mark as connector-side mandatory.
    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Mark as the password item.
    #[must_use]
    pub fn as_password(mut self) -> Self {
        self.password = true;
        self
    }

    /// Builder-style transformer chain.
    #[must_use]
    pub fn with_transformers(mut self, ids: Vec<String>) -> Self {
        self.transformers = ids;
        self
    }
}

/// Ordered set of mapping items plus the designated key item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mapping {
    /// Items, in declaration order.
    pub items: Vec<MappingItem>,
}

impl Mapping {
    /// Create a mapping from items.
    #[must_use]
    pub fn new(items: Vec<MappingItem>) -> Self {
        Self { items }
    }

    /// The designated connector-object-key item, if declared.
    #[must_use]
    pub fn conn_object_key_item(&self) -> Option<&MappingItem> {
        self.items.iter().find(|i| i.conn_object_key)
    }

    /// Validate the mapping invariants.
    ///
    /// At most one key item; every item carries both attribute names unless
    /// it is the key item (internal name suffices) or propagation-only
    /// (external name suffices).
    pub fn validate(&self) -> Result<(), ValidationError> {
        let key_items = self.items.iter().filter(|i| i.conn_object_key).count();
        if key_items > 1 {
            return Err(ValidationError::invalid_mapping(format!(
                "{key_items} connector-object-key items declared, at most 1 allowed"
            )));
        }
        for item in &self.items {
            if item.conn_object_key {
                if item.int_attr_name.is_empty() {
                    return Err(ValidationError::invalid_mapping(
                        "connector-object-key item requires an internal attribute name",
                    ));
                }
            } else if item.purpose == Purpose::Propagation {
                if item.ext_attr_name.is_empty() {
                    return Err(ValidationError::invalid_mapping(
                        "propagation-only item requires an external attribute name",
                    ));
                }
            } else if item.int_attr_name.is_empty() || item.ext_attr_name.is_empty() {
                return Err(ValidationError::invalid_mapping(format!(
                    "item '{}'/'{}' must carry both attribute names",
                    item.int_attr_name, item.ext_attr_name
                )));
            }
        }
        Ok(())
    }
}

/// Binding of an internal entity kind to a remote object class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provision {
    /// Internal entity kind handled on this resource.
    pub kind: EntityKind,
    /// Remote object class name.
    pub object_class: String,
    /// Attribute mapping.
    pub mapping: Mapping,
}

impl Provision {
    /// Create a provision.
    pub fn new(kind: EntityKind, object_class: impl Into<String>, mapping: Mapping) -> Self {
        Self {
            kind,
            object_class: object_class.into(),
            mapping,
        }
    }
}

/// A named external-system binding.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Gateway-facing profile: connector config, overrides, capabilities.
    pub profile: ResourceProfile,
    /// Lower values propagate first, synchronously; `None` propagates
    /// asynchronously after all prioritized resources.
    pub propagation_priority: Option<i32>,
    /// Require every schema-mandatory attribute before propagation.
    pub enforce_mandatory_condition: bool,
    /// Execution recording policy.
    pub trace_level: TraceLevel,
    /// One provision per handled entity kind.
    pub provisions: HashMap<EntityKind, Provision>,
}

impl Resource {
    /// Create a resource with default flags and no provisions.
    #[must_use]
    pub fn new(profile: ResourceProfile) -> Self {
        Self {
            profile,
            propagation_priority: None,
            enforce_mandatory_condition: false,
            trace_level: TraceLevel::default(),
            provisions: HashMap::new(),
        }
    }

    /// Resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.profile.name
    }

    /// Builder-style priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.propagation_priority = Some(priority);
        self
    }

    /// Builder-style provision registration.
    #[must_use]
    pub fn with_provision(mut self, provision: Provision) -> Self {
        self.provisions.insert(provision.kind, provision);
        self
    }

    /// Builder-style trace level.
    #[must_use]
    pub fn with_trace_level(mut self, level: TraceLevel) -> Self {
        self.trace_level = level;
        self
    }

    /// Builder-style mandatory enforcement.
    #[must_use]
    pub fn enforcing_mandatory(mut self) -> Self {
        self.enforce_mandatory_condition = true;
        self
    }

    /// The provision for an entity kind, if configured.
    #[must_use]
    pub fn provision(&self, kind: EntityKind) -> Option<&Provision> {
        self.provisions.get(&kind)
    }
}

/// Shared directory of configured resources, keyed by name.
#[derive(Default)]
pub struct ResourceDirectory {
    resources: RwLock<HashMap<String, Arc<Resource>>>,
}

impl ResourceDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource; its mapping invariants are validated first.
    pub async fn register(&self, resource: Resource) -> Result<(), ValidationError> {
        for provision in resource.provisions.values() {
            provision.mapping.validate()?;
        }
        self.resources
            .write()
            .await
            .insert(resource.name().to_string(), Arc::new(resource));
        Ok(())
    }

    /// Look up a resource by name.
    pub async fn get(&self, name: &str) -> Option<Arc<Resource>> {
        self.resources.read().await.get(name).cloned()
    }

    /// All registered resource names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
