//! Internal entity model.
//!
//! Users, groups and generic any-objects share a single representation: a
//! kind, a bag of plain attributes, explicit resource assignments and
//! explicit group memberships. Dynamic (predicate-driven) memberships are
//! computed, never stored here as explicit.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::attr::AttrValue;
use crate::ids::EntityKey;

/// Kind of internal entity handled by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A person identity.
    User,
    /// A group or role.
    Group,
    /// A generic object type (printer, workstation, ...).
    AnyObject,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::User => write!(f, "user"),
            EntityKind::Group => write!(f, "group"),
            EntityKind::AnyObject => write!(f, "any_object"),
        }
    }
}

/// An internal entity as held by the identity store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Stable key of this entity.
    pub key: EntityKey,
    /// Entity kind.
    pub kind: EntityKind,
    /// Human-readable name (username, group name, ...).
    pub name: String,
    /// Plain attribute values keyed by schema name.
    pub plain_attrs: HashMap<String, AttrValue>,
    /// Names of resources this entity is explicitly assigned to.
    pub resources: BTreeSet<String>,
    /// Keys of groups this entity is an explicit member of.
    pub memberships: BTreeSet<EntityKey>,
    /// Cleartext password, present only transiently during provisioning.
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
}

impl Entity {
    /// Create an entity with no attributes or assignments.
    #[must_use]
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            key: EntityKey::new(),
            kind,
            name: name.into(),
            plain_attrs: HashMap::new(),
            resources: BTreeSet::new(),
            memberships: BTreeSet::new(),
            password: None,
        }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with_attr(mut self, schema: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.plain_attrs.insert(schema.into(), value.into());
        self
    }

    /// Builder-style resource assignment.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.insert(resource.into());
        self
    }

    /// Get a plain attribute value.
    #[must_use]
    pub fn attr(&self, schema: &str) -> Option<&AttrValue> {
        self.plain_attrs.get(schema)
    }

    /// True when the given schema has at least one non-empty value.
    #[must_use]
    pub fn has_value(&self, schema: &str) -> bool {
        self.attr(schema).is_some_and(|v| !v.is_empty())
    }
}

/// Group definition, including the optional dynamic-membership condition.
///
/// The condition is an opaque predicate expression evaluated by the search
/// component; this crate never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDef {
    /// Key of the group entity.
    pub key: EntityKey,
    /// Group name.
    pub name: String,
    /// Resources assigned to the group itself.
    pub resources: BTreeSet<String>,
    /// Dynamic membership condition, if any.
    pub dynamic_condition: Option<String>,
}

impl GroupDef {
    /// Create a group definition with no resources or condition.
    #[must_use]
    pub fn new(key: EntityKey, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
            resources: BTreeSet::new(),
            dynamic_condition: None,
        }
    }

    /// Builder-style resource assignment.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.insert(resource.into());
        self
    }

    /// Builder-style dynamic condition.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.dynamic_condition = Some(condition.into());
        self
    }
}

/// Schema definition for a plain, derived or virtual attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDef {
    /// Schema name.
    pub name: String,
    /// Whether a value is mandatory for entities of the owning kind.
    #[serde(default)]
    pub mandatory: bool,
    /// Whether the attribute admits multiple values.
    #[serde(default)]
    pub multivalue: bool,
    /// Storage class of the attribute.
    #[serde(default)]
    pub class: SchemaClass,
    /// For virtual schemas: never attempt a remote write for this attribute.
    #[serde(default)]
    pub read_only: bool,
    /// For derived schemas: the expression producing the value. Literal
    /// text with `{schema}` placeholders resolved against plain attributes
    /// (`{name}` resolves to the entity name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

/// Where an attribute's values live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaClass {
    /// Stored in the internal identity store.
    #[default]
    Plain,
    /// Computed from other attributes.
    Derived,
    /// Held only by an external resource, fetched on demand.
    Virtual,
}

impl SchemaDef {
    /// A plain schema with the given name.
    #[must_use]
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mandatory: false,
            multivalue: false,
            class: SchemaClass::Plain,
            read_only: false,
            expression: None,
        }
    }

    /// A virtual schema with the given name.
    #[must_use]
    pub fn virtual_(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mandatory: false,
            multivalue: false,
            class: SchemaClass::Virtual,
            read_only: false,
            expression: None,
        }
    }

    /// A derived schema computing its value from the given expression.
    #[must_use]
    pub fn derived(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mandatory: false,
            multivalue: false,
            class: SchemaClass::Derived,
            read_only: false,
            expression: Some(expression.into()),
        }
    }

    /// Mark as mandatory.
    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Mark as read-only (virtual schemas).
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}
