//! Operation types exchanged with connectors.
//!
//! UIDs, external attribute sets, search filters, paging cookies and sync
//! events. These are the wire-neutral shapes every connector implementation
//! maps onto its own protocol.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Unique identifier of an object in a target system.
///
/// The attribute name records which remote attribute carries the identifier
/// (a DN for directories, a primary key for databases, a resource id for
/// REST endpoints).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uid {
    attribute_name: String,
    value: String,
}

impl Uid {
    /// Create a UID with an explicit attribute name.
    pub fn new(attribute_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            value: value.into(),
        }
    }

    /// Create a UID with the default "uid" attribute name.
    pub fn from_value(value: impl Into<String>) -> Self {
        Self::new("uid", value)
    }

    /// The remote attribute carrying the identifier.
    #[must_use]
    pub fn attribute_name(&self) -> &str {
        &self.attribute_name
    }

    /// The identifier value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.attribute_name, self.value)
    }
}

/// Value of an external attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtValue {
    /// A single string value.
    String(String),
    /// A single integer value.
    Integer(i64),
    /// A single boolean value.
    Boolean(bool),
    /// Multiple string values.
    Multi(Vec<String>),
}

impl ExtValue {
    /// All values rendered as strings.
    #[must_use]
    pub fn as_strings(&self) -> Vec<String> {
        match self {
            ExtValue::String(s) => vec![s.clone()],
            ExtValue::Integer(i) => vec![i.to_string()],
            ExtValue::Boolean(b) => vec![b.to_string()],
            ExtValue::Multi(vs) => vs.clone(),
        }
    }

    /// First value as a string, if any.
    #[must_use]
    pub fn first(&self) -> Option<String> {
        self.as_strings().into_iter().next()
    }
}

impl From<String> for ExtValue {
    fn from(s: String) -> Self {
        ExtValue::String(s)
    }
}

impl From<&str> for ExtValue {
    fn from(s: &str) -> Self {
        ExtValue::String(s.to_string())
    }
}

impl From<Vec<String>> for ExtValue {
    fn from(vs: Vec<String>) -> Self {
        ExtValue::Multi(vs)
    }
}

/// A set of external attributes, as sent to or read from a connector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSet {
    attributes: HashMap<String, ExtValue>,
}

impl AttributeSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ExtValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ExtValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Get an attribute value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ExtValue> {
        self.attributes.get(name)
    }

    /// Get the first value of an attribute as a string.
    #[must_use]
    pub fn get_first(&self, name: &str) -> Option<String> {
        self.get(name).and_then(ExtValue::first)
    }

    /// Membership test.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Remove an attribute.
    pub fn remove(&mut self, name: &str) -> Option<ExtValue> {
        self.attributes.remove(name)
    }

    /// Iterate over all attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExtValue)> {
        self.attributes.iter()
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// True when no attribute is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl FromIterator<(String, ExtValue)> for AttributeSet {
    fn from_iter<T: IntoIterator<Item = (String, ExtValue)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

/// An object read from a target system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Remote identifier.
    pub uid: Uid,
    /// Remote object class.
    pub object_class: String,
    /// Attribute values.
    pub attributes: AttributeSet,
}

impl RemoteObject {
    /// Create a remote object.
    pub fn new(uid: Uid, object_class: impl Into<String>, attributes: AttributeSet) -> Self {
        Self {
            uid,
            object_class: object_class.into(),
            attributes,
        }
    }
}

/// Search filter over remote attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// attribute == value.
    Equals { attribute: String, value: String },
    /// attribute contains value.
    Contains { attribute: String, value: String },
    /// attribute starts with value.
    StartsWith { attribute: String, value: String },
    /// attribute has any value.
    Present { attribute: String },
    /// Conjunction.
    And { filters: Vec<Filter> },
    /// Disjunction.
    Or { filters: Vec<Filter> },
    /// Negation.
    Not { filter: Box<Filter> },
}

impl Filter {
    /// Equality filter.
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Conjunction of filters.
    #[must_use]
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And { filters }
    }

    /// Evaluate this filter against an attribute set.
    ///
    /// Used by in-process connectors and tests; protocol connectors usually
    /// translate the filter to their native query language instead.
    #[must_use]
    pub fn matches(&self, attrs: &AttributeSet) -> bool {
        match self {
            Filter::Equals { attribute, value } => attrs
                .get(attribute)
                .is_some_and(|v| v.as_strings().iter().any(|s| s == value)),
            Filter::Contains { attribute, value } => attrs
                .get(attribute)
                .is_some_and(|v| v.as_strings().iter().any(|s| s.contains(value.as_str()))),
            Filter::StartsWith { attribute, value } => attrs
                .get(attribute)
                .is_some_and(|v| v.as_strings().iter().any(|s| s.starts_with(value.as_str()))),
            Filter::Present { attribute } => attrs.has(attribute),
            Filter::And { filters } => filters.iter().all(|f| f.matches(attrs)),
            Filter::Or { filters } => filters.iter().any(|f| f.matches(attrs)),
            Filter::Not { filter } => !filter.matches(attrs),
        }
    }
}

/// Paging request for search operations, cursor-based.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageRequest {
    /// Maximum number of results to return; 0 means connector default.
    pub page_size: u32,
    /// Opaque paging cookie returned by a previous page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
}

impl PageRequest {
    /// First page with the given size.
    #[must_use]
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            cookie: None,
        }
    }

    /// Continue from a paging cookie.
    #[must_use]
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }
}

/// One page of search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage {
    /// The matching objects.
    pub objects: Vec<RemoteObject>,
    /// Cookie for the next page, when more results exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cookie: Option<String>,
}

impl SearchPage {
    /// A page with no further results.
    #[must_use]
    pub fn last(objects: Vec<RemoteObject>) -> Self {
        Self {
            objects,
            next_cookie: None,
        }
    }

    /// True when another page is available.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.next_cookie.is_some()
    }
}

/// A single change reported by `sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Remote identifier of the changed object.
    pub uid: Uid,
    /// Remote object class.
    pub object_class: String,
    /// Kind of change.
    pub change: ChangeKind,
    /// Current attributes; absent for deletions.
    pub attributes: Option<AttributeSet>,
}

impl SyncEvent {
    /// A create-or-update event carrying the object's current attributes.
    pub fn upsert(uid: Uid, object_class: impl Into<String>, attributes: AttributeSet) -> Self {
        Self {
            uid,
            object_class: object_class.into(),
            change: ChangeKind::Upsert,
            attributes: Some(attributes),
        }
    }

    /// A deletion event.
    pub fn deleted(uid: Uid, object_class: impl Into<String>) -> Self {
        Self {
            uid,
            object_class: object_class.into(),
            change: ChangeKind::Delete,
            attributes: None,
        }
    }

    /// True when this event reports a remote deletion.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.change == ChangeKind::Delete
    }
}

/// Kind of remote change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Object created or updated; attributes carry current state.
    Upsert,
    /// Object deleted.
    Delete,
}

/// Result of a `sync(token)` call: changed objects plus the new cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncBatch {
    /// Changes since the supplied token.
    pub events: Vec<SyncEvent>,
    /// Cursor to store for the next incremental pull. `None` means the
    /// previous token is still current (no changes observed).
    pub new_token: Option<String>,
}

impl SyncBatch {
    /// A batch with no changes and an unchanged token.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            events: Vec::new(),
            new_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_display() {
        let uid = Uid::new("dn", "cn=alice,dc=example");
        assert_eq!(uid.to_string(), "dn=cn=alice,dc=example");
    }

    #[test]
    fn attribute_set_roundtrip() {
        let attrs = AttributeSet::new()
            .with("mail", "alice@example.com")
            .with("groups", vec!["staff".to_string(), "dev".to_string()]);

        assert_eq!(attrs.get_first("mail").as_deref(), Some("alice@example.com"));
        assert_eq!(
            attrs.get("groups").unwrap().as_strings(),
            vec!["staff", "dev"]
        );

        let json = serde_json::to_string(&attrs).unwrap();
        let parsed: AttributeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, attrs);
    }

    #[test]
    fn filter_evaluation() {
        let attrs = AttributeSet::new()
            .with("mail", "alice@example.com")
            .with("status", "active");

        assert!(Filter::eq("mail", "alice@example.com").matches(&attrs));
        assert!(Filter::and(vec![
            Filter::eq("status", "active"),
            Filter::Present {
                attribute: "mail".into()
            },
        ])
        .matches(&attrs));
        assert!(!Filter::eq("mail", "bob@example.com").matches(&attrs));
        assert!(Filter::Not {
            filter: Box::new(Filter::eq("status", "disabled"))
        }
        .matches(&attrs));
    }

    #[test]
    fn sync_event_delete_has_no_attributes() {
        let ev = SyncEvent::deleted(Uid::from_value("42"), "user");
        assert!(ev.is_delete());
        assert!(ev.attributes.is_none());
    }
}
