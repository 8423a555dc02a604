//! Internal attribute values.
//!
//! Plain attributes on internal entities are string-valued (single or
//! multi), matching how the schema layer stores them. Richer typing lives on
//! the connector side, where target systems impose their own data types.

use serde::{Deserialize, Serialize};

/// Value of an internal plain attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// A single value.
    Single(String),
    /// An ordered list of values.
    Multi(Vec<String>),
}

impl AttrValue {
    /// All values, in order. A single value yields a one-element slice.
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            AttrValue::Single(v) => vec![v.as_str()],
            AttrValue::Multi(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    /// The first value, if any.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        match self {
            AttrValue::Single(v) => Some(v.as_str()),
            AttrValue::Multi(vs) => vs.first().map(String::as_str),
        }
    }

    /// True when no value is present (empty multi-value).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            AttrValue::Single(_) => false,
            AttrValue::Multi(vs) => vs.is_empty(),
        }
    }

    /// Build from a list of owned values, collapsing a singleton.
    #[must_use]
    pub fn from_values(mut values: Vec<String>) -> Self {
        if values.len() == 1 {
            AttrValue::Single(values.remove(0))
        } else {
            AttrValue::Multi(values)
        }
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Single(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Single(v.to_string())
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(vs: Vec<String>) -> Self {
        AttrValue::Multi(vs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_and_multi_values() {
        let single = AttrValue::from("alice");
        assert_eq!(single.values(), vec!["alice"]);
        assert_eq!(single.first(), Some("alice"));
        assert!(!single.is_empty());

        let multi = AttrValue::from(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(multi.values(), vec!["a", "b"]);
        assert_eq!(multi.first(), Some("a"));
    }

    #[test]
    fn empty_multi_is_empty() {
        let empty = AttrValue::Multi(vec![]);
        assert!(empty.is_empty());
        assert_eq!(empty.first(), None);
    }

    #[test]
    fn from_values_collapses_singleton() {
        let v = AttrValue::from_values(vec!["x".to_string()]);
        assert_eq!(v, AttrValue::Single("x".to_string()));
    }
}
