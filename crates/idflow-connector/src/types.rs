//! Capability sets and trace levels.
//!
//! Capabilities are modeled as a flat set of tags with an explicit
//! "effective = override if override enabled else native" function; there is
//! no inheritance-based capability checking anywhere in the gateway.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A single operation a connector may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    /// Create objects in the target system.
    Create,
    /// Update existing objects.
    Update,
    /// Delete objects.
    Delete,
    /// Search/list objects.
    Search,
    /// Incremental change detection via sync tokens.
    Sync,
    /// Authenticate credentials against the target system.
    Authenticate,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Capability::Create => "CREATE",
            Capability::Update => "UPDATE",
            Capability::Delete => "DELETE",
            Capability::Search => "SEARCH",
            Capability::Sync => "SYNC",
            Capability::Authenticate => "AUTHENTICATE",
        };
        write!(f, "{s}")
    }
}

/// An unordered set of capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// The empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding all CRUD + search + sync capabilities.
    #[must_use]
    pub fn full() -> Self {
        Self::from_iter([
            Capability::Create,
            Capability::Update,
            Capability::Delete,
            Capability::Search,
            Capability::Sync,
        ])
    }

    /// Builder-style insertion.
    #[must_use]
    pub fn with(mut self, cap: Capability) -> Self {
        self.0.insert(cap);
        self
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    /// Number of capabilities in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no capability is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Compute the effective capability set for a resource.
///
/// When the resource enables its override flag the override set wins
/// entirely; the native set is ignored, even if the override is empty.
#[must_use]
pub fn effective_capabilities<'a>(
    native: &'a CapabilitySet,
    override_set: &'a CapabilitySet,
    override_enabled: bool,
) -> &'a CapabilitySet {
    if override_enabled {
        override_set
    } else {
        native
    }
}

/// How much of a resource's propagation history is recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    /// Record every execution, successful or not.
    #[default]
    All,
    /// Record only failed executions.
    Failures,
    /// Record a single summary line per batch.
    Summary,
    /// Record nothing.
    None,
}

impl TraceLevel {
    /// Whether an execution with the given success flag should be recorded.
    #[must_use]
    pub fn records(&self, success: bool) -> bool {
        match self {
            TraceLevel::All | TraceLevel::Summary => true,
            TraceLevel::Failures => !success,
            TraceLevel::None => false,
        }
    }
}
