//! Value transformers.
//!
//! A mapping item can name an ordered chain of transformers. On push the
//! chain runs forward over the internal values; on pull it runs backward,
//! in reverse order, over the external values.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::RwLock;

use crate::error::{ProvisioningError, ProvisioningResult};

/// A reversible (best-effort) value transformation.
pub trait ItemTransformer: Send + Sync {
    /// Transform internal values into external values (push direction).
    fn forward(&self, values: Vec<String>) -> Vec<String>;

    /// Transform external values into internal values (pull direction).
    ///
    /// Defaults to the identity for transformers with no meaningful inverse.
    fn backward(&self, values: Vec<String>) -> Vec<String> {
        values
    }
}

impl std::fmt::Debug for dyn ItemTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ItemTransformer")
    }
}

/// Lowercase every value in both directions.
pub struct Lowercase;

impl ItemTransformer for Lowercase {
    fn forward(&self, values: Vec<String>) -> Vec<String> {
        values.into_iter().map(|v| v.to_lowercase()).collect()
    }

    fn backward(&self, values: Vec<String>) -> Vec<String> {
        self.forward(values)
    }
}

/// Uppercase every value in both directions.
pub struct Uppercase;

impl ItemTransformer for Uppercase {
    fn forward(&self, values: Vec<String>) -> Vec<String> {
        values.into_iter().map(|v| v.to_uppercase()).collect()
    }

    fn backward(&self, values: Vec<String>) -> Vec<String> {
        self.forward(values)
    }
}

/// Trim surrounding whitespace in both directions.
pub struct Trim;

impl ItemTransformer for Trim {
    fn forward(&self, values: Vec<String>) -> Vec<String> {
        values.into_iter().map(|v| v.trim().to_string()).collect()
    }

    fn backward(&self, values: Vec<String>) -> Vec<String> {
        self.forward(values)
    }
}

/// Prepend a fixed prefix on push, strip it on pull.
pub struct Prefix {
    prefix: String,
}

impl Prefix {
    /// Create with the prefix to apply.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl ItemTransformer for Prefix {
    fn forward(&self, values: Vec<String>) -> Vec<String> {
        values
            .into_iter()
            .map(|v| format!("{}{v}", self.prefix))
            .collect()
    }

    fn backward(&self, values: Vec<String>) -> Vec<String> {
        values
            .into_iter()
            .map(|v| v.strip_prefix(&self.prefix).map_or(v.clone(), String::from))
            .collect()
    }
}

/// Append a fixed suffix on push, strip it on pull.
pub struct Suffix {
    suffix: String,
}

impl Suffix {
    /// Create with the suffix to apply.
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl ItemTransformer for Suffix {
    fn forward(&self, values: Vec<String>) -> Vec<String> {
        values
            .into_iter()
            .map(|v| format!("{v}{}", self.suffix))
            .collect()
    }

    fn backward(&self, values: Vec<String>) -> Vec<String> {
        values
            .into_iter()
            .map(|v| v.strip_suffix(&self.suffix).map_or(v.clone(), String::from))
            .collect()
    }
}

/// Literal substring replacement; not inverted on pull.
pub struct Replace {
    from: String,
    to: String,
}

impl Replace {
    /// Replace occurrences of `from` with `to` on push.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl ItemTransformer for Replace {
    fn forward(&self, values: Vec<String>) -> Vec<String> {
        values
            .into_iter()
            .map(|v| v.replace(&self.from, &self.to))
            .collect()
    }
}

/// Keep the first capture group of a regex match; values that do not match
/// pass through unchanged. Not inverted on pull.
pub struct RegexCapture {
    pattern: Regex,
}

impl RegexCapture {
    /// Compile the pattern; the first capture group is extracted.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }
}

impl ItemTransformer for RegexCapture {
    fn forward(&self, values: Vec<String>) -> Vec<String> {
        values
            .into_iter()
            .map(|v| {
                self.pattern
                    .captures(&v)
                    .and_then(|c| c.get(1))
                    .map_or(v.clone(), |m| m.as_str().to_string())
            })
            .collect()
    }
}

/// Substitute a default when no value (or only empty values) flows through.
pub struct DefaultIfEmpty {
    default: String,
}

impl DefaultIfEmpty {
    /// Create with the default value.
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
        }
    }
}

impl ItemTransformer for DefaultIfEmpty {
    fn forward(&self, values: Vec<String>) -> Vec<String> {
        if values.iter().all(String::is_empty) {
            vec![self.default.clone()]
        } else {
            values
        }
    }
}

/// Registry of named transformers, shared between the mapping resolver and
/// the pull engine.
pub struct TransformerRegistry {
    transformers: RwLock<HashMap<String, Arc<dyn ItemTransformer>>>,
}

impl TransformerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transformers: RwLock::new(HashMap::new()),
        }
    }

    /// A registry preloaded with the stateless builtins: `lowercase`,
    /// `uppercase` and `trim`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        {
            let mut map = registry
                .transformers
                .try_write()
                .expect("fresh registry lock");
            map.insert("lowercase".to_string(), Arc::new(Lowercase));
            map.insert("uppercase".to_string(), Arc::new(Uppercase));
            map.insert("trim".to_string(), Arc::new(Trim));
        }
        registry
    }

    /// Register a transformer under an id, replacing any previous binding.
    pub async fn register(&self, id: impl Into<String>, transformer: Arc<dyn ItemTransformer>) {
        self.transformers.write().await.insert(id.into(), transformer);
    }

    /// Resolve an ordered chain of transformer ids.
    pub async fn resolve(
        &self,
        ids: &[String],
    ) -> ProvisioningResult<Vec<Arc<dyn ItemTransformer>>> {
        let map = self.transformers.read().await;
        ids.iter()
            .map(|id| {
                map.get(id).cloned().ok_or_else(|| {
                    ProvisioningError::UnknownExtension { id: id.clone() }
                })
            })
            .collect()
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Run a resolved chain forward (push direction).
pub fn apply_forward(chain: &[Arc<dyn ItemTransformer>], values: Vec<String>) -> Vec<String> {
    chain.iter().fold(values, |acc, t| t.forward(acc))
}

/// Run a resolved chain backward (pull direction), last transformer first.
pub fn apply_backward(chain: &[Arc<dyn ItemTransformer>], values: Vec<String>) -> Vec<String> {
    chain.iter().rev().fold(values, |acc, t| t.backward(acc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_roundtrip() {
        let t = Prefix::new("uid=");
        let pushed = t.forward(vec!["joe".into()]);
        assert_eq!(pushed, vec!["uid=joe"]);
        assert_eq!(t.backward(pushed), vec!["joe"]);
    }

    #[test]
    fn regex_capture_extracts_group() {
        let t = RegexCapture::new(r"^(\w+)@").unwrap();
        assert_eq!(
            t.forward(vec!["joe@example.com".into(), "plain".into()]),
            vec!["joe", "plain"]
        );
    }

    #[test]
    fn default_if_empty() {
        let t = DefaultIfEmpty::new("n/a");
        assert_eq!(t.forward(vec![]), vec!["n/a"]);
        assert_eq!(t.forward(vec![String::new()]), vec!["n/a"]);
        assert_eq!(t.forward(vec!["x".into()]), vec!["x"]);
    }

    #[tokio::test]
    async fn chain_runs_in_order_and_reverses() {
        let registry = TransformerRegistry::with_builtins();
        registry
            .register("mail-suffix", Arc::new(Suffix::new("@example.com")))
            .await;

        let chain = registry
            .resolve(&["lowercase".to_string(), "mail-suffix".to_string()])
            .await
            .unwrap();

        let pushed = apply_forward(&chain, vec!["Joe".into()]);
        assert_eq!(pushed, vec!["joe@example.com"]);

        let pulled = apply_backward(&chain, pushed);
        assert_eq!(pulled, vec!["joe"]);
    }

    #[tokio::test]
    async fn unknown_id_is_an_error() {
        let registry = TransformerRegistry::new();
        let err = registry
            .resolve(&["nope".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::UnknownExtension { .. }));
    }
}
