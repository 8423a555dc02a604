//! Validation error taxonomy.
//!
//! Raised before any connector call is issued; never retried automatically.

use thiserror::Error;

/// Validation failure detected prior to contacting any external system.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// One or more schema-mandatory attributes have no value.
    #[error("required values missing: {}", attributes.join(", "))]
    RequiredValuesMissing {
        /// Names of the schemas lacking values.
        attributes: Vec<String>,
    },

    /// Provided values violate the schema (type, multiplicity, uniqueness).
    #[error("invalid values for '{attribute}': {message}")]
    InvalidValues {
        /// Schema name.
        attribute: String,
        message: String,
    },

    /// The mapping configuration itself is inconsistent.
    #[error("invalid mapping: {message}")]
    InvalidMapping { message: String },
}

impl ValidationError {
    /// Convenience constructor for a missing-values failure.
    #[must_use]
    pub fn required_missing(attributes: Vec<String>) -> Self {
        ValidationError::RequiredValuesMissing { attributes }
    }

    /// Convenience constructor for an invalid mapping.
    pub fn invalid_mapping(message: impl Into<String>) -> Self {
        ValidationError::InvalidMapping {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_missing_attributes() {
        let err = ValidationError::required_missing(vec!["email".into(), "cn".into()]);
        assert_eq!(err.to_string(), "required values missing: email, cn");
    }
}
