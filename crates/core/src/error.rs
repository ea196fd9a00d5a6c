//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// missing entities, invalid state transitions, conflicts). Infrastructure
/// concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A field was set to a value its current state does not allow.
    #[error("invalid value '{value}' for field '{field}'")]
    InvalidField { field: &'static str, value: String },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    Missing { entity: &'static str, id: String },

    /// A conflict occurred (duplicate key, entity still referenced).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_field(field: &'static str, value: impl ToString) -> Self {
        Self::InvalidField {
            field,
            value: value.to_string(),
        }
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn missing(entity: &'static str, id: impl Into<String>) -> Self {
        Self::Missing {
            entity,
            id: id.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Whether this error reports a missing entity.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_names_entity_and_identifier() {
        let err = DomainError::missing("user", "alice");
        assert!(err.is_missing());
        assert_eq!(err.to_string(), "user not found: alice");
    }

    #[test]
    fn invalid_field_names_field_and_value() {
        let err = DomainError::invalid_field("consumed", false);
        assert_eq!(err.to_string(), "invalid value 'false' for field 'consumed'");
    }
}
