//! Schema error types

use thiserror::Error;

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while loading a schema or classifying attributes against it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Unknown entity: {0}")]
    EntityNotFound(String),

    #[error("Unknown attribute {attribute} on entity {entity}")]
    AttributeNotFound { entity: String, attribute: String },

    #[error("Invalid relation {attribute} on entity {entity}: {reason}")]
    InvalidRelation {
        entity: String,
        attribute: String,
        reason: String,
    },

    #[error("Entity {0} has no fulltext index")]
    NoFulltextIndex(String),

    #[error("Malformed schema at {location}: {reason}")]
    Malformed { location: String, reason: String },
}

impl SchemaError {
    pub fn malformed(location: impl Into<String>, reason: impl Into<String>) -> Self {
        SchemaError::Malformed {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub fn attribute_not_found(entity: &str, attribute: &str) -> Self {
        SchemaError::AttributeNotFound {
            entity: entity.to_string(),
            attribute: attribute.to_string(),
        }
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            SchemaError::EntityNotFound(_) => "SCHEMA_UNKNOWN_ENTITY",
            SchemaError::AttributeNotFound { .. } => "SCHEMA_UNKNOWN_ATTRIBUTE",
            SchemaError::InvalidRelation { .. } => "SCHEMA_INVALID_RELATION",
            SchemaError::NoFulltextIndex(_) => "SCHEMA_NO_FULLTEXT_INDEX",
            SchemaError::Malformed { .. } => "SCHEMA_MALFORMED",
        }
    }
}
