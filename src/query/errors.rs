//! Query error types
//!
//! Structural errors (malformed filters, projections, sorters) are raised
//! while compiling; evaluation errors are raised while a row is checked or
//! projected.

use thiserror::Error;

use crate::schema::SchemaError;

/// Result type for query compilation and evaluation
pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Unsupported operator or malformed payload
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// An expression references a node id its row never binds
    #[error("Expression unresolved: node '{node}' is never bound")]
    ExpressionUnresolved { node: String },

    /// A node id label bound twice within one row's evaluation
    #[error("Duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl QueryError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        QueryError::InvalidQuery(reason.into())
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::InvalidQuery(_) => "QUERY_INVALID",
            QueryError::ExpressionUnresolved { .. } => "QUERY_EXPRESSION_UNRESOLVED",
            QueryError::DuplicateNodeId(_) => "QUERY_DUPLICATE_NODE_ID",
            QueryError::Schema(inner) => inner.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(QueryError::invalid("x").code(), "QUERY_INVALID");
        assert_eq!(
            QueryError::ExpressionUnresolved { node: "n".into() }.code(),
            "QUERY_EXPRESSION_UNRESOLVED"
        );
        assert_eq!(
            QueryError::from(SchemaError::EntityNotFound("e".into())).code(),
            "SCHEMA_UNKNOWN_ENTITY"
        );
    }

    #[test]
    fn test_display_names_node() {
        let err = QueryError::ExpressionUnresolved { node: "parent".into() };
        assert!(err.to_string().contains("parent"));
    }
}
