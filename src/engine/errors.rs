//! Store error types
//!
//! Error kinds:
//! - Structural: malformed query, unknown schema name, invalid operation
//! - Evaluation: an expression label never bound
//! - Conflict: row owned by another transaction, duplicate label, bad txn
//! - Integrity: creating a row whose id already exists

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::query::QueryError;
use crate::schema::SchemaError;
use crate::storage::{Row, TxnId};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Coarse classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Structural,
    Evaluation,
    Conflict,
    Integrity,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Structural => write!(f, "STRUCTURAL"),
            ErrorKind::Evaluation => write!(f, "EVALUATION"),
            ErrorKind::Conflict => write!(f, "CONFLICT"),
            ErrorKind::Integrity => write!(f, "INTEGRITY"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Query(#[from] QueryError),

    /// The row has a pending change owned by another transaction
    #[error("Row {entity}.{id} is locked by transaction {owner}")]
    RowLocked {
        entity: String,
        id: String,
        owner: TxnId,
    },

    /// A create hit an id that already exists; carries the visible row
    #[error("Row {entity}.{id} already exists")]
    CongruentRowExists { entity: String, id: String, row: Row },

    #[error("Unknown transaction {0}")]
    UnknownTransaction(TxnId),

    #[error("Mutation requires an active transaction")]
    NoActiveTransaction,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl StoreError {
    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        StoreError::InvalidOperation(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Schema(_) | StoreError::InvalidOperation(_) => ErrorKind::Structural,
            StoreError::Query(QueryError::ExpressionUnresolved { .. }) => ErrorKind::Evaluation,
            StoreError::Query(QueryError::DuplicateNodeId(_)) => ErrorKind::Conflict,
            StoreError::Query(_) => ErrorKind::Structural,
            StoreError::RowLocked { .. }
            | StoreError::UnknownTransaction(_)
            | StoreError::NoActiveTransaction => ErrorKind::Conflict,
            StoreError::CongruentRowExists { .. } => ErrorKind::Integrity,
        }
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Schema(inner) => inner.code(),
            StoreError::Query(inner) => inner.code(),
            StoreError::RowLocked { .. } => "STORE_ROW_LOCKED",
            StoreError::CongruentRowExists { .. } => "STORE_CONGRUENT_ROW_EXISTS",
            StoreError::UnknownTransaction(_) => "STORE_UNKNOWN_TRANSACTION",
            StoreError::NoActiveTransaction => "STORE_NO_ACTIVE_TRANSACTION",
            StoreError::InvalidOperation(_) => "STORE_INVALID_OPERATION",
        }
    }

    /// The existing row, for `CongruentRowExists`
    pub fn existing_row(&self) -> Option<&Row> {
        match self {
            StoreError::CongruentRowExists { row, .. } => Some(row),
            _ => None,
        }
    }

    /// JSON form for callers forwarding errors
    pub fn to_value(&self) -> Value {
        let mut out = serde_json::Map::new();
        out.insert("code".into(), Value::from(self.code()));
        out.insert("kind".into(), Value::from(self.kind().to_string()));
        out.insert("message".into(), Value::from(self.to_string()));
        if let Some(row) = self.existing_row() {
            out.insert("row".into(), Value::Object(row.clone()));
        }
        Value::Object(out)
    }
}
