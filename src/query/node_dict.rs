//! Per-row bindings from node-id labels to rows

use std::collections::{HashMap, HashSet};

use super::errors::{QueryError, QueryResult};
use crate::storage::Row;

/// Rows bound under `#id` labels while one row is filtered or projected.
///
/// Cloned per row so bindings never leak between sibling rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeDict {
    nodes: HashMap<String, Row>,
    // labels under a relation whose target is absent in obscure mode
    obscured: HashSet<String>,
}

impl NodeDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-binds `label`, for callers seeding correlated evaluation.
    pub fn with(mut self, label: impl Into<String>, row: Row) -> Self {
        self.nodes.insert(label.into(), row);
        self
    }

    /// Binds `row` under `label`; a label may only be bound once.
    pub fn bind(&mut self, label: &str, row: Row) -> QueryResult<()> {
        if self.nodes.contains_key(label) {
            return Err(QueryError::DuplicateNodeId(label.to_string()));
        }
        self.nodes.insert(label.to_string(), row);
        Ok(())
    }

    pub fn get(&self, label: &str) -> Option<&Row> {
        self.nodes.get(label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.nodes.contains_key(label)
    }

    /// Marks `label` as unbindable for this row: its relation target is
    /// absent and obscure filtering cannot disprove anything about it.
    pub fn obscure(&mut self, label: &str) {
        self.obscured.insert(label.to_string());
    }

    pub fn is_obscured(&self, label: &str) -> bool {
        self.obscured.contains(label)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
