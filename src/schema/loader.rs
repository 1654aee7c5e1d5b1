//! Schema loader
//!
//! A schema is a single JSON document of the form
//! `{"entities": {"<name>": {"attributes": {...}, "indexes": [...]}}}`.
//! Malformed documents and dangling references are rejected before the
//! schema reaches a store.

use std::fs;
use std::path::Path;

use super::errors::{SchemaError, SchemaResult};
use super::types::Schema;
use crate::observability::{log_event, Event, Severity};

/// Loads and checks schemas
pub struct SchemaLoader;

impl SchemaLoader {
    /// Parses a schema from a JSON string.
    pub fn from_json_str(content: &str) -> SchemaResult<Schema> {
        Self::parse("<in-memory>", content)
    }

    /// Reads and parses a schema file.
    pub fn from_file(path: &Path) -> SchemaResult<Schema> {
        let location = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|e| {
            SchemaError::malformed(location.clone(), format!("Failed to read file: {}", e))
        })?;
        Self::parse(&location, &content)
    }

    /// Checks a programmatically built schema.
    pub fn register(schema: Schema) -> SchemaResult<Schema> {
        schema
            .validate_structure()
            .map_err(|e| SchemaError::malformed("<in-memory>", e))?;
        Ok(schema)
    }

    fn parse(location: &str, content: &str) -> SchemaResult<Schema> {
        let schema: Schema = serde_json::from_str(content)
            .map_err(|e| SchemaError::malformed(location, format!("Invalid JSON: {}", e)))?;

        schema
            .validate_structure()
            .map_err(|e| SchemaError::malformed(location, e))?;

        let entities = schema.entities.len().to_string();
        log_event(
            Severity::default(),
            Event::SchemaLoaded,
            &[("location", location), ("entities", &entities)],
        );
        Ok(schema)
    }
}
