//! Schema model and attribute classification
//!
//! The query engine never inspects entity definitions directly; it asks
//! [`judge_relation`] how an attribute relates its row to other rows and
//! [`Schema::fulltext_attributes`] which columns `$text` searches.

mod errors;
mod loader;
mod relation;
mod types;

pub use errors::{SchemaError, SchemaResult};
pub use loader::SchemaLoader;
pub use relation::{foreign_key_column, judge_relation, Relation};
pub use types::{
    AttrType, AttributeDef, EntityDef, IndexDef, Schema, ENTITY_ATTRIBUTE, ENTITY_ID_COLUMN,
    IMPLICIT_COLUMNS,
};
