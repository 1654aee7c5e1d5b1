//! Schema type definitions
//!
//! Attribute types:
//! - string, int, float, bool: plain scalar columns
//! - object, array: opaque JSON columns
//! - ref: many-to-one pointer; attribute `owner` is stored in column `ownerId`
//! - entity: polymorphic pointer; must be named `entity` and is stored in the
//!   `entity` / `entityId` column pair

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::errors::{SchemaError, SchemaResult};

/// Columns every entity carries without declaring them.
pub const IMPLICIT_COLUMNS: [&str; 4] = ["id", "$$createAt$$", "$$updateAt$$", "$$seq$$"];

/// Attribute name reserved for polymorphic pointers.
pub const ENTITY_ATTRIBUTE: &str = "entity";

/// Column holding the id of a polymorphic pointer's target.
pub const ENTITY_ID_COLUMN: &str = "entityId";

/// Supported attribute types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AttrType {
    String,
    Int,
    Float,
    Bool,
    Object,
    Array,
    /// Many-to-one pointer to `target`
    Ref { target: String },
    /// Polymorphic pointer to any of `targets`
    Entity { targets: Vec<String> },
}

impl AttrType {
    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            AttrType::String => "string",
            AttrType::Int => "int",
            AttrType::Float => "float",
            AttrType::Bool => "bool",
            AttrType::Object => "object",
            AttrType::Array => "array",
            AttrType::Ref { .. } => "ref",
            AttrType::Entity { .. } => "entity",
        }
    }
}

/// Attribute definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDef {
    #[serde(flatten)]
    pub attr_type: AttrType,
    #[serde(default)]
    pub required: bool,
}

impl AttributeDef {
    fn optional(attr_type: AttrType) -> Self {
        Self {
            attr_type,
            required: false,
        }
    }

    pub fn string() -> Self {
        Self::optional(AttrType::String)
    }

    pub fn int() -> Self {
        Self::optional(AttrType::Int)
    }

    pub fn float() -> Self {
        Self::optional(AttrType::Float)
    }

    pub fn bool() -> Self {
        Self::optional(AttrType::Bool)
    }

    pub fn array() -> Self {
        Self::optional(AttrType::Array)
    }

    /// Many-to-one pointer to `target`
    pub fn reference(target: impl Into<String>) -> Self {
        Self::optional(AttrType::Ref {
            target: target.into(),
        })
    }

    /// Polymorphic pointer to any of `targets`
    pub fn entity<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::optional(AttrType::Entity {
            targets: targets.into_iter().map(Into::into).collect(),
        })
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Secondary index definition. Only fulltext indexes affect query semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub attributes: Vec<String>,
    #[serde(default)]
    pub fulltext: bool,
}

impl IndexDef {
    pub fn fulltext<I, S>(name: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            attributes: attributes.into_iter().map(Into::into).collect(),
            fulltext: true,
        }
    }
}

/// Definition of a single entity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl EntityDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, def: AttributeDef) -> Self {
        self.attributes.insert(name.into(), def);
        self
    }

    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Targets of the entity's polymorphic pointer, if it has one
    pub fn polymorphic_targets(&self) -> Option<&[String]> {
        match self.attributes.get(ENTITY_ATTRIBUTE) {
            Some(AttributeDef {
                attr_type: AttrType::Entity { targets },
                ..
            }) => Some(targets),
            _ => None,
        }
    }

    /// The fulltext index, if any
    pub fn fulltext_index(&self) -> Option<&IndexDef> {
        self.indexes.iter().find(|index| index.fulltext)
    }
}

/// Complete storage schema: every entity the store knows about
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub entities: BTreeMap<String, EntityDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, name: impl Into<String>, def: EntityDef) -> Self {
        self.entities.insert(name.into(), def);
        self
    }

    /// Looks up an entity definition
    pub fn entity(&self, name: &str) -> SchemaResult<&EntityDef> {
        self.entities
            .get(name)
            .ok_or_else(|| SchemaError::EntityNotFound(name.to_string()))
    }

    /// Attributes covered by the entity's fulltext index
    pub fn fulltext_attributes(&self, entity: &str) -> SchemaResult<&[String]> {
        self.entity(entity)?
            .fulltext_index()
            .map(|index| index.attributes.as_slice())
            .ok_or_else(|| SchemaError::NoFulltextIndex(entity.to_string()))
    }

    /// Validates cross-entity references and reserved names.
    pub fn validate_structure(&self) -> Result<(), String> {
        for (name, def) in &self.entities {
            if name.contains('$') {
                return Err(format!("entity name {} must not contain '$'", name));
            }
            for (attr, attr_def) in &def.attributes {
                match &attr_def.attr_type {
                    AttrType::Ref { target } => {
                        if !self.entities.contains_key(target) {
                            return Err(format!(
                                "{}.{} references unknown entity {}",
                                name, attr, target
                            ));
                        }
                    }
                    AttrType::Entity { targets } => {
                        if attr != ENTITY_ATTRIBUTE {
                            return Err(format!(
                                "{}.{}: polymorphic pointers must be named '{}'",
                                name, attr, ENTITY_ATTRIBUTE
                            ));
                        }
                        if let Some(target) =
                            targets.iter().find(|t| !self.entities.contains_key(*t))
                        {
                            return Err(format!(
                                "{}.{} references unknown entity {}",
                                name, attr, target
                            ));
                        }
                    }
                    _ => {}
                }
            }
            if def.indexes.iter().filter(|index| index.fulltext).count() > 1 {
                return Err(format!("{} declares more than one fulltext index", name));
            }
            for index in &def.indexes {
                if let Some(attr) = index
                    .attributes
                    .iter()
                    .find(|a| !def.attributes.contains_key(*a))
                {
                    return Err(format!(
                        "index {} on {} covers unknown attribute {}",
                        index.name, name, attr
                    ));
                }
            }
        }
        Ok(())
    }
}
