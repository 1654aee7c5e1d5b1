//! Attribute classification
//!
//! Every attribute a query names is one of:
//! - a plain column (declared scalar, implicit column, or a pointer's storage column)
//! - a polymorphic pointer: the attribute is named after one of the targets of
//!   the entity's `entity` attribute, and is followed through `entityId`
//! - a foreign key: a `ref` attribute `x`, followed through column `xId`
//! - a one-to-many back-reference, spelled `target$pointer`: rows of `target`
//!   whose `pointer` (a `ref` attribute, or the polymorphic `entity`) points
//!   back at this row

use super::errors::{SchemaError, SchemaResult};
use super::types::{AttrType, Schema, ENTITY_ATTRIBUTE, IMPLICIT_COLUMNS};

/// How an attribute relates its row to other rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    Column,
    Polymorphic { target: String },
    ForeignKey { target: String },
    ToMany {
        target: String,
        /// `None` when the back-reference goes through `entity`/`entityId`
        foreign_key: Option<String>,
    },
}

/// Storage column holding the id a foreign key attribute points at.
pub fn foreign_key_column(attribute: &str) -> String {
    format!("{}Id", attribute)
}

/// Classifies `attribute` of `entity`.
///
/// Pure function of its inputs.
pub fn judge_relation(schema: &Schema, entity: &str, attribute: &str) -> SchemaResult<Relation> {
    let def = schema.entity(entity)?;

    if IMPLICIT_COLUMNS.contains(&attribute) {
        return Ok(Relation::Column);
    }

    if let Some((target, pointer)) = split_back_reference(attribute) {
        return judge_back_reference(schema, entity, attribute, target, pointer);
    }

    if let Some(attr_def) = def.attributes.get(attribute) {
        return Ok(match &attr_def.attr_type {
            AttrType::Ref { target } => Relation::ForeignKey {
                target: target.clone(),
            },
            // the `entity` column itself holds the target's name
            _ => Relation::Column,
        });
    }

    if let Some(prefix) = attribute.strip_suffix("Id") {
        let is_pointer_column = def.attributes.get(prefix).map_or(false, |attr_def| {
            matches!(
                attr_def.attr_type,
                AttrType::Ref { .. } | AttrType::Entity { .. }
            )
        });
        if is_pointer_column {
            return Ok(Relation::Column);
        }
    }

    if let Some(targets) = def.polymorphic_targets() {
        if targets.iter().any(|t| t == attribute) {
            return Ok(Relation::Polymorphic {
                target: attribute.to_string(),
            });
        }
    }

    Err(SchemaError::attribute_not_found(entity, attribute))
}

fn split_back_reference(attribute: &str) -> Option<(&str, &str)> {
    if attribute.starts_with('$') {
        return None;
    }
    let (target, pointer) = attribute.split_once('$')?;
    if target.is_empty() || pointer.is_empty() {
        return None;
    }
    Some((target, pointer))
}

fn judge_back_reference(
    schema: &Schema,
    entity: &str,
    attribute: &str,
    target: &str,
    pointer: &str,
) -> SchemaResult<Relation> {
    let invalid = |reason: String| SchemaError::InvalidRelation {
        entity: entity.to_string(),
        attribute: attribute.to_string(),
        reason,
    };

    let target_def = schema.entity(target)?;

    if pointer == ENTITY_ATTRIBUTE {
        return match target_def.polymorphic_targets() {
            Some(targets) if targets.iter().any(|t| t == entity) => Ok(Relation::ToMany {
                target: target.to_string(),
                foreign_key: None,
            }),
            _ => Err(invalid(format!(
                "{}.entity cannot point at {}",
                target, entity
            ))),
        };
    }

    match target_def.attributes.get(pointer).map(|def| &def.attr_type) {
        Some(AttrType::Ref { target: pointee }) if pointee == entity => Ok(Relation::ToMany {
            target: target.to_string(),
            foreign_key: Some(pointer.to_string()),
        }),
        _ => Err(invalid(format!(
            "{}.{} is not a reference to {}",
            target, pointer, entity
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeDef, EntityDef};

    fn schema() -> Schema {
        Schema::new()
            .with_entity(
                "user",
                EntityDef::new().with_attribute("name", AttributeDef::string()),
            )
            .with_entity(
                "order",
                EntityDef::new()
                    .with_attribute("price", AttributeDef::int())
                    .with_attribute("user", AttributeDef::reference("user")),
            )
            .with_entity(
                "comment",
                EntityDef::new()
                    .with_attribute("text", AttributeDef::string())
                    .with_attribute("entity", AttributeDef::entity(["user", "order"])),
            )
    }

    #[test]
    fn test_plain_columns() {
        let schema = schema();
        assert_eq!(judge_relation(&schema, "order", "price"), Ok(Relation::Column));
        assert_eq!(judge_relation(&schema, "order", "id"), Ok(Relation::Column));
        assert_eq!(
            judge_relation(&schema, "order", "$$createAt$$"),
            Ok(Relation::Column)
        );
    }

    #[test]
    fn test_pointer_storage_columns_are_plain() {
        let schema = schema();
        assert_eq!(judge_relation(&schema, "order", "userId"), Ok(Relation::Column));
        assert_eq!(judge_relation(&schema, "comment", "entity"), Ok(Relation::Column));
        assert_eq!(
            judge_relation(&schema, "comment", "entityId"),
            Ok(Relation::Column)
        );
    }

    #[test]
    fn test_foreign_key() {
        assert_eq!(
            judge_relation(&schema(), "order", "user"),
            Ok(Relation::ForeignKey {
                target: "user".into()
            })
        );
    }

    #[test]
    fn test_polymorphic() {
        assert_eq!(
            judge_relation(&schema(), "comment", "order"),
            Ok(Relation::Polymorphic {
                target: "order".into()
            })
        );
    }

    #[test]
    fn test_to_many() {
        let schema = schema();
        assert_eq!(
            judge_relation(&schema, "user", "order$user"),
            Ok(Relation::ToMany {
                target: "order".into(),
                foreign_key: Some("user".into())
            })
        );
        assert_eq!(
            judge_relation(&schema, "order", "comment$entity"),
            Ok(Relation::ToMany {
                target: "comment".into(),
                foreign_key: None
            })
        );
    }

    #[test]
    fn test_invalid_back_reference() {
        let err = judge_relation(&schema(), "order", "order$user").unwrap_err();
        assert!(matches!(err, SchemaError::InvalidRelation { .. }));
    }

    #[test]
    fn test_unknown_attribute() {
        assert_eq!(
            judge_relation(&schema(), "user", "age"),
            Err(SchemaError::attribute_not_found("user", "age"))
        );
        assert_eq!(
            judge_relation(&schema(), "ghost", "age"),
            Err(SchemaError::EntityNotFound("ghost".into()))
        );
    }
}
