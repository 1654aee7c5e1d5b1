//! Result sorting
//!
//! Sort spec: `[{"$attr": {...}, "$direction": "asc" | "desc"}]`, where
//! `$attr` names a column (`{"age": 1}`), follows a pointer
//! (`{"author": {"name": 1}}`), or computes an expression
//! (`{"$expr": {...}}`).
//!
//! Expression keys are hoisted into the projection under the first unused
//! `$exprN` name, so each is computed once per row while projecting. Keys are
//! then extracted once per row and the rows sorted stably.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::errors::{QueryError, QueryResult};
use super::expr::{is_expression_key, Expression};
use super::read_view::{Pointer, ReadView, Target};
use super::value::compare_values;
use crate::schema::{judge_relation, Relation, Schema};
use crate::storage::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
enum SortKey {
    Column(String),
    /// A hoisted expression, read back from the projected row
    Expr(String),
    Relation {
        attr: String,
        pointer: Pointer,
        inner: Box<SortKey>,
    },
}

/// A compiled sort spec
#[derive(Debug, Clone, PartialEq)]
pub struct SortPlan {
    keys: Vec<(SortKey, SortDirection)>,
}

impl SortPlan {
    /// Compiles `sorter` for `entity`, hoisting expression keys into
    /// `projection`.
    pub fn compile(
        schema: &Schema,
        entity: &str,
        sorter: &Value,
        projection: &mut Map<String, Value>,
    ) -> QueryResult<Self> {
        let items = match sorter {
            Value::Array(items) => items.as_slice(),
            _ => return Err(QueryError::invalid("sorter must be an array")),
        };

        let mut keys = Vec::with_capacity(items.len());
        for item in items {
            let attr = item
                .get("$attr")
                .ok_or_else(|| QueryError::invalid("sort item requires $attr"))?;
            let direction = match item.get("$direction") {
                None => SortDirection::Asc,
                Some(Value::String(d)) if d == "asc" => SortDirection::Asc,
                Some(Value::String(d)) if d == "desc" => SortDirection::Desc,
                Some(other) => {
                    return Err(QueryError::invalid(format!(
                        "unsupported sort direction {}",
                        other
                    )))
                }
            };
            keys.push((compile_key(schema, entity, attr, projection)?, direction));
        }
        Ok(Self { keys })
    }

    /// Sorts `projected` (parallel to `raw`), stable for ties.
    pub fn sort(&self, view: ReadView<'_>, raw: &[Row], projected: Vec<Row>) -> Vec<Row> {
        let mut decorated: Vec<(Vec<Value>, Row)> = raw
            .iter()
            .zip(projected)
            .map(|(raw, out)| {
                let keys = self
                    .keys
                    .iter()
                    .map(|(key, _)| key.extract(view, Some(raw), Some(&out)))
                    .collect();
                (keys, out)
            })
            .collect();

        decorated.sort_by(|(a, _), (b, _)| self.compare(a, b));
        decorated.into_iter().map(|(_, row)| row).collect()
    }

    fn compare(&self, a: &[Value], b: &[Value]) -> Ordering {
        for ((_, direction), (x, y)) in self.keys.iter().zip(a.iter().zip(b)) {
            let ordering = match direction {
                SortDirection::Asc => compare_values(x, y),
                SortDirection::Desc => compare_values(x, y).reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl SortKey {
    fn extract(&self, view: ReadView<'_>, raw: Option<&Row>, projected: Option<&Row>) -> Value {
        match self {
            SortKey::Column(column) => raw.and_then(|r| r.get(column)).cloned().unwrap_or(Value::Null),
            SortKey::Expr(name) => projected
                .and_then(|p| p.get(name))
                .cloned()
                .unwrap_or(Value::Null),
            SortKey::Relation {
                attr,
                pointer,
                inner,
            } => {
                let target = raw.and_then(|r| match view.follow(pointer, r) {
                    Target::Found(target) => Some(target),
                    _ => None,
                });
                let nested = projected.and_then(|p| p.get(attr)).and_then(Value::as_object);
                inner.extract(view, target.as_ref(), nested)
            }
        }
    }
}

fn compile_key(
    schema: &Schema,
    entity: &str,
    spec: &Value,
    projection: &mut Map<String, Value>,
) -> QueryResult<SortKey> {
    let (attr, value) = match spec {
        Value::Object(map) if map.len() == 1 => map
            .iter()
            .next()
            .ok_or_else(|| QueryError::invalid("empty sort attribute"))?,
        _ => {
            return Err(QueryError::invalid(
                "sort $attr must name exactly one attribute",
            ))
        }
    };

    if is_expression_key(attr) {
        Expression::parse(value)?;
        let name = unused_expression_name(projection);
        projection.insert(name.clone(), value.clone());
        return Ok(SortKey::Expr(name));
    }

    match judge_relation(schema, entity, attr)? {
        Relation::Column => Ok(SortKey::Column(attr.clone())),
        Relation::ToMany { .. } => Err(QueryError::invalid(format!(
            "cannot sort on one-to-many attribute {}",
            attr
        ))),
        relation => {
            let pointer = Pointer::from_relation(attr, relation)
                .ok_or_else(|| QueryError::invalid(format!("{} is not a pointer", attr)))?;
            let target = pointer.target().to_string();

            let inner = if contains_expression(value) {
                let slot = projection
                    .entry(attr.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                let Value::Object(nested) = slot else {
                    return Err(QueryError::invalid(format!("projection of {} is not an object", attr)));
                };
                compile_key(schema, &target, value, nested)?
            } else {
                compile_key(schema, &target, value, &mut Map::new())?
            };

            Ok(SortKey::Relation {
                attr: attr.clone(),
                pointer,
                inner: Box::new(inner),
            })
        }
    }
}

fn unused_expression_name(projection: &Map<String, Value>) -> String {
    (1..)
        .map(|n| format!("$expr{}", n))
        .find(|name| !projection.contains_key(name))
        .unwrap_or_default()
}

fn contains_expression(spec: &Value) -> bool {
    match spec {
        Value::Object(map) => map
            .iter()
            .any(|(key, inner)| is_expression_key(key) || contains_expression(inner)),
        _ => false,
    }
}
