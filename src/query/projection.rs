//! Result formation: projection, deferred expressions, sort, pagination

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{json, Map, Value};

use super::errors::{QueryError, QueryResult};
use super::expr::{is_expression_key, Evaluation, Expression};
use super::node_dict::NodeDict;
use super::read_view::{Pointer, ReadView, Target};
use super::selection::{SelectOption, Selection};
use super::sorter::SortPlan;
use crate::schema::{
    foreign_key_column, judge_relation, Relation, ENTITY_ATTRIBUTE, ENTITY_ID_COLUMN,
};
use crate::storage::Row;

const NODE_ID: &str = "#id";

/// An expression field still waiting on a label, with where it goes
#[derive(Debug)]
struct PendingField {
    path: Vec<String>,
    name: String,
    expr: Expression,
}

/// Projects every row, sorts, then slices `[indexFrom, indexFrom + count)`
/// when `count` is given.
///
/// Each row gets its own copy of `dict`.
pub fn form_result<'a>(
    view: ReadView<'a>,
    entity: &'a str,
    rows: Vec<Row>,
    selection: &'a Selection,
    dict: &'a NodeDict,
    obscure: bool,
) -> BoxFuture<'a, QueryResult<Vec<Row>>> {
    async move {
        let mut projection = selection.data.clone();
        let plan = selection
            .sorter
            .as_ref()
            .map(|sorter| SortPlan::compile(view.schema(), entity, sorter, &mut projection))
            .transpose()?;

        let mut projected = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut row_dict = dict.clone();
            let mut pending = Vec::new();
            let mut out = form_projection(
                view,
                entity,
                row,
                &projection,
                &mut row_dict,
                &mut pending,
                Vec::new(),
                obscure,
            )
            .await?;
            for field in pending {
                let value = field.expr.resolve(&row_dict)?;
                write_at(&mut out, &field.path, field.name, value);
            }
            projected.push(out);
        }

        if let Some(plan) = plan {
            projected = plan.sort(view, &rows, projected);
        }

        Ok(match selection.count {
            Some(count) => projected
                .into_iter()
                .skip(selection.index_from.unwrap_or(0))
                .take(count)
                .collect(),
            None => projected,
        })
    }
    .boxed()
}

#[allow(clippy::too_many_arguments)]
fn form_projection<'a>(
    view: ReadView<'a>,
    entity: &'a str,
    row: &'a Row,
    projection: &'a Map<String, Value>,
    dict: &'a mut NodeDict,
    pending: &'a mut Vec<PendingField>,
    path: Vec<String>,
    obscure: bool,
) -> BoxFuture<'a, QueryResult<Row>> {
    async move {
        match projection.get(NODE_ID) {
            None => {}
            Some(Value::String(label)) => dict.bind(label, row.clone())?,
            Some(_) => return Err(QueryError::invalid("#id must be a string")),
        }

        let mut out = Row::new();
        for (key, spec) in projection {
            if key == NODE_ID {
                continue;
            }
            if is_expression_key(key) {
                match Expression::parse(spec)?.evaluate(Some(row), dict) {
                    Evaluation::Resolved(value) => {
                        out.insert(key.clone(), value);
                    }
                    Evaluation::Pending(expr) => pending.push(PendingField {
                        path: path.clone(),
                        name: key.clone(),
                        expr,
                    }),
                }
                continue;
            }

            match judge_relation(view.schema(), entity, key)? {
                Relation::Column => {
                    if let Some(value) = row.get(key) {
                        out.insert(key.clone(), value.clone());
                    }
                }
                Relation::ToMany {
                    target,
                    foreign_key,
                } => {
                    let children =
                        select_children(view, entity, row, &target, foreign_key.as_deref(), spec, dict, obscure)
                            .await?;
                    out.insert(key.clone(), Value::Array(children.into_iter().map(Value::Object).collect()));
                }
                relation => {
                    let Some(pointer) = Pointer::from_relation(key, relation) else {
                        continue;
                    };
                    let nested_spec = spec.as_object().ok_or_else(|| {
                        QueryError::invalid(format!("projection of {} must be an object", key))
                    })?;

                    let target = view.follow(&pointer, row);
                    if matches!(target, Target::Unset | Target::Elsewhere)
                        && matches!(pointer, Pointer::Polymorphic { .. })
                    {
                        continue;
                    }
                    match &pointer {
                        Pointer::Polymorphic { .. } => {
                            for column in [ENTITY_ATTRIBUTE, ENTITY_ID_COLUMN] {
                                if let Some(value) = row.get(column) {
                                    out.insert(column.to_string(), value.clone());
                                }
                            }
                        }
                        Pointer::ForeignKey { column, .. } => {
                            if let Some(value) = row.get(column) {
                                out.insert(column.clone(), value.clone());
                            }
                        }
                    }

                    let nested = match target {
                        Target::Found(target_row) => {
                            let mut nested_path = path.clone();
                            nested_path.push(key.clone());
                            let nested = form_projection(
                                view,
                                pointer.target(),
                                &target_row,
                                nested_spec,
                                dict,
                                pending,
                                nested_path,
                                obscure,
                            )
                            .await?;
                            Value::Object(nested)
                        }
                        _ => Value::Null,
                    };
                    out.insert(key.clone(), nested);
                }
            }
        }
        Ok(out)
    }
    .boxed()
}

/// Rows of `target` pointing back at `row`, formed by the sub-selection
/// `spec` with the parent's bindings inherited.
#[allow(clippy::too_many_arguments)]
async fn select_children(
    view: ReadView<'_>,
    entity: &str,
    row: &Row,
    target: &str,
    foreign_key: Option<&str>,
    spec: &Value,
    dict: &NodeDict,
    obscure: bool,
) -> QueryResult<Vec<Row>> {
    let mut selection = Selection::from_value(spec)?;
    let Some(id) = row.get("id").cloned() else {
        return Ok(Vec::new());
    };

    let back_reference = match foreign_key {
        Some(pointer) => json!({ foreign_key_column(pointer): id }),
        None => json!({ ENTITY_ATTRIBUTE: entity, ENTITY_ID_COLUMN: id }),
    };
    selection.filter = Some(match selection.filter.take() {
        Some(filter) => json!({ "$and": [back_reference, filter] }),
        None => back_reference,
    });

    let option = SelectOption {
        obscure,
        node_dict: dict.clone(),
    };
    view.select(target, &selection, &option).await
}

fn write_at(out: &mut Row, path: &[String], name: String, value: Value) {
    let mut cursor = out;
    for step in path {
        match cursor.get_mut(step) {
            Some(Value::Object(next)) => cursor = next,
            _ => return,
        }
    }
    cursor.insert(name, value);
}
