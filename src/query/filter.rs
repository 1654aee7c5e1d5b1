//! Filter compilation and evaluation
//!
//! A filter object compiles into a [`CompiledFilter`]: an optional `#id`
//! label plus a conjunction of [`FilterNode`]s. Evaluating it against one row
//! yields an [`Outcome`]; expressions waiting on a label that is bound later
//! in the same row's filter come back as a deferred [`Condition`], which
//! [`Outcome::finish`] settles against the final node dictionary.

use std::collections::HashSet;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;

use super::errors::{QueryError, QueryResult};
use super::expr::{is_expression_key, Evaluation, Expression};
use super::node_dict::NodeDict;
use super::read_view::{Pointer, ReadView, Target};
use super::value::{compare_scalars, is_truthy, value_key, values_equal};
use crate::schema::{judge_relation, Relation, Schema};
use crate::storage::Row;

const NODE_ID: &str = "#id";

/// Result of evaluating a filter against one row
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Known(bool),
    Deferred(Condition),
}

/// A filter result still depending on unbound labels
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Expr(Expression),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// `None` when the condition only reads obscured labels and so can be
    /// neither proven nor disproven.
    fn settle(&self, dict: &NodeDict) -> QueryResult<Option<bool>> {
        match self {
            Condition::Expr(expr) => {
                let unbound = expr.unbound_labels(dict);
                if !unbound.is_empty() && unbound.iter().all(|label| dict.is_obscured(label)) {
                    return Ok(None);
                }
                Ok(Some(is_truthy(&expr.resolve(dict)?)))
            }
            Condition::All(items) => {
                let mut unknown = false;
                for item in items {
                    match item.settle(dict)? {
                        Some(false) => return Ok(Some(false)),
                        Some(true) => {}
                        None => unknown = true,
                    }
                }
                Ok(if unknown { None } else { Some(true) })
            }
            Condition::Any(items) => {
                let mut unknown = false;
                for item in items {
                    match item.settle(dict)? {
                        Some(true) => return Ok(Some(true)),
                        Some(false) => {}
                        None => unknown = true,
                    }
                }
                Ok(if unknown { None } else { Some(false) })
            }
            Condition::Not(inner) => Ok(inner.settle(dict)?.map(|passed| !passed)),
        }
    }
}

impl Outcome {
    /// Second pass: settles a deferred outcome against the final bindings.
    pub fn finish(self, dict: &NodeDict) -> QueryResult<bool> {
        match self {
            Outcome::Known(passed) => Ok(passed),
            // unknown only arises in obscure mode, where it passes
            Outcome::Deferred(condition) => Ok(condition.settle(dict)?.unwrap_or(true)),
        }
    }

    fn all(mut deferred: Vec<Condition>) -> Self {
        match deferred.len() {
            0 => Outcome::Known(true),
            1 => Outcome::Deferred(deferred.remove(0)),
            _ => Outcome::Deferred(Condition::All(deferred)),
        }
    }

    fn any(mut deferred: Vec<Condition>) -> Self {
        match deferred.len() {
            0 => Outcome::Known(false),
            1 => Outcome::Deferred(deferred.remove(0)),
            _ => Outcome::Deferred(Condition::Any(deferred)),
        }
    }

    fn negate(self) -> Self {
        match self {
            Outcome::Known(passed) => Outcome::Known(!passed),
            Outcome::Deferred(condition) => Outcome::Deferred(Condition::Not(Box::new(condition))),
        }
    }
}

/// A compiled filter object for one entity
#[derive(Debug)]
pub struct CompiledFilter {
    label: Option<String>,
    obscure: bool,
    nodes: Vec<FilterNode>,
}

#[derive(Debug)]
enum FilterNode {
    And(Vec<CompiledFilter>),
    Or(Vec<CompiledFilter>),
    Not(Box<CompiledFilter>),
    Expr(Expression),
    Text {
        attributes: Vec<String>,
        search: String,
    },
    Attribute {
        attr: String,
        ops: Vec<AttrOp>,
    },
    Relation {
        pointer: Pointer,
        filter: Box<CompiledFilter>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug)]
enum AttrOp {
    Compare(CompareOp, Value),
    Between(Value, Value),
    StartsWith(String),
    EndsWith(String),
    Includes(Value),
    Exists(bool),
    In(Candidates),
    Nin(Candidates),
}

#[derive(Debug)]
enum Candidates {
    Literal(HashSet<String>),
    Subquery(Box<Subquery>),
}

/// `{entity, data: {attr: 1}, filter?}` inside `$in`/`$nin`
#[derive(Debug)]
struct Subquery {
    entity: String,
    attribute: String,
    filter: Option<CompiledFilter>,
    /// The filter reads a label bound outside the subquery.
    correlated: bool,
    cache: OnceCell<HashSet<String>>,
}

impl CompiledFilter {
    pub fn compile(
        schema: &Schema,
        entity: &str,
        filter: &Value,
        obscure: bool,
    ) -> QueryResult<Self> {
        let Value::Object(map) = filter else {
            return Err(QueryError::invalid(format!(
                "filter on {} must be an object",
                entity
            )));
        };

        let label = match map.get(NODE_ID) {
            None => None,
            Some(Value::String(label)) => Some(label.clone()),
            Some(_) => return Err(QueryError::invalid("#id must be a string")),
        };

        let mut nodes = Vec::with_capacity(map.len());
        for (key, value) in map {
            if key == NODE_ID {
                continue;
            }
            nodes.push(compile_key(schema, entity, key, value, obscure)?);
        }

        Ok(Self {
            label,
            obscure,
            nodes,
        })
    }

    /// First pass over `row`. Binds `#id` before anything else at this
    /// level; stops at the first node known to fail.
    pub fn evaluate<'f>(
        &'f self,
        view: ReadView<'f>,
        row: &'f Row,
        dict: &'f mut NodeDict,
    ) -> BoxFuture<'f, QueryResult<Outcome>> {
        async move {
            if let Some(label) = &self.label {
                dict.bind(label, row.clone())?;
            }

            let mut deferred = Vec::new();
            for node in &self.nodes {
                match self.evaluate_node(node, view, row, dict).await? {
                    Outcome::Known(false) => return Ok(Outcome::Known(false)),
                    Outcome::Known(true) => {}
                    Outcome::Deferred(condition) => deferred.push(condition),
                }
            }
            Ok(Outcome::all(deferred))
        }
        .boxed()
    }

    fn obscure_labels(&self, dict: &mut NodeDict) {
        if let Some(label) = &self.label {
            dict.obscure(label);
        }
        for node in &self.nodes {
            match node {
                FilterNode::And(filters) | FilterNode::Or(filters) => {
                    for filter in filters {
                        filter.obscure_labels(dict);
                    }
                }
                FilterNode::Not(filter) | FilterNode::Relation { filter, .. } => {
                    filter.obscure_labels(dict)
                }
                _ => {}
            }
        }
    }

    async fn evaluate_node(
        &self,
        node: &FilterNode,
        view: ReadView<'_>,
        row: &Row,
        dict: &mut NodeDict,
    ) -> QueryResult<Outcome> {
        match node {
            FilterNode::And(filters) => {
                let mut deferred = Vec::new();
                for filter in filters {
                    match filter.evaluate(view, row, dict).await? {
                        Outcome::Known(false) => return Ok(Outcome::Known(false)),
                        Outcome::Known(true) => {}
                        Outcome::Deferred(condition) => deferred.push(condition),
                    }
                }
                Ok(Outcome::all(deferred))
            }
            FilterNode::Or(filters) => {
                let mut deferred = Vec::new();
                for filter in filters {
                    match filter.evaluate(view, row, dict).await? {
                        Outcome::Known(true) => return Ok(Outcome::Known(true)),
                        Outcome::Known(false) => {}
                        Outcome::Deferred(condition) => deferred.push(condition),
                    }
                }
                Ok(Outcome::any(deferred))
            }
            FilterNode::Not(filter) => Ok(filter.evaluate(view, row, dict).await?.negate()),
            FilterNode::Expr(expr) => Ok(match expr.evaluate(Some(row), dict) {
                Evaluation::Resolved(value) => Outcome::Known(is_truthy(&value)),
                Evaluation::Pending(pending) => Outcome::Deferred(Condition::Expr(pending)),
            }),
            FilterNode::Text { attributes, search } => {
                let mut missing = false;
                for attr in attributes {
                    match row.get(attr) {
                        Some(Value::String(text)) if text.contains(search.as_str()) => {
                            return Ok(Outcome::Known(true))
                        }
                        Some(_) => {}
                        None => missing = true,
                    }
                }
                Ok(Outcome::Known(missing && self.obscure))
            }
            FilterNode::Attribute { attr, ops } => {
                let Some(value) = row.get(attr) else {
                    let passed = self.obscure
                        || ops.iter().all(|op| matches!(op, AttrOp::Exists(false)));
                    return Ok(Outcome::Known(passed));
                };
                for op in ops {
                    if !self.check(op, value, view, dict).await? {
                        return Ok(Outcome::Known(false));
                    }
                }
                Ok(Outcome::Known(true))
            }
            FilterNode::Relation { pointer, filter } => match view.follow(pointer, row) {
                Target::Found(target) => filter.evaluate(view, &target, dict).await,
                Target::Elsewhere => Ok(Outcome::Known(false)),
                Target::Unset | Target::Missing => {
                    if self.obscure {
                        filter.obscure_labels(dict);
                    }
                    Ok(Outcome::Known(self.obscure))
                }
            },
        }
    }

    async fn check(
        &self,
        op: &AttrOp,
        value: &Value,
        view: ReadView<'_>,
        dict: &NodeDict,
    ) -> QueryResult<bool> {
        let ordered = |bound: &Value, accept: fn(std::cmp::Ordering) -> bool| {
            compare_scalars(value, bound).map_or(false, accept)
        };
        Ok(match op {
            AttrOp::Compare(CompareOp::Eq, expected) => values_equal(value, expected),
            AttrOp::Compare(CompareOp::Ne, expected) => !values_equal(value, expected),
            AttrOp::Compare(CompareOp::Gt, bound) => ordered(bound, |o| o.is_gt()),
            AttrOp::Compare(CompareOp::Gte, bound) => ordered(bound, |o| o.is_ge()),
            AttrOp::Compare(CompareOp::Lt, bound) => ordered(bound, |o| o.is_lt()),
            AttrOp::Compare(CompareOp::Lte, bound) => ordered(bound, |o| o.is_le()),
            AttrOp::Between(low, high) => {
                ordered(low, |o| o.is_ge()) && ordered(high, |o| o.is_le())
            }
            AttrOp::StartsWith(prefix) => value.as_str().map_or(false, |s| s.starts_with(prefix.as_str())),
            AttrOp::EndsWith(suffix) => value.as_str().map_or(false, |s| s.ends_with(suffix.as_str())),
            AttrOp::Includes(needle) => match (value, needle) {
                (Value::String(s), Value::String(n)) => s.contains(n.as_str()),
                (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
                _ => false,
            },
            AttrOp::Exists(expected) => !value.is_null() == *expected,
            AttrOp::In(_) if self.obscure => true,
            AttrOp::In(candidates) => candidates.contains(value, view, dict).await?,
            AttrOp::Nin(candidates) => !candidates.contains(value, view, dict).await?,
        })
    }
}

impl Candidates {
    async fn contains(&self, value: &Value, view: ReadView<'_>, dict: &NodeDict) -> QueryResult<bool> {
        let key = value_key(value);
        match self {
            Candidates::Literal(set) => Ok(set.contains(&key)),
            Candidates::Subquery(sub) if sub.correlated || !view.eager_subqueries => {
                let values = view
                    .collect_values(&sub.entity, &sub.attribute, sub.filter.as_ref(), dict)
                    .await?;
                Ok(values.contains(&key))
            }
            Candidates::Subquery(sub) => {
                let unbound = NodeDict::new();
                let values = sub
                    .cache
                    .get_or_try_init(|| {
                        view.collect_values(&sub.entity, &sub.attribute, sub.filter.as_ref(), &unbound)
                    })
                    .await?;
                Ok(values.contains(&key))
            }
        }
    }
}

fn compile_key(
    schema: &Schema,
    entity: &str,
    key: &str,
    value: &Value,
    obscure: bool,
) -> QueryResult<FilterNode> {
    match key {
        "$and" | "$or" => {
            let Value::Array(items) = value else {
                return Err(QueryError::invalid(format!("{} expects an array", key)));
            };
            let filters = items
                .iter()
                .map(|item| CompiledFilter::compile(schema, entity, item, obscure))
                .collect::<QueryResult<Vec<_>>>()?;
            Ok(if key == "$and" {
                FilterNode::And(filters)
            } else {
                FilterNode::Or(filters)
            })
        }
        "$not" => Ok(FilterNode::Not(Box::new(CompiledFilter::compile(
            schema, entity, value, obscure,
        )?))),
        "$text" => {
            let search = value
                .get("$search")
                .and_then(Value::as_str)
                .ok_or_else(|| QueryError::invalid("$text requires a string $search"))?;
            Ok(FilterNode::Text {
                attributes: schema.fulltext_attributes(entity)?.to_vec(),
                search: search.to_string(),
            })
        }
        k if is_expression_key(k) => Ok(FilterNode::Expr(Expression::parse(value)?)),
        k if k.starts_with('$') => Err(QueryError::invalid(format!(
            "unsupported logical operator {}",
            k
        ))),
        attr => match judge_relation(schema, entity, attr)? {
            Relation::Column => Ok(FilterNode::Attribute {
                attr: attr.to_string(),
                ops: compile_attribute_ops(schema, attr, value)?,
            }),
            Relation::ToMany { .. } => Err(QueryError::invalid(format!(
                "one-to-many attribute {} cannot be filtered on",
                attr
            ))),
            relation => {
                let pointer = Pointer::from_relation(attr, relation)
                    .ok_or_else(|| QueryError::invalid(format!("{} is not a pointer", attr)))?;
                let filter = CompiledFilter::compile(schema, pointer.target(), value, obscure)?;
                Ok(FilterNode::Relation {
                    pointer,
                    filter: Box::new(filter),
                })
            }
        },
    }
}

/// `{"$gt": 1, "$lt": 5}`, or a bare value as shorthand for `$eq`.
fn compile_attribute_ops(schema: &Schema, attr: &str, value: &Value) -> QueryResult<Vec<AttrOp>> {
    let operators = match value {
        Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => map,
        other => return Ok(vec![AttrOp::Compare(CompareOp::Eq, other.clone())]),
    };

    let mut ops = Vec::with_capacity(operators.len());
    for (name, operand) in operators {
        let op = match name.as_str() {
            "$eq" => AttrOp::Compare(CompareOp::Eq, operand.clone()),
            "$ne" => AttrOp::Compare(CompareOp::Ne, operand.clone()),
            "$gt" => AttrOp::Compare(CompareOp::Gt, operand.clone()),
            "$gte" => AttrOp::Compare(CompareOp::Gte, operand.clone()),
            "$lt" => AttrOp::Compare(CompareOp::Lt, operand.clone()),
            "$lte" => AttrOp::Compare(CompareOp::Lte, operand.clone()),
            "$between" => match operand.as_array().map(Vec::as_slice) {
                Some([low, high]) => AttrOp::Between(low.clone(), high.clone()),
                _ => {
                    return Err(QueryError::invalid(format!(
                        "$between on {} expects [low, high]",
                        attr
                    )))
                }
            },
            "$startsWith" => AttrOp::StartsWith(string_operand(attr, name, operand)?),
            "$endsWith" => AttrOp::EndsWith(string_operand(attr, name, operand)?),
            "$includes" => AttrOp::Includes(operand.clone()),
            "$exists" => match operand {
                Value::Bool(b) => AttrOp::Exists(*b),
                _ => return Err(QueryError::invalid(format!("$exists on {} expects a bool", attr))),
            },
            "$in" => AttrOp::In(compile_candidates(schema, attr, name, operand)?),
            "$nin" => AttrOp::Nin(compile_candidates(schema, attr, name, operand)?),
            other => {
                return Err(QueryError::invalid(format!(
                    "unsupported operator {} on {}",
                    other, attr
                )))
            }
        };
        ops.push(op);
    }
    Ok(ops)
}

fn string_operand(attr: &str, name: &str, operand: &Value) -> QueryResult<String> {
    operand
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| QueryError::invalid(format!("{} on {} expects a string", name, attr)))
}

fn compile_candidates(
    schema: &Schema,
    attr: &str,
    name: &str,
    operand: &Value,
) -> QueryResult<Candidates> {
    match operand {
        Value::Array(items) => Ok(Candidates::Literal(items.iter().map(value_key).collect())),
        Value::Object(map) => compile_subquery(schema, map)
            .map(|sub| Candidates::Subquery(Box::new(sub)))
            .map_err(|e| match e {
                QueryError::InvalidQuery(reason) => {
                    QueryError::invalid(format!("{} on {}: {}", name, attr, reason))
                }
                other => other,
            }),
        _ => Err(QueryError::invalid(format!(
            "{} on {} expects an array or a subquery",
            name, attr
        ))),
    }
}

fn compile_subquery(schema: &Schema, map: &Map<String, Value>) -> QueryResult<Subquery> {
    let entity = map
        .get("entity")
        .and_then(Value::as_str)
        .ok_or_else(|| QueryError::invalid("subquery requires an entity"))?;
    let attribute = match map.get("data").and_then(Value::as_object) {
        Some(data) if data.len() == 1 => data.keys().next().cloned().unwrap_or_default(),
        _ => return Err(QueryError::invalid("subquery must project exactly one attribute")),
    };
    if judge_relation(schema, entity, &attribute)? != Relation::Column {
        return Err(QueryError::invalid(format!(
            "subquery attribute {}.{} is not a column",
            entity, attribute
        )));
    }

    // Subqueries build a candidate set, so they never relax on missing data.
    let filter = map
        .get("filter")
        .map(|f| CompiledFilter::compile(schema, entity, f, false))
        .transpose()?;
    let correlated = map.get("filter").map_or(false, is_correlated);

    Ok(Subquery {
        entity: entity.to_string(),
        attribute,
        filter,
        correlated,
        cache: OnceCell::new(),
    })
}

/// True when `filter` reads a label that it does not bind itself.
fn is_correlated(filter: &Value) -> bool {
    fn walk(value: &Value, bound: &mut HashSet<String>, referenced: &mut HashSet<String>) {
        match value {
            Value::Object(map) => {
                for (key, inner) in map {
                    match (key.as_str(), inner) {
                        (NODE_ID, Value::String(label)) => {
                            bound.insert(label.clone());
                        }
                        ("#refId", Value::String(label)) => {
                            referenced.insert(label.clone());
                        }
                        _ => walk(inner, bound, referenced),
                    }
                }
            }
            Value::Array(items) => items.iter().for_each(|item| walk(item, bound, referenced)),
            _ => {}
        }
    }

    let (mut bound, mut referenced) = (HashSet::new(), HashSet::new());
    walk(filter, &mut bound, &mut referenced);
    referenced.iter().any(|label| !bound.contains(label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::QueryMetrics;
    use crate::schema::{AttributeDef, EntityDef, IndexDef};
    use crate::storage::{RowKey, RowNode, RowStore};
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn schema() -> Schema {
        Schema::new()
            .with_entity(
                "user",
                EntityDef::new()
                    .with_attribute("name", AttributeDef::string())
                    .with_attribute("age", AttributeDef::int())
                    .with_attribute("bio", AttributeDef::string())
                    .with_index(IndexDef::fulltext("text", ["name", "bio"])),
            )
            .with_entity(
                "post",
                EntityDef::new()
                    .with_attribute("title", AttributeDef::string())
                    .with_attribute("author", AttributeDef::reference("user")),
            )
    }

    fn store() -> RowStore {
        let mut store = RowStore::new();
        for user in [
            json!({"id": "u1", "name": "ann", "age": 30, "bio": "likes rust"}),
            json!({"id": "u2", "name": "bob", "age": 17}),
        ] {
            let user = row(user);
            let id = user["id"].as_str().unwrap().to_string();
            store.insert(RowKey::new("user", id), RowNode::committed(user));
        }
        store
    }

    async fn passes(filter: Value, target: Value, obscure: bool) -> QueryResult<bool> {
        let (store, schema, metrics) = (store(), schema(), QueryMetrics::new());
        let view = ReadView::new(&store, &schema, None, &metrics, true);
        let compiled = CompiledFilter::compile(&schema, "user", &filter, obscure)?;
        let target = row(target);
        let mut dict = NodeDict::new();
        let outcome = compiled.evaluate(view, &target, &mut dict).await?;
        outcome.finish(&dict)
    }

    #[tokio::test]
    async fn test_attribute_operators() {
        let ann = json!({"id": "u1", "name": "ann", "age": 30});
        for (filter, expected) in [
            (json!({"age": 30}), true),
            (json!({"age": {"$gt": 18, "$lt": 40}}), true),
            (json!({"age": {"$between": [31, 40]}}), false),
            (json!({"name": {"$startsWith": "an"}}), true),
            (json!({"name": {"$endsWith": "x"}}), false),
            (json!({"name": {"$includes": "n"}}), true),
            (json!({"name": {"$in": ["bob", "ann"]}}), true),
            (json!({"name": {"$nin": ["ann"]}}), false),
            (json!({"age": {"$ne": 30}}), false),
        ] {
            assert_eq!(passes(filter.clone(), ann.clone(), false).await, Ok(expected), "{}", filter);
        }
    }

    #[tokio::test]
    async fn test_missing_attribute_is_false_unless_obscure() {
        let partial = json!({"id": "u1"});
        for filter in [
            json!({"age": {"$gt": 18}}),
            json!({"name": {"$eq": "ann"}}),
            json!({"name": {"$nin": ["bob"]}}),
        ] {
            assert_eq!(passes(filter.clone(), partial.clone(), false).await, Ok(false));
            assert_eq!(passes(filter, partial.clone(), true).await, Ok(true));
        }
        assert_eq!(
            passes(json!({"age": {"$exists": false}}), partial, false).await,
            Ok(true)
        );
    }

    #[tokio::test]
    async fn test_in_is_always_true_under_obscure() {
        let bob = json!({"id": "u2", "name": "bob"});
        assert_eq!(passes(json!({"name": {"$in": ["ann"]}}), bob.clone(), false).await, Ok(false));
        assert_eq!(passes(json!({"name": {"$in": ["ann"]}}), bob, true).await, Ok(true));
    }

    #[tokio::test]
    async fn test_logical_combinators() {
        let ann = json!({"id": "u1", "name": "ann", "age": 30});
        assert_eq!(
            passes(json!({"$or": [{"name": "bob"}, {"age": 30}]}), ann.clone(), false).await,
            Ok(true)
        );
        assert_eq!(
            passes(json!({"$and": [{"name": "ann"}, {"age": 31}]}), ann.clone(), false).await,
            Ok(false)
        );
        assert_eq!(passes(json!({"$not": {"name": "ann"}}), ann, false).await, Ok(false));
    }

    #[tokio::test]
    async fn test_text_search() {
        let ann = json!({"id": "u1", "name": "ann", "bio": "likes rust"});
        assert_eq!(passes(json!({"$text": {"$search": "rust"}}), ann.clone(), false).await, Ok(true));
        assert_eq!(passes(json!({"$text": {"$search": "go"}}), ann, false).await, Ok(false));
    }

    #[tokio::test]
    async fn test_deferred_expression_resolves_after_sibling_binds() {
        let filter = json!({
            "$expr": {"$eq": [{"#attr": "age"}, {"#refId": "n", "#refAttr": "age"}]},
            "$and": [{"#id": "n"}]
        });
        assert_eq!(passes(filter, json!({"id": "u1", "age": 30}), false).await, Ok(true));
    }

    #[tokio::test]
    async fn test_unbound_label_is_unresolved() {
        let filter = json!({"$expr": {"$eq": [1, {"#refId": "ghost", "#refAttr": "age"}]}});
        assert_eq!(
            passes(filter, json!({"id": "u1"}), false).await,
            Err(QueryError::ExpressionUnresolved { node: "ghost".into() })
        );
    }

    #[tokio::test]
    async fn test_duplicate_label_rejected() {
        let filter = json!({"#id": "n", "$and": [{"#id": "n"}]});
        assert_eq!(
            passes(filter, json!({"id": "u1"}), false).await,
            Err(QueryError::DuplicateNodeId("n".into()))
        );
    }

    #[tokio::test]
    async fn test_obscured_label_settles_as_unknown() {
        let (store, schema, metrics) = (store(), schema(), QueryMetrics::new());
        let view = ReadView::new(&store, &schema, None, &metrics, true);
        let orphan = row(json!({"id": "p3", "title": "ann", "authorId": "u9"}));
        let matches_author = json!({"$eq": [{"#attr": "title"}, {"#refId": "a", "#refAttr": "name"}]});

        for filter in [
            json!({"$expr": matches_author.clone(), "author": {"#id": "a"}}),
            json!({"$not": {"$expr": matches_author.clone()}, "author": {"#id": "a"}}),
        ] {
            let compiled = CompiledFilter::compile(&schema, "post", &filter, true).unwrap();
            let mut dict = NodeDict::new();
            let outcome = compiled.evaluate(view, &orphan, &mut dict).await.unwrap();
            assert!(dict.is_obscured("a"));
            assert_eq!(outcome.finish(&dict), Ok(true));
        }

        let mixed = json!({
            "$expr": {"$eq": [{"#refId": "ghost", "#refAttr": "name"}, {"#refId": "a", "#refAttr": "name"}]},
            "author": {"#id": "a"}
        });
        let compiled = CompiledFilter::compile(&schema, "post", &mixed, true).unwrap();
        let mut dict = NodeDict::new();
        let outcome = compiled.evaluate(view, &orphan, &mut dict).await.unwrap();
        assert_eq!(
            outcome.finish(&dict),
            Err(QueryError::ExpressionUnresolved { node: "ghost".into() })
        );
    }

    #[tokio::test]
    async fn test_foreign_key_filter() {
        let (store, schema, metrics) = (store(), schema(), QueryMetrics::new());
        let view = ReadView::new(&store, &schema, None, &metrics, true);
        let compiled =
            CompiledFilter::compile(&schema, "post", &json!({"author": {"age": {"$gte": 18}}}), false)
                .unwrap();

        for (post, expected) in [
            (json!({"id": "p1", "authorId": "u1"}), true),
            (json!({"id": "p2", "authorId": "u2"}), false),
            (json!({"id": "p3", "authorId": "u9"}), false),
        ] {
            let post = row(post);
            let mut dict = NodeDict::new();
            let outcome = compiled.evaluate(view, &post, &mut dict).await.unwrap();
            assert_eq!(outcome.finish(&dict), Ok(expected));
        }
    }

    #[tokio::test]
    async fn test_uncorrelated_subquery_runs_once() {
        let (store, schema, metrics) = (store(), schema(), QueryMetrics::new());
        let view = ReadView::new(&store, &schema, None, &metrics, true);
        let filter = json!({"authorId": {"$in": {
            "entity": "user", "data": {"id": 1}, "filter": {"age": {"$gte": 18}}
        }}});
        let compiled = CompiledFilter::compile(&schema, "post", &filter, false).unwrap();

        let mut results = Vec::new();
        for author in ["u1", "u2", "u1"] {
            let post = row(json!({"id": "p", "authorId": author}));
            let mut dict = NodeDict::new();
            let outcome = compiled.evaluate(view, &post, &mut dict).await.unwrap();
            results.push(outcome.finish(&dict).unwrap());
        }

        assert_eq!(results, vec![true, false, true]);
        assert_eq!(metrics.subqueries_evaluated(), 1);
    }

    #[test]
    fn test_correlation_detection() {
        assert!(!is_correlated(&json!({"age": 1})));
        assert!(is_correlated(
            &json!({"$expr": {"$eq": [{"#attr": "id"}, {"#refId": "outer", "#refAttr": "id"}]}})
        ));
        assert!(!is_correlated(&json!({
            "#id": "inner",
            "$expr": {"$eq": [{"#attr": "id"}, {"#refId": "inner", "#refAttr": "id"}]}
        })));
    }

    #[test]
    fn test_compile_errors() {
        let schema = schema();
        for filter in [
            json!({"$nor": []}),
            json!({"age": {"$between": [1]}}),
            json!({"age": {"$in": 3}}),
            json!({"$text": {}}),
            json!({"age": {"$regex": "x"}}),
        ] {
            let err = CompiledFilter::compile(&schema, "user", &filter, false).unwrap_err();
            assert_eq!(err.code(), "QUERY_INVALID", "{}", filter);
        }
        let err = CompiledFilter::compile(&schema, "user", &json!({"post$author": {}}), false)
            .unwrap_err();
        assert_eq!(err.code(), "QUERY_INVALID");
        let err = CompiledFilter::compile(&schema, "post", &json!({"$text": {"$search": "x"}}), false)
            .unwrap_err();
        assert_eq!(err.code(), "SCHEMA_NO_FULLTEXT_INDEX");
    }
}
