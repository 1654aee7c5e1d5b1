//! Scalar expressions
//!
//! JSON forms:
//! - `{"#attr": "a"}` attribute of the row being evaluated
//! - `{"#refId": "n", "#refAttr": "a"}` attribute of the row bound as `n`
//! - `{"$op": [args]}` / `{"$op": arg}` operator application
//! - anything else is a constant
//!
//! Evaluation is two-phase. Phase 1 runs against the current row and the
//! node dictionary as it stands; a reference to a label that is not bound
//! yet leaves a [`Evaluation::Pending`] expression with every resolvable part
//! folded into constants. Phase 2 ([`Expression::resolve`]) retries that
//! expression once against the final dictionary.

use serde_json::{Map, Value};

use super::errors::{QueryError, QueryResult};
use super::node_dict::NodeDict;
use super::value::{compare_scalars, is_truthy, number, values_equal};
use crate::storage::Row;

const ATTR: &str = "#attr";
const REF_ID: &str = "#refId";
const REF_ATTR: &str = "#refAttr";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Abs,
    Round,
    Floor,
    Ceil,
    Length,
}

impl UnaryOp {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "$not" => UnaryOp::Not,
            "$abs" => UnaryOp::Abs,
            "$round" => UnaryOp::Round,
            "$floor" => UnaryOp::Floor,
            "$ceil" => UnaryOp::Ceil,
            "$length" => UnaryOp::Length,
            _ => return None,
        })
    }

    fn apply(self, arg: &Value) -> Value {
        let numeric = |f: fn(f64) -> f64| arg.as_f64().map_or(Value::Null, |x| number(f(x)));
        match self {
            UnaryOp::Not => Value::Bool(!is_truthy(arg)),
            UnaryOp::Abs => numeric(f64::abs),
            UnaryOp::Round => numeric(f64::round),
            UnaryOp::Floor => numeric(f64::floor),
            UnaryOp::Ceil => numeric(f64::ceil),
            UnaryOp::Length => match arg {
                Value::String(s) => Value::from(s.chars().count()),
                Value::Array(items) => Value::from(items.len()),
                _ => Value::Null,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Pow,
    Concat,
    StartsWith,
    EndsWith,
    Includes,
}

impl MultiOp {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "$eq" => MultiOp::Eq,
            "$ne" => MultiOp::Ne,
            "$gt" => MultiOp::Gt,
            "$gte" => MultiOp::Gte,
            "$lt" => MultiOp::Lt,
            "$lte" => MultiOp::Lte,
            "$and" => MultiOp::And,
            "$or" => MultiOp::Or,
            "$add" => MultiOp::Add,
            "$subtract" => MultiOp::Subtract,
            "$multiply" => MultiOp::Multiply,
            "$divide" => MultiOp::Divide,
            "$mod" => MultiOp::Mod,
            "$pow" => MultiOp::Pow,
            "$concat" => MultiOp::Concat,
            "$startsWith" => MultiOp::StartsWith,
            "$endsWith" => MultiOp::EndsWith,
            "$includes" => MultiOp::Includes,
            _ => return None,
        })
    }

    /// Binary operators take exactly two arguments, the rest at least one.
    fn is_binary(self) -> bool {
        !matches!(
            self,
            MultiOp::And | MultiOp::Or | MultiOp::Add | MultiOp::Multiply | MultiOp::Concat
        )
    }

    fn apply(self, args: &[Value]) -> Value {
        match self {
            MultiOp::Eq => Value::Bool(values_equal(&args[0], &args[1])),
            MultiOp::Ne => Value::Bool(!values_equal(&args[0], &args[1])),
            MultiOp::Gt => Value::Bool(compare_scalars(&args[0], &args[1]).map_or(false, |o| o.is_gt())),
            MultiOp::Gte => Value::Bool(compare_scalars(&args[0], &args[1]).map_or(false, |o| o.is_ge())),
            MultiOp::Lt => Value::Bool(compare_scalars(&args[0], &args[1]).map_or(false, |o| o.is_lt())),
            MultiOp::Lte => Value::Bool(compare_scalars(&args[0], &args[1]).map_or(false, |o| o.is_le())),
            MultiOp::And => Value::Bool(args.iter().all(is_truthy)),
            MultiOp::Or => Value::Bool(args.iter().any(is_truthy)),
            MultiOp::Add => fold_numbers(args, 0.0, |acc, x| acc + x),
            MultiOp::Multiply => fold_numbers(args, 1.0, |acc, x| acc * x),
            MultiOp::Subtract => binary_numbers(args, |a, b| Some(a - b)),
            MultiOp::Divide => binary_numbers(args, |a, b| (b != 0.0).then(|| a / b)),
            MultiOp::Mod => binary_numbers(args, |a, b| (b != 0.0).then(|| a % b)),
            MultiOp::Pow => binary_numbers(args, |a, b| Some(a.powf(b))),
            MultiOp::Concat => {
                let mut out = String::new();
                for arg in args {
                    match arg {
                        Value::String(s) => out.push_str(s),
                        Value::Number(n) => out.push_str(&n.to_string()),
                        Value::Bool(b) => out.push_str(&b.to_string()),
                        _ => return Value::Null,
                    }
                }
                Value::String(out)
            }
            MultiOp::StartsWith => match (&args[0], &args[1]) {
                (Value::String(s), Value::String(p)) => Value::Bool(s.starts_with(p.as_str())),
                _ => Value::Bool(false),
            },
            MultiOp::EndsWith => match (&args[0], &args[1]) {
                (Value::String(s), Value::String(p)) => Value::Bool(s.ends_with(p.as_str())),
                _ => Value::Bool(false),
            },
            MultiOp::Includes => match (&args[0], &args[1]) {
                (Value::String(s), Value::String(p)) => Value::Bool(s.contains(p.as_str())),
                (Value::Array(items), needle) => {
                    Value::Bool(items.iter().any(|item| values_equal(item, needle)))
                }
                _ => Value::Bool(false),
            },
        }
    }
}

fn fold_numbers(args: &[Value], init: f64, f: impl Fn(f64, f64) -> f64) -> Value {
    let mut acc = init;
    for arg in args {
        match arg.as_f64() {
            Some(x) => acc = f(acc, x),
            None => return Value::Null,
        }
    }
    number(acc)
}

fn binary_numbers(args: &[Value], f: impl Fn(f64, f64) -> Option<f64>) -> Value {
    match (args[0].as_f64(), args[1].as_f64()) {
        (Some(a), Some(b)) => f(a, b).map_or(Value::Null, number),
        _ => Value::Null,
    }
}

/// Expression AST
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Const(Value),
    Attr(String),
    Ref { node: String, attr: String },
    Unary { op: UnaryOp, arg: Box<Expression> },
    Multi { op: MultiOp, args: Vec<Expression> },
}

/// Outcome of phase-1 evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Resolved(Value),
    /// Still waiting on an unbound label; contains no `Attr` nodes.
    Pending(Expression),
}

impl Expression {
    pub fn parse(value: &Value) -> QueryResult<Self> {
        let Value::Object(map) = value else {
            return Ok(Expression::Const(value.clone()));
        };

        if let Some(attr) = map.get(ATTR) {
            return match (map.len(), attr.as_str()) {
                (1, Some(attr)) => Ok(Expression::Attr(attr.to_string())),
                _ => Err(QueryError::invalid(format!("malformed {} reference", ATTR))),
            };
        }

        if map.contains_key(REF_ID) {
            return Self::parse_ref(map);
        }

        if map.len() == 1 {
            if let Some((name, payload)) = map.iter().next() {
                if let Some(op) = MultiOp::from_name(name) {
                    return Self::parse_multi(op, name, payload);
                }
                if let Some(op) = UnaryOp::from_name(name) {
                    let arg = match payload {
                        Value::Array(items) if items.len() == 1 => &items[0],
                        other => other,
                    };
                    return Ok(Expression::Unary {
                        op,
                        arg: Box::new(Self::parse(arg)?),
                    });
                }
                if name.starts_with('$') {
                    return Err(QueryError::invalid(format!(
                        "unsupported expression operator {}",
                        name
                    )));
                }
            }
        }

        Ok(Expression::Const(value.clone()))
    }

    fn parse_ref(map: &Map<String, Value>) -> QueryResult<Self> {
        match (map.len(), map.get(REF_ID), map.get(REF_ATTR)) {
            (2, Some(Value::String(node)), Some(Value::String(attr))) => Ok(Expression::Ref {
                node: node.clone(),
                attr: attr.clone(),
            }),
            _ => Err(QueryError::invalid(format!(
                "{} requires a string {}",
                REF_ID, REF_ATTR
            ))),
        }
    }

    fn parse_multi(op: MultiOp, name: &str, payload: &Value) -> QueryResult<Self> {
        let Value::Array(items) = payload else {
            return Err(QueryError::invalid(format!("{} expects an argument list", name)));
        };
        let arity_ok = if op.is_binary() {
            items.len() == 2
        } else {
            !items.is_empty()
        };
        if !arity_ok {
            return Err(QueryError::invalid(format!(
                "{} given {} arguments",
                name,
                items.len()
            )));
        }
        let args = items.iter().map(Self::parse).collect::<QueryResult<Vec<_>>>()?;
        Ok(Expression::Multi { op, args })
    }

    /// Phase 1: evaluate against `row` (if any) and the bindings so far.
    pub fn evaluate(&self, row: Option<&Row>, dict: &NodeDict) -> Evaluation {
        match self {
            Expression::Const(value) => Evaluation::Resolved(value.clone()),
            Expression::Attr(attr) => Evaluation::Resolved(
                row.and_then(|r| r.get(attr)).cloned().unwrap_or(Value::Null),
            ),
            Expression::Ref { node, attr } => match dict.get(node) {
                Some(bound) => {
                    Evaluation::Resolved(bound.get(attr).cloned().unwrap_or(Value::Null))
                }
                None => Evaluation::Pending(self.clone()),
            },
            Expression::Unary { op, arg } => match arg.evaluate(row, dict) {
                Evaluation::Resolved(value) => Evaluation::Resolved(op.apply(&value)),
                Evaluation::Pending(arg) => Evaluation::Pending(Expression::Unary {
                    op: *op,
                    arg: Box::new(arg),
                }),
            },
            Expression::Multi { op, args } => {
                let evaluated: Vec<Evaluation> =
                    args.iter().map(|arg| arg.evaluate(row, dict)).collect();
                if evaluated.iter().all(|e| matches!(e, Evaluation::Resolved(_))) {
                    let values: Vec<Value> = evaluated
                        .into_iter()
                        .filter_map(|e| match e {
                            Evaluation::Resolved(v) => Some(v),
                            Evaluation::Pending(_) => None,
                        })
                        .collect();
                    return Evaluation::Resolved(op.apply(&values));
                }
                let args = evaluated
                    .into_iter()
                    .map(|e| match e {
                        Evaluation::Resolved(v) => Expression::Const(v),
                        Evaluation::Pending(expr) => expr,
                    })
                    .collect();
                Evaluation::Pending(Expression::Multi { op: *op, args })
            }
        }
    }

    /// Phase 2: the final attempt for a pending expression.
    pub fn resolve(&self, dict: &NodeDict) -> QueryResult<Value> {
        match self.evaluate(None, dict) {
            Evaluation::Resolved(value) => Ok(value),
            Evaluation::Pending(pending) => Err(QueryError::ExpressionUnresolved {
                node: pending.first_unbound(dict).unwrap_or_default(),
            }),
        }
    }

    /// Labels this expression reads that `dict` has not bound.
    pub fn unbound_labels(&self, dict: &NodeDict) -> Vec<String> {
        let mut labels = Vec::new();
        self.collect_unbound(dict, &mut labels);
        labels
    }

    fn collect_unbound(&self, dict: &NodeDict, labels: &mut Vec<String>) {
        match self {
            Expression::Ref { node, .. } if !dict.contains(node) => labels.push(node.clone()),
            Expression::Unary { arg, .. } => arg.collect_unbound(dict, labels),
            Expression::Multi { args, .. } => {
                for arg in args {
                    arg.collect_unbound(dict, labels);
                }
            }
            _ => {}
        }
    }

    fn first_unbound(&self, dict: &NodeDict) -> Option<String> {
        match self {
            Expression::Ref { node, .. } if !dict.contains(node) => Some(node.clone()),
            Expression::Unary { arg, .. } => arg.first_unbound(dict),
            Expression::Multi { args, .. } => args.iter().find_map(|a| a.first_unbound(dict)),
            _ => None,
        }
    }
}

/// `$expr`, `$expr1`, `$expr2`, ... name an expression-valued key.
pub fn is_expression_key(key: &str) -> bool {
    key.strip_prefix("$expr")
        .map_or(false, |suffix| suffix.chars().all(|c| c.is_ascii_digit()))
}
