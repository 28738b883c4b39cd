//! Selector compilation.
//!
//! [`compile`] validates a [`Selector`] completely (operators, field names and
//! literal types) and produces a [`CompiledSelector`] whose evaluation cannot fail.
//!
//! Evaluation is three-valued. A range comparison (`$lte`, `$gte`, `$lt`, `$gt`)
//! against a field that is absent or null is *inapplicable* rather than false, and
//! negating an inapplicable result leaves it inapplicable. A document matches only
//! when the whole tree evaluates to a definite `true`, so `$not` never turns a
//! missing field into an automatic pass. Combinators follow Kleene logic.
//!
//! `$ne` only matches documents whose kind carries the field, so
//! `{"status": {"$ne": "published"}}` never matches a group.

use serde_json::{Map, Value as Json};
use std::fmt;
use std::sync::Arc;

use folio_api::{Document, Value};

use crate::error::{CompileError, Result};
use crate::field::{Field, FieldType, FieldValue};
use crate::predicate::Predicate;
use crate::selector::Selector;

/// Compile a selector into a predicate over documents.
///
/// Compilation never mutates or retains a reference to `selector`; the compiled
/// value keeps its own copy for forwarding to the remote service.
pub fn compile(selector: &Selector) -> Result<CompiledSelector> {
    let node = compile_node(selector.as_json(), "$")?;
    Ok(CompiledSelector {
        node: Arc::new(node),
        source: selector.clone(),
    })
}

/// A validated selector, ready to evaluate.
#[derive(Clone)]
pub struct CompiledSelector {
    node: Arc<Node>,
    source: Selector,
}

impl CompiledSelector {
    pub fn matches(&self, doc: &Document) -> bool {
        self.node.eval(doc) == Some(true)
    }

    /// The selector this predicate was compiled from.
    pub fn selector(&self) -> &Selector {
        &self.source
    }
}

impl Predicate<Document> for CompiledSelector {
    fn test(&self, item: &Document) -> bool {
        self.matches(item)
    }
}

impl fmt::Debug for CompiledSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompiledSelector").field(&self.source.to_string()).finish()
    }
}

#[derive(Debug)]
enum Node {
    All(Vec<Node>),
    Any(Vec<Node>),
    Negate(Box<Node>),
    Leaf { field: Field, condition: Condition },
}

#[derive(Debug)]
enum Condition {
    Eq(Value),
    Ne(Value),
    Exists(bool),
    Range(RangeOp, i64),
    In(Vec<Value>),
    ElemMatch(Box<Condition>),
    Not(Box<Condition>),
    All(Vec<Condition>),
}

#[derive(Debug, Clone, Copy)]
enum RangeOp {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl RangeOp {
    fn parse(operator: &str) -> Option<RangeOp> {
        match operator {
            "$lt" => Some(RangeOp::Lt),
            "$lte" => Some(RangeOp::Lte),
            "$gt" => Some(RangeOp::Gt),
            "$gte" => Some(RangeOp::Gte),
            _ => None,
        }
    }

    fn holds(self, value: i64, bound: i64) -> bool {
        match self {
            RangeOp::Lt => value < bound,
            RangeOp::Lte => value <= bound,
            RangeOp::Gt => value > bound,
            RangeOp::Gte => value >= bound,
        }
    }
}

impl Node {
    fn eval(&self, doc: &Document) -> Option<bool> {
        match self {
            Node::All(children) => all(children.iter().map(|child| child.eval(doc))),
            Node::Any(children) => any(children.iter().map(|child| child.eval(doc))),
            Node::Negate(inner) => inner.eval(doc).map(|b| !b),
            Node::Leaf { field, condition } => condition.eval(field.read(doc)),
        }
    }
}

impl Condition {
    fn eval(&self, value: FieldValue<'_>) -> Option<bool> {
        match self {
            Condition::Eq(literal) => Some(equals(value, literal)),
            Condition::Ne(_) if matches!(value, FieldValue::Absent) => Some(false),
            Condition::Ne(literal) => Some(!equals(value, literal)),
            Condition::Exists(expected) => Some(value.is_present() == *expected),
            Condition::Range(op, bound) => match value {
                FieldValue::Number(n) => Some(op.holds(n, *bound)),
                _ => None,
            },
            Condition::In(literals) => Some(literals.iter().any(|l| equals(value, l))),
            Condition::ElemMatch(inner) => match value {
                FieldValue::Set(members) => Some(
                    members
                        .iter()
                        .any(|m| inner.eval(FieldValue::Text(m)) == Some(true)),
                ),
                _ => Some(false),
            },
            Condition::Not(inner) => inner.eval(value).map(|b| !b),
            Condition::All(conditions) => all(conditions.iter().map(|c| c.eval(value))),
        }
    }
}

fn equals(value: FieldValue<'_>, literal: &Value) -> bool {
    match (value, literal) {
        (FieldValue::Absent | FieldValue::Null, Value::Null) => true,
        (FieldValue::Text(a), Value::String(b)) => a == b,
        (FieldValue::Number(a), Value::Integer(b)) => a == *b,
        (FieldValue::Flag(a), Value::Boolean(b)) => a == *b,
        _ => false,
    }
}

fn all(results: impl Iterator<Item = Option<bool>>) -> Option<bool> {
    let mut outcome = Some(true);
    for result in results {
        match result {
            Some(false) => return Some(false),
            None => outcome = None,
            Some(true) => {}
        }
    }
    outcome
}

fn any(results: impl Iterator<Item = Option<bool>>) -> Option<bool> {
    let mut outcome = Some(false);
    for result in results {
        match result {
            Some(true) => return Some(true),
            None => outcome = None,
            Some(false) => {}
        }
    }
    outcome
}

fn compile_node(json: &Json, path: &str) -> Result<Node> {
    let map = json.as_object().ok_or_else(|| CompileError::Malformed {
        path: path.to_string(),
        reason: format!("expected an object, found {}", json_type(json)),
    })?;

    let mut nodes = Vec::with_capacity(map.len());
    for (key, value) in map {
        let child_path = format!("{path}.{key}");
        let node = match key.as_str() {
            "$and" => Node::All(compile_children(value, &child_path)?),
            "$or" => Node::Any(compile_children(value, &child_path)?),
            "$not" => Node::Negate(Box::new(compile_node(value, &child_path)?)),
            op if op.starts_with('$') => {
                return Err(CompileError::UnknownOperator {
                    operator: op.to_string(),
                    path: path.to_string(),
                })
            }
            name => {
                let field = Field::parse(name).ok_or_else(|| CompileError::UnknownField {
                    field: name.to_string(),
                    path: path.to_string(),
                })?;
                let condition = compile_field(field, value, &child_path)?;
                Node::Leaf { field, condition }
            }
        };
        nodes.push(node);
    }

    Ok(match nodes.len() {
        1 => nodes.remove(0),
        _ => Node::All(nodes),
    })
}

fn compile_children(json: &Json, path: &str) -> Result<Vec<Node>> {
    let items = json.as_array().ok_or_else(|| CompileError::Malformed {
        path: path.to_string(),
        reason: format!("expected an array of selectors, found {}", json_type(json)),
    })?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| compile_node(item, &format!("{path}[{i}]")))
        .collect()
}

fn compile_field(field: Field, json: &Json, path: &str) -> Result<Condition> {
    match json {
        Json::Object(map) if is_operator_object(map) => {
            compile_operators(field, field.field_type(), map, path)
        }
        Json::Object(_) => Err(CompileError::Malformed {
            path: path.to_string(),
            reason: "nested field paths are not supported; use an operator object".to_string(),
        }),
        literal => Ok(Condition::Eq(check_literal(
            field,
            field.field_type(),
            "$eq",
            literal,
        )?)),
    }
}

fn is_operator_object(map: &Map<String, Json>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

/// Compile `{ "$op": operand, ... }` applied to values of type `ty`.
///
/// `ty` is the field's own type, or `Text` inside `$elemMatch` over a set.
fn compile_operators(
    field: Field,
    ty: FieldType,
    map: &Map<String, Json>,
    path: &str,
) -> Result<Condition> {
    let mut conditions = Vec::with_capacity(map.len());
    for (operator, operand) in map {
        let op_path = format!("{path}.{operator}");
        let condition = match operator.as_str() {
            "$eq" => Condition::Eq(check_literal(field, ty, operator, operand)?),
            "$ne" => Condition::Ne(check_literal(field, ty, operator, operand)?),
            "$exists" => {
                let expected = operand.as_bool().ok_or_else(|| {
                    mismatch(field, operator, "a boolean", operand)
                })?;
                Condition::Exists(expected)
            }
            "$in" => {
                let items = operand
                    .as_array()
                    .ok_or_else(|| mismatch(field, operator, "an array", operand))?;
                let literals = items
                    .iter()
                    .map(|item| check_literal(field, ty, operator, item))
                    .collect::<Result<Vec<_>>>()?;
                Condition::In(literals)
            }
            "$elemMatch" => {
                if ty != FieldType::TextSet {
                    return Err(unsupported(field, operator));
                }
                let nested = operand
                    .as_object()
                    .filter(|m| is_operator_object(m))
                    .ok_or_else(|| CompileError::Malformed {
                        path: op_path.clone(),
                        reason: "`$elemMatch` expects an operator object".to_string(),
                    })?;
                Condition::ElemMatch(Box::new(compile_operators(
                    field,
                    FieldType::Text,
                    nested,
                    &op_path,
                )?))
            }
            "$not" => {
                let nested = operand
                    .as_object()
                    .filter(|m| is_operator_object(m))
                    .ok_or_else(|| CompileError::Malformed {
                        path: op_path.clone(),
                        reason: "`$not` on a field expects an operator object".to_string(),
                    })?;
                Condition::Not(Box::new(compile_operators(field, ty, nested, &op_path)?))
            }
            op => match RangeOp::parse(op) {
                Some(range) => {
                    if ty != FieldType::Timestamp {
                        return Err(unsupported(field, operator));
                    }
                    let bound = operand.as_i64().ok_or_else(|| {
                        mismatch(field, operator, FieldType::Timestamp.describe(), operand)
                    })?;
                    Condition::Range(range, bound)
                }
                None => {
                    return Err(CompileError::UnknownOperator {
                        operator: op.to_string(),
                        path: path.to_string(),
                    })
                }
            },
        };
        conditions.push(condition);
    }

    Ok(match conditions.len() {
        1 => conditions.remove(0),
        _ => Condition::All(conditions),
    })
}

fn check_literal(field: Field, ty: FieldType, operator: &str, json: &Json) -> Result<Value> {
    let ok = match (ty, json) {
        (_, Json::Null) => true,
        (FieldType::TextSet, _) => return Err(unsupported(field, operator)),
        (FieldType::Text, Json::String(_)) => true,
        (FieldType::Timestamp, Json::Number(n)) => n.is_i64(),
        (FieldType::Flag, Json::Bool(_)) => true,
        _ => false,
    };
    if !ok {
        return Err(mismatch(field, operator, ty.describe(), json));
    }
    Value::from_json_value(json).ok_or_else(|| mismatch(field, operator, ty.describe(), json))
}

fn mismatch(field: Field, operator: &str, expected: &'static str, found: &Json) -> CompileError {
    CompileError::TypeMismatch {
        field: field.name().to_string(),
        operator: operator.to_string(),
        expected,
        found: json_type(found).to_string(),
    }
}

fn unsupported(field: Field, operator: &str) -> CompileError {
    CompileError::UnsupportedOperator {
        operator: operator.to_string(),
        field: field.name().to_string(),
    }
}

fn json_type(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
