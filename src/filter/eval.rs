//! Projection evaluator over untyped JSON values

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

use super::FilterError;
use super::parser::{Ast, Comparator};

pub(crate) fn evaluate(ast: &Ast, value: &Value) -> Result<Value, FilterError> {
    match ast {
        Ast::Identity => Ok(value.clone()),
        Ast::Literal(literal) => Ok(literal.clone()),
        Ast::Field(name) => Ok(match value {
            Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }),
        Ast::Subexpr(lhs, rhs) => {
            let left = evaluate(lhs, value)?;
            evaluate(rhs, &left)
        }
        Ast::Index(index) => match value {
            Value::Array(items) => Ok(resolve_index(items.len(), *index)
                .map(|i| items[i].clone())
                .unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(shape_error("index", other)),
        },
        Ast::Slice { start, stop, step } => match value {
            Value::Array(items) => Ok(Value::Array(slice(items, *start, *stop, *step))),
            Value::Null => Ok(Value::Null),
            other => Err(shape_error("slice", other)),
        },
        Ast::Projection { lhs, rhs } => match evaluate(lhs, value)? {
            Value::Array(items) => project(items.iter(), rhs),
            _ => Ok(Value::Null),
        },
        Ast::ObjectProjection { lhs, rhs } => match evaluate(lhs, value)? {
            Value::Object(map) => project(map.values(), rhs),
            _ => Ok(Value::Null),
        },
        Ast::FilterProjection {
            lhs,
            predicate,
            rhs,
        } => match evaluate(lhs, value)? {
            Value::Array(items) => {
                let mut kept = Vec::new();
                for item in &items {
                    if is_truthy(&evaluate(predicate, item)?) {
                        kept.push(item);
                    }
                }
                project(kept.into_iter(), rhs)
            }
            _ => Ok(Value::Null),
        },
        Ast::Flatten(inner) => match evaluate(inner, value)? {
            Value::Array(items) => {
                let mut flat = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Array(nested) => flat.extend(nested),
                        other => flat.push(other),
                    }
                }
                Ok(Value::Array(flat))
            }
            _ => Ok(Value::Null),
        },
        Ast::MultiHash(pairs) => {
            if value.is_null() {
                return Ok(Value::Null);
            }
            let mut map = Map::with_capacity(pairs.len());
            for (key, expr) in pairs {
                map.insert(key.clone(), evaluate(expr, value)?);
            }
            Ok(Value::Object(map))
        }
        Ast::MultiList(items) => {
            if value.is_null() {
                return Ok(Value::Null);
            }
            let values = items
                .iter()
                .map(|expr| evaluate(expr, value))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(values))
        }
        Ast::Pipe(lhs, rhs) => {
            let left = evaluate(lhs, value)?;
            evaluate(rhs, &left)
        }
        Ast::Or(lhs, rhs) => {
            let left = evaluate(lhs, value)?;
            if is_truthy(&left) {
                Ok(left)
            } else {
                evaluate(rhs, value)
            }
        }
        Ast::And(lhs, rhs) => {
            let left = evaluate(lhs, value)?;
            if is_truthy(&left) {
                evaluate(rhs, value)
            } else {
                Ok(left)
            }
        }
        Ast::Not(inner) => Ok(Value::Bool(!is_truthy(&evaluate(inner, value)?))),
        Ast::Compare(comparator, lhs, rhs) => {
            let left = evaluate(lhs, value)?;
            let right = evaluate(rhs, value)?;
            Ok(compare(comparator, &left, &right))
        }
    }
}

fn project<'a>(items: impl Iterator<Item = &'a Value>, rhs: &Ast) -> Result<Value, FilterError> {
    let mut projected = Vec::new();
    for item in items {
        let result = evaluate(rhs, item)?;
        if !result.is_null() {
            projected.push(result);
        }
    }
    Ok(Value::Array(projected))
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(_) => true,
    }
}

fn compare(comparator: &Comparator, left: &Value, right: &Value) -> Value {
    match comparator {
        Comparator::Eq => Value::Bool(values_equal(left, right)),
        Comparator::Ne => Value::Bool(!values_equal(left, right)),
        ordering => {
            let (Value::Number(l), Value::Number(r)) = (left, right) else {
                return Value::Null;
            };
            let Some(order) = number_order(l, r) else {
                return Value::Null;
            };
            Value::Bool(match ordering {
                Comparator::Lt => order == Ordering::Less,
                Comparator::Le => order != Ordering::Greater,
                Comparator::Gt => order == Ordering::Greater,
                _ => order != Ordering::Less,
            })
        }
    }
}

/// Numbers compare by value so `1` equals `1.0`; everything else structurally.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => number_order(l, r) == Some(Ordering::Equal),
        _ => left == right,
    }
}

/// Integers compare exactly; only non-integral values go through `f64`.
fn number_order(left: &Number, right: &Number) -> Option<Ordering> {
    if let (Some(l), Some(r)) = (as_integer(left), as_integer(right)) {
        return Some(l.cmp(&r));
    }
    left.as_f64()?.partial_cmp(&right.as_f64()?)
}

fn as_integer(number: &Number) -> Option<i128> {
    number
        .as_i64()
        .map(i128::from)
        .or_else(|| number.as_u64().map(i128::from))
}

fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

fn slice(items: &[Value], start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Vec<Value> {
    let len = items.len() as i64;
    let step = step.unwrap_or(1);
    let clamp = |bound: i64, low: i64, high: i64| {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(low, high)
    };

    let mut out = Vec::new();
    if step > 0 {
        let mut i = start.map_or(0, |s| clamp(s, 0, len));
        let end = stop.map_or(len, |s| clamp(s, 0, len));
        while i < end {
            out.push(items[i as usize].clone());
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        let mut i = start.map_or(len - 1, |s| clamp(s, -1, len - 1));
        let end = stop.map_or(-1, |s| clamp(s, -1, len - 1));
        while i > end {
            out.push(items[i as usize].clone());
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    out
}

fn shape_error(operation: &str, value: &Value) -> FilterError {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    FilterError::ProjectionError(format!("cannot {} into a {}", operation, kind))
}
