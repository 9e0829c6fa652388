//! Expression evaluation against a single part

use super::ast::{BinaryOp, Expr, Function, Method, UnaryOp};
use super::error::EvaluationError;
use crate::message::{Batch, Part};
use serde_json::{Map, Number, Value};
use std::cell::OnceCell;
use std::cmp::Ordering;

type EvalResult<T> = Result<T, EvaluationError>;

/// Outcome of evaluating one expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Resolved {
    Value(Value),
    /// `deleted()`
    Deleted,
    /// An `if` without `else`, or a `match` where no arm applied
    Nothing,
}

/// Read-only view of the part being mapped.
pub(crate) struct EvalContext<'a> {
    index: usize,
    batch: &'a Batch,
    part: &'a Part,
    document: OnceCell<EvalResult<Value>>,
}

impl<'a> EvalContext<'a> {
    pub(crate) fn new(index: usize, batch: &'a Batch, part: &'a Part) -> Self {
        Self {
            index,
            batch,
            part,
            document: OnceCell::new(),
        }
    }

    /// Payload parsed as JSON, on first use only
    fn document(&self) -> EvalResult<&Value> {
        let parsed = self.document.get_or_init(|| {
            serde_json::from_slice(self.part.payload()).map_err(|e| {
                EvaluationError::InvalidPayload {
                    reason: e.to_string(),
                }
            })
        });
        match parsed {
            Ok(value) => Ok(value),
            Err(e) => Err(e.clone()),
        }
    }
}

pub(crate) fn evaluate(
    expr: &Expr,
    ctx: &EvalContext<'_>,
    scope: Option<&Value>,
) -> EvalResult<Resolved> {
    match expr {
        Expr::Literal(value) => Ok(Resolved::Value(value.clone())),
        Expr::This(path) => {
            let root = match scope {
                Some(value) => value,
                None => ctx.document()?,
            };
            Ok(Resolved::Value(lookup(root, path)))
        }
        Expr::Get { target, field } => {
            let value = evaluate_value(target, ctx, scope, "field access")?;
            Ok(Resolved::Value(lookup(&value, std::slice::from_ref(field))))
        }
        Expr::Object(entries) => {
            let mut map = Map::new();
            for (key, entry) in entries {
                if let Resolved::Value(value) = evaluate(entry, ctx, scope)? {
                    map.insert(key.clone(), value);
                }
            }
            Ok(Resolved::Value(Value::Object(map)))
        }
        Expr::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                if let Resolved::Value(value) = evaluate(item, ctx, scope)? {
                    values.push(value);
                }
            }
            Ok(Resolved::Value(Value::Array(values)))
        }
        Expr::Unary { op, expr } => evaluate_unary(*op, expr, ctx, scope),
        Expr::Binary { op, left, right } => evaluate_binary(*op, left, right, ctx, scope),
        Expr::If {
            condition,
            then_branch,
            else_branch,
        } => {
            if evaluate_bool(condition, ctx, scope, "if condition")? {
                evaluate(then_branch, ctx, scope)
            } else if let Some(branch) = else_branch {
                evaluate(branch, ctx, scope)
            } else {
                Ok(Resolved::Nothing)
            }
        }
        Expr::Match(arms) => {
            for arm in arms {
                let applies = match &arm.condition {
                    Some(condition) => evaluate_bool(condition, ctx, scope, "match arm")?,
                    None => true,
                };
                if applies {
                    return evaluate(&arm.value, ctx, scope);
                }
            }
            Ok(Resolved::Nothing)
        }
        Expr::Function(function) => Ok(match function {
            Function::Deleted => Resolved::Deleted,
            Function::Meta(key) => Resolved::Value(
                ctx.part
                    .get_metadata(key)
                    .map_or(Value::Null, |v| Value::String(v.to_string())),
            ),
            Function::BatchIndex => Resolved::Value(Value::from(ctx.index as u64)),
            Function::BatchSize => Resolved::Value(Value::from(ctx.batch.len() as u64)),
            Function::Content => Resolved::Value(Value::String(
                String::from_utf8_lossy(ctx.part.payload()).into_owned(),
            )),
        }),
        Expr::Method { target, method } => apply_method(method, target, ctx, scope),
    }
}

/// Evaluate an expression that must produce a concrete value
fn evaluate_value(
    expr: &Expr,
    ctx: &EvalContext<'_>,
    scope: Option<&Value>,
    operation: &str,
) -> EvalResult<Value> {
    match evaluate(expr, ctx, scope)? {
        Resolved::Value(value) => Ok(value),
        Resolved::Deleted => Err(EvaluationError::InvalidOperand {
            what: "deleted()",
            operation: operation.to_string(),
        }),
        Resolved::Nothing => Err(EvaluationError::InvalidOperand {
            what: "an expression without a result",
            operation: operation.to_string(),
        }),
    }
}

fn evaluate_bool(
    expr: &Expr,
    ctx: &EvalContext<'_>,
    scope: Option<&Value>,
    operation: &str,
) -> EvalResult<bool> {
    match evaluate_value(expr, ctx, scope, operation)? {
        Value::Bool(b) => Ok(b),
        other => Err(EvaluationError::type_mismatch(
            operation,
            "bool",
            type_name(&other),
        )),
    }
}

fn evaluate_unary(
    op: UnaryOp,
    expr: &Expr,
    ctx: &EvalContext<'_>,
    scope: Option<&Value>,
) -> EvalResult<Resolved> {
    let result = match op {
        UnaryOp::Not => Value::Bool(!evaluate_bool(expr, ctx, scope, "operator !")?),
        UnaryOp::Negate => match evaluate_value(expr, ctx, scope, "operator -")? {
            Value::Number(n) => match n.as_i64().and_then(i64::checked_neg) {
                Some(i) => Value::from(i),
                None => float_value(-as_f64(&n), "operator -")?,
            },
            other => {
                return Err(EvaluationError::type_mismatch(
                    "operator -",
                    "number",
                    type_name(&other),
                ));
            }
        },
    };
    Ok(Resolved::Value(result))
}

#[derive(Clone, Copy)]
enum Arithmetic {
    Add,
    Subtract,
    Multiply,
    Divide,
}

fn evaluate_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    ctx: &EvalContext<'_>,
    scope: Option<&Value>,
) -> EvalResult<Resolved> {
    let operation = format!("operator {op}");

    let result = match op {
        // Logical operators short-circuit
        BinaryOp::And => Value::Bool(
            evaluate_bool(left, ctx, scope, &operation)?
                && evaluate_bool(right, ctx, scope, &operation)?,
        ),
        BinaryOp::Or => Value::Bool(
            evaluate_bool(left, ctx, scope, &operation)?
                || evaluate_bool(right, ctx, scope, &operation)?,
        ),
        BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide => {
            let (l, r) = evaluate_operands(left, right, ctx, scope, &operation)?;
            let arithmetic = match op {
                BinaryOp::Add => Arithmetic::Add,
                BinaryOp::Subtract => Arithmetic::Subtract,
                BinaryOp::Multiply => Arithmetic::Multiply,
                _ => Arithmetic::Divide,
            };
            arithmetic_op(arithmetic, &l, &r, &operation)?
        }
        BinaryOp::Equal | BinaryOp::NotEqual => {
            let (l, r) = evaluate_operands(left, right, ctx, scope, &operation)?;
            Value::Bool(values_equal(&l, &r) == (op == BinaryOp::Equal))
        }
        BinaryOp::GreaterThan
        | BinaryOp::GreaterThanOrEqual
        | BinaryOp::LessThan
        | BinaryOp::LessThanOrEqual => {
            let (l, r) = evaluate_operands(left, right, ctx, scope, &operation)?;
            let ordering = compare(&l, &r, &operation)?;
            Value::Bool(match op {
                BinaryOp::GreaterThan => ordering == Ordering::Greater,
                BinaryOp::GreaterThanOrEqual => ordering != Ordering::Less,
                BinaryOp::LessThan => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
    };

    Ok(Resolved::Value(result))
}

fn evaluate_operands(
    left: &Expr,
    right: &Expr,
    ctx: &EvalContext<'_>,
    scope: Option<&Value>,
    operation: &str,
) -> EvalResult<(Value, Value)> {
    let l = evaluate_value(left, ctx, scope, operation)?;
    let r = evaluate_value(right, ctx, scope, operation)?;
    Ok((l, r))
}

fn arithmetic_op(
    op: Arithmetic,
    left: &Value,
    right: &Value,
    operation: &str,
) -> EvalResult<Value> {
    if let (Arithmetic::Add, Value::String(a), Value::String(b)) = (op, left, right) {
        return Ok(Value::String(format!("{a}{b}")));
    }

    let (a, b) = match (left, right) {
        (Value::Number(a), Value::Number(b)) => (a, b),
        (Value::Number(_), other) | (other, _) => {
            return Err(EvaluationError::type_mismatch(
                operation,
                "number",
                type_name(other),
            ));
        }
    };

    // Integer math stays exact unless it overflows
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let exact = match op {
            Arithmetic::Add => x.checked_add(y),
            Arithmetic::Subtract => x.checked_sub(y),
            Arithmetic::Multiply => x.checked_mul(y),
            Arithmetic::Divide => None,
        };
        if let Some(result) = exact {
            return Ok(Value::from(result));
        }
    }

    let (x, y) = (as_f64(a), as_f64(b));
    let result = match op {
        Arithmetic::Add => x + y,
        Arithmetic::Subtract => x - y,
        Arithmetic::Multiply => x * y,
        Arithmetic::Divide => {
            if y == 0.0 {
                return Err(EvaluationError::DivisionByZero);
            }
            x / y
        }
    };
    float_value(result, operation)
}

fn as_f64(n: &Number) -> f64 {
    n.as_f64().unwrap_or(f64::NAN)
}

/// Whole floats collapse back to integers so `6 / 2` yields `3`
fn float_value(value: f64, operation: &str) -> EvalResult<Value> {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        return Ok(Value::from(value as i64));
    }
    Number::from_f64(value).map(Value::Number).ok_or_else(|| {
        EvaluationError::type_mismatch(operation, "finite number", "non-finite number")
    })
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => as_f64(a) == as_f64(b),
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value, operation: &str) -> EvalResult<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => as_f64(a)
            .partial_cmp(&as_f64(b))
            .ok_or_else(|| EvaluationError::type_mismatch(operation, "number", "NaN")),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (Value::Number(_), other) => Err(EvaluationError::type_mismatch(
            operation,
            "number",
            type_name(other),
        )),
        (Value::String(_), other) => Err(EvaluationError::type_mismatch(
            operation,
            "string",
            type_name(other),
        )),
        (other, _) => Err(EvaluationError::type_mismatch(
            operation,
            "number or string",
            type_name(other),
        )),
    }
}

fn apply_method(
    method: &Method,
    target: &Expr,
    ctx: &EvalContext<'_>,
    scope: Option<&Value>,
) -> EvalResult<Resolved> {
    let operation = format!("method {}()", method.name());
    let value = evaluate_value(target, ctx, scope, &operation)?;

    let result = match method {
        Method::Uppercase => Value::String(expect_str(&value, &operation)?.to_uppercase()),
        Method::Lowercase => Value::String(expect_str(&value, &operation)?.to_lowercase()),
        Method::Trim => Value::String(expect_str(&value, &operation)?.trim().to_string()),
        Method::Length => match &value {
            Value::String(s) => Value::from(s.chars().count() as u64),
            Value::Array(items) => Value::from(items.len() as u64),
            Value::Object(map) => Value::from(map.len() as u64),
            other => {
                return Err(EvaluationError::type_mismatch(
                    operation,
                    "string, array or object",
                    type_name(other),
                ));
            }
        },
        Method::Number => match value {
            Value::Number(_) => value,
            Value::String(s) => parse_number(&s)?,
            other => {
                return Err(EvaluationError::type_mismatch(
                    operation,
                    "number or string",
                    type_name(&other),
                ));
            }
        },
        Method::String => match value {
            Value::String(_) => value,
            other => Value::String(other.to_string()),
        },
        Method::NotNull => {
            if value.is_null() {
                return Err(EvaluationError::NullValue { context: operation });
            }
            value
        }
        Method::MapEach(mapper) => match value {
            Value::Array(items) => {
                let mut mapped = Vec::with_capacity(items.len());
                for item in items {
                    match evaluate(mapper, ctx, Some(&item))? {
                        Resolved::Value(v) => mapped.push(v),
                        Resolved::Deleted => {}
                        Resolved::Nothing => mapped.push(item),
                    }
                }
                Value::Array(mapped)
            }
            Value::Object(map) => {
                let mut mapped = Map::new();
                for (key, item) in map {
                    match evaluate(mapper, ctx, Some(&item))? {
                        Resolved::Value(v) => {
                            mapped.insert(key, v);
                        }
                        Resolved::Deleted => {}
                        Resolved::Nothing => {
                            mapped.insert(key, item);
                        }
                    }
                }
                Value::Object(mapped)
            }
            other => {
                return Err(EvaluationError::type_mismatch(
                    operation,
                    "array or object",
                    type_name(&other),
                ));
            }
        },
    };

    Ok(Resolved::Value(result))
}

fn expect_str<'v>(value: &'v Value, operation: &str) -> EvalResult<&'v str> {
    value
        .as_str()
        .ok_or_else(|| EvaluationError::type_mismatch(operation, "string", type_name(value)))
}

fn parse_number(text: &str) -> EvalResult<Value> {
    let trimmed = text.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(Value::from(i));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| EvaluationError::NumberParse {
            value: text.to_string(),
        })
}

fn lookup(root: &Value, path: &[String]) -> Value {
    let mut current = root;
    for segment in path {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return Value::Null,
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(next) => current = next,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }
    current.clone()
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
