//! Evaluator for parsed expressions.
//!
//! Pure over an immutable [`ExprScope`]: no side effects, no blocking, and
//! nothing callable beyond the six whitelisted functions. `and`/`or` return
//! the deciding operand (not a coerced boolean), so guards compose the same
//! way the source workflows expect.

use serde_json::{Number, Value};

use super::parser::{BinaryOp, Expr, UnaryOp};
use super::{ExprScope, ExpressionError};

/// Evaluate an expression tree against a scope.
pub(crate) fn evaluate(expr: &Expr, scope: &ExprScope) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Int(n) => Ok(Value::Number((*n).into())),
        Expr::Float(n) => Ok(Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Null => Ok(Value::Null),

        Expr::Name(name) => resolve_root(name, scope),

        Expr::Attr { base, attr } => {
            let value = evaluate(base, scope)?;
            lookup_key(&value, attr, || format!("{}.{}", expr_path(base), attr))
        }

        Expr::Index { base, index } => {
            let value = evaluate(base, scope)?;
            let key = evaluate(index, scope)?;
            match (&value, &key) {
                (Value::Object(_), Value::String(k)) => {
                    lookup_key(&value, k, || format!("{}[{:?}]", expr_path(base), k))
                }
                (Value::Array(items), Value::Number(n)) => {
                    let idx = n.as_i64().ok_or_else(|| {
                        ExpressionError::Evaluation(format!("invalid array index: {n}"))
                    })?;
                    let len = items.len() as i64;
                    let resolved = if idx < 0 { idx + len } else { idx };
                    if resolved < 0 || resolved >= len {
                        return Err(ExpressionError::Reference {
                            path: format!("{}[{}]", expr_path(base), idx),
                            available: vec![format!("indices 0..{len}")],
                        });
                    }
                    Ok(items[resolved as usize].clone())
                }
                (other, key) => Err(ExpressionError::Evaluation(format!(
                    "cannot subscript {} with {}",
                    type_name(other),
                    type_name(key)
                ))),
            }
        }

        Expr::Unary { op, operand } => {
            let value = evaluate(operand, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!is_truthy(&value))),
                UnaryOp::Neg => match &value {
                    Value::Number(n) => {
                        if let Some(i) = n.as_i64() {
                            Ok(Value::Number((-i).into()))
                        } else {
                            let f = n.as_f64().unwrap_or(0.0);
                            Ok(Number::from_f64(-f)
                                .map(Value::Number)
                                .unwrap_or(Value::Null))
                        }
                    }
                    other => Err(ExpressionError::Evaluation(format!(
                        "cannot negate {}",
                        type_name(other)
                    ))),
                },
            }
        }

        Expr::Binary { op, left, right } => match op {
            BinaryOp::And => {
                let l = evaluate(left, scope)?;
                if is_truthy(&l) {
                    evaluate(right, scope)
                } else {
                    Ok(l)
                }
            }
            BinaryOp::Or => {
                let l = evaluate(left, scope)?;
                if is_truthy(&l) {
                    Ok(l)
                } else {
                    evaluate(right, scope)
                }
            }
            _ => {
                let l = evaluate(left, scope)?;
                let r = evaluate(right, scope)?;
                apply_binary(*op, &l, &r)
            }
        },

        Expr::Call { func, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, scope)?);
            }
            apply_function(func, &values)
        }

        Expr::Conditional {
            then,
            cond,
            otherwise,
        } => {
            if is_truthy(&evaluate(cond, scope)?) {
                evaluate(then, scope)
            } else {
                evaluate(otherwise, scope)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Root and member resolution
// ---------------------------------------------------------------------------

fn resolve_root(name: &str, scope: &ExprScope) -> Result<Value, ExpressionError> {
    match name {
        "inputs" => Ok(scope.inputs.clone()),
        "steps" => Ok(scope.steps.clone()),
        "env" => Ok(scope.env.clone()),
        "item" => scope.item.clone().ok_or_else(|| ExpressionError::Reference {
            path: "item".to_string(),
            available: scope.root_names(),
        }),
        "index" => scope
            .index
            .map(|i| Value::Number(i.into()))
            .ok_or_else(|| ExpressionError::Reference {
                path: "index".to_string(),
                available: scope.root_names(),
            }),
        other => Err(ExpressionError::Reference {
            path: other.to_string(),
            available: scope.root_names(),
        }),
    }
}

fn lookup_key(
    value: &Value,
    key: &str,
    path: impl FnOnce() -> String,
) -> Result<Value, ExpressionError> {
    match value {
        Value::Object(map) => map.get(key).cloned().ok_or_else(|| {
            let mut available: Vec<String> = map.keys().cloned().collect();
            available.sort();
            ExpressionError::Reference {
                path: path(),
                available,
            }
        }),
        other => Err(ExpressionError::Evaluation(format!(
            "cannot access attribute '{key}' on {}",
            type_name(other)
        ))),
    }
}

/// Render the dotted-path text of an access chain for error messages.
fn expr_path(expr: &Expr) -> String {
    match expr {
        Expr::Name(name) => name.clone(),
        Expr::Attr { base, attr } => format!("{}.{}", expr_path(base), attr),
        Expr::Index { base, index } => match index.as_ref() {
            Expr::Str(s) => format!("{}[{:?}]", expr_path(base), s),
            Expr::Int(i) => format!("{}[{}]", expr_path(base), i),
            _ => format!("{}[...]", expr_path(base)),
        },
        _ => "<expression>".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::NotEq => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = compare_values(left, right).ok_or_else(|| {
                ExpressionError::Evaluation(format!(
                    "cannot order {} and {}",
                    type_name(left),
                    type_name(right)
                ))
            })?;
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::LtEq => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::GtEq => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Add => match (left, right) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            (Value::Number(_), Value::Number(_)) => numeric_op(op, left, right),
            _ => Err(ExpressionError::Evaluation(format!(
                "cannot add {} and {}",
                type_name(left),
                type_name(right)
            ))),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => numeric_op(op, left, right),
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuited in evaluate"),
    }
}

fn numeric_op(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    let (Value::Number(l), Value::Number(r)) = (left, right) else {
        return Err(ExpressionError::Evaluation(format!(
            "arithmetic requires numbers, got {} and {}",
            type_name(left),
            type_name(right)
        )));
    };

    // Integer arithmetic stays integral except for division, which is
    // always true division.
    if let (Some(a), Some(b)) = (l.as_i64(), r.as_i64()) {
        match op {
            BinaryOp::Add => return ok_int(a.checked_add(b)),
            BinaryOp::Sub => return ok_int(a.checked_sub(b)),
            BinaryOp::Mul => return ok_int(a.checked_mul(b)),
            BinaryOp::Div => {
                if b == 0 {
                    return Err(ExpressionError::Evaluation("division by zero".to_string()));
                }
                return ok_float(a as f64 / b as f64);
            }
            _ => unreachable!(),
        }
    }

    let a = l.as_f64().unwrap_or(0.0);
    let b = r.as_f64().unwrap_or(0.0);
    match op {
        BinaryOp::Add => ok_float(a + b),
        BinaryOp::Sub => ok_float(a - b),
        BinaryOp::Mul => ok_float(a * b),
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(ExpressionError::Evaluation("division by zero".to_string()));
            }
            ok_float(a / b)
        }
        _ => unreachable!(),
    }
}

fn ok_int(value: Option<i64>) -> Result<Value, ExpressionError> {
    value
        .map(|v| Value::Number(v.into()))
        .ok_or_else(|| ExpressionError::Evaluation("integer overflow".to_string()))
}

fn ok_float(value: f64) -> Result<Value, ExpressionError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| ExpressionError::Evaluation("non-finite arithmetic result".to_string()))
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        // Numbers compare numerically across int/float representations.
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => left == right,
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Function whitelist
// ---------------------------------------------------------------------------

const FUNCTIONS: &[&str] = &["bool", "empty", "get", "int", "len", "str"];

fn apply_function(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    match name {
        "len" => {
            let [value] = args else {
                return arity_error(name, "1 argument", args.len());
            };
            let len = match value {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => {
                    return Err(ExpressionError::Evaluation(format!(
                        "len() requires a string, array, or object, got {}",
                        type_name(other)
                    )));
                }
            };
            Ok(Value::Number((len as u64).into()))
        }
        "get" => {
            let (mapping, key, default) = match args {
                [m, k] => (m, k, &Value::Null),
                [m, k, d] => (m, k, d),
                _ => return arity_error(name, "2 or 3 arguments", args.len()),
            };
            let Value::Object(map) = mapping else {
                return Err(ExpressionError::Evaluation(format!(
                    "get() requires a mapping, got {}",
                    type_name(mapping)
                )));
            };
            let Value::String(key) = key else {
                return Err(ExpressionError::Evaluation(format!(
                    "get() key must be a string, got {}",
                    type_name(key)
                )));
            };
            Ok(map.get(key).cloned().unwrap_or_else(|| default.clone()))
        }
        "empty" => {
            let [value] = args else {
                return arity_error(name, "1 argument", args.len());
            };
            let empty = match value {
                Value::Null => true,
                Value::String(s) => s.is_empty(),
                Value::Array(items) => items.is_empty(),
                Value::Object(map) => map.is_empty(),
                _ => false,
            };
            Ok(Value::Bool(empty))
        }
        "bool" => {
            let [value] = args else {
                return arity_error(name, "1 argument", args.len());
            };
            Ok(Value::Bool(is_truthy(value)))
        }
        "str" => {
            let [value] = args else {
                return arity_error(name, "1 argument", args.len());
            };
            Ok(Value::String(stringify(value)))
        }
        "int" => {
            let [value] = args else {
                return arity_error(name, "1 argument", args.len());
            };
            let result = match value {
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Some(i)
                    } else {
                        n.as_f64().map(|f| f.trunc() as i64)
                    }
                }
                Value::String(s) => s.trim().parse::<i64>().ok(),
                Value::Bool(b) => Some(*b as i64),
                _ => None,
            };
            result.map(|i| Value::Number(i.into())).ok_or_else(|| {
                ExpressionError::Evaluation(format!(
                    "int() cannot convert {}",
                    type_name(value)
                ))
            })
        }
        other => Err(ExpressionError::Evaluation(format!(
            "unknown function '{other}'; allowed functions: {}",
            FUNCTIONS.join(", ")
        ))),
    }
}

fn arity_error(name: &str, expected: &str, got: usize) -> Result<Value, ExpressionError> {
    Err(ExpressionError::Evaluation(format!(
        "{name}() takes {expected}, got {got}"
    )))
}

// ---------------------------------------------------------------------------
// Shared value helpers
// ---------------------------------------------------------------------------

/// Truthiness: `null`, `false`, `0`, `""`, `[]`, and `{}` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Display stringification used for template concatenation and `str()`.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
