//! Restricted expression language for `${{ ... }}` fragments.
//!
//! A template string contains zero or more `${{ EXPR }}` fragments. When the
//! whole string is a single fragment, resolution yields the expression's
//! native JSON value; otherwise every fragment is stringified and
//! concatenated with the surrounding literal text.
//!
//! EXPR supports dotted attribute access, subscripts, `and`/`or`/`not`,
//! comparisons, arithmetic, literals, `X if C else Y`, and a small
//! pure-function whitelist (`len`, `get`, `empty`, `bool`, `str`, `int`).
//! Evaluation is side-effect free over an immutable scope; there is no way
//! to reach anything outside `{inputs, steps, item, index, env}`.

mod eval;
mod lexer;
mod parser;

pub use eval::{is_truthy, stringify};

use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors produced while resolving an expression or template.
#[derive(Debug, Clone, Error)]
pub enum ExpressionError {
    /// Malformed expression text. `column` is 1-based within the expression.
    #[error("expression syntax error at column {column}: {message}")]
    Syntax { message: String, column: usize },

    /// An unresolved root name, attribute, or subscript.
    #[error("unresolved reference '{path}'; available names: {}", format_names(available))]
    Reference { path: String, available: Vec<String> },

    /// A type error, bad function application, or division by zero.
    #[error("expression evaluation error: {0}")]
    Evaluation(String),
}

fn format_names(names: &[String]) -> String {
    if names.is_empty() {
        return "(none)".to_string();
    }
    names.join(", ")
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// The immutable root scope an expression evaluates against.
///
/// `item` and `index` are populated only inside a loop body.
#[derive(Debug, Clone, Default)]
pub struct ExprScope {
    /// Workflow inputs (JSON object).
    pub inputs: Value,
    /// Recorded step results: name -> `{"output": ..., "success": ...}`.
    pub steps: Value,
    /// Current loop item, when inside a loop body.
    pub item: Option<Value>,
    /// Current loop iteration index, when inside a loop body.
    pub index: Option<u64>,
    /// Process environment snapshot (string map).
    pub env: Value,
}

impl ExprScope {
    /// Root names resolvable in this scope, sorted.
    fn root_names(&self) -> Vec<String> {
        let mut names = vec![
            "env".to_string(),
            "inputs".to_string(),
            "steps".to_string(),
        ];
        if self.item.is_some() {
            names.push("item".to_string());
        }
        if self.index.is_some() {
            names.push("index".to_string());
        }
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Evaluate a bare expression (no `${{ }}` wrapper).
pub fn evaluate(expression: &str, scope: &ExprScope) -> Result<Value, ExpressionError> {
    let tokens = lexer::tokenize(expression)?;
    let expr = parser::parse(&tokens, expression)?;
    eval::evaluate(&expr, scope)
}

/// Resolve a template string.
///
/// A string that is exactly one `${{ EXPR }}` fragment resolves to the
/// expression's native value. Mixed text resolves to the concatenation of
/// literal text and stringified fragment values. A string with no fragments
/// resolves to itself.
pub fn resolve_template(text: &str, scope: &ExprScope) -> Result<Value, ExpressionError> {
    let fragments = split_fragments(text)?;

    // Whole-string single fragment keeps its native type.
    if let [Fragment::Expr(expr)] = fragments.as_slice() {
        return evaluate(expr, scope);
    }
    if fragments.iter().all(|f| matches!(f, Fragment::Text(_))) {
        return Ok(Value::String(text.to_string()));
    }

    let mut out = String::new();
    for fragment in &fragments {
        match fragment {
            Fragment::Text(t) => out.push_str(t),
            Fragment::Expr(expr) => out.push_str(&stringify(&evaluate(expr, scope)?)),
        }
    }
    Ok(Value::String(out))
}

/// Recursively resolve every string inside a JSON value.
///
/// Used for `kwargs`/`inputs` payloads: objects and arrays are walked,
/// strings go through [`resolve_template`], other scalars pass through.
pub fn resolve_value(value: &Value, scope: &ExprScope) -> Result<Value, ExpressionError> {
    match value {
        Value::String(text) => resolve_template(text, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_value(item, scope)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

/// Resolve every value of a keyword-argument map.
pub fn resolve_map(
    map: &serde_json::Map<String, Value>,
    scope: &ExprScope,
) -> Result<serde_json::Map<String, Value>, ExpressionError> {
    let mut resolved = serde_json::Map::with_capacity(map.len());
    for (key, value) in map {
        resolved.insert(key.clone(), resolve_value(value, scope)?);
    }
    Ok(resolved)
}

// ---------------------------------------------------------------------------
// Fragment scanning
// ---------------------------------------------------------------------------

enum Fragment {
    Text(String),
    Expr(String),
}

/// Split a template into literal text and `${{ ... }}` expression fragments.
///
/// The closing `}}` is matched outside of string literals, so expressions
/// may contain braces inside quotes.
fn split_fragments(text: &str) -> Result<Vec<Fragment>, ExpressionError> {
    let mut fragments = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("${{") {
        if start > 0 {
            fragments.push(Fragment::Text(rest[..start].to_string()));
        }
        let body = &rest[start + 3..];
        let end = find_closing(body).ok_or_else(|| ExpressionError::Syntax {
            message: "unterminated '${{' fragment".to_string(),
            column: start + 1,
        })?;
        fragments.push(Fragment::Expr(body[..end].trim().to_string()));
        rest = &body[end + 2..];
    }
    if !rest.is_empty() {
        fragments.push(Fragment::Text(rest.to_string()));
    }
    Ok(fragments)
}

/// Byte offset of the first `}}` not inside a quoted string.
fn find_closing(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'\'' || b == b'"' {
                    quote = Some(b);
                } else if b == b'}' && bytes.get(i + 1) == Some(&b'}') {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
