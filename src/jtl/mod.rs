//! JTL, the expression language embedded in handler definitions.
//!
//! `{{/a/b}}` selects a value from the event, `{{fn('x','{{/y}}')}}` calls a
//! built-in function, and everything outside `{{ … }}` is literal text. An
//! expression made of a single selector or call keeps the native JSON type of
//! its result; mixed text concatenates into a string.

pub mod ast;
pub mod calc;
pub mod eval;
pub mod functions;
pub mod lexer;

use crate::context::{EvalError, EventContext};
use crate::jdoc::{to_text, JDoc};
use ast::Ast;
use serde_json::Value as JsonValue;

pub use eval::{is_blank, is_truthy};

/// Evaluates `expression` against `doc`. Problems are recorded on `ctx` and
/// yield null.
pub fn evaluate(expression: &str, doc: &JDoc, ctx: &EventContext) -> JsonValue {
    if is_literal(expression) {
        return JsonValue::String(expression.to_string());
    }
    match Ast::parse(expression) {
        Ok(mut ast) => ast.evaluate(doc, ctx),
        Err(err) => {
            ctx.record_error(err);
            JsonValue::Null
        }
    }
}

/// Evaluates and renders the result as text (null renders empty).
pub fn evaluate_text(expression: &str, doc: &JDoc, ctx: &EventContext) -> String {
    to_text(&evaluate(expression, doc, ctx))
}

pub fn validate(expression: &str) -> Result<(), EvalError> {
    if is_literal(expression) {
        return Ok(());
    }
    Ast::parse(expression).map(|_| ())
}

/// The bare selector when `expression` is exactly `{{/…}}` or `{{.}}`.
pub fn path_expression(expression: &str) -> Option<&str> {
    let inner = expression
        .trim()
        .strip_prefix(lexer::LEFT_META)?
        .strip_suffix(lexer::RIGHT_META)?
        .trim();
    if inner.contains(lexer::LEFT_META) || inner.contains(lexer::RIGHT_META) {
        return None;
    }
    if inner == "." || inner.starts_with('/') {
        Some(inner)
    } else {
        None
    }
}

fn is_literal(expression: &str) -> bool {
    !expression.contains(['{', '}', '$', '\\'])
}
