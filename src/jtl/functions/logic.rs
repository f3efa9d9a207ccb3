use super::{doc_arg, json_arg, text_arg};
use crate::context::{EvalError, EventContext};
use crate::jdoc::pattern::scalar_equal;
use crate::jdoc::JDoc;
use crate::jtl::eval::{is_blank, is_truthy};
use serde_json::Value as JsonValue;

pub(super) fn and(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    Ok(JsonValue::Bool(args.iter().all(is_truthy)))
}

pub(super) fn or(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    Ok(JsonValue::Bool(args.iter().any(is_truthy)))
}

pub(super) fn not(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    Ok(JsonValue::Bool(!args.first().is_some_and(is_truthy)))
}

/// Structural equality; JSON text on either side is compared as a document.
pub(super) fn equals(
    _: &EventContext,
    _: &JDoc,
    args: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    let lhs = args.first().map(json_arg).unwrap_or(JsonValue::Null);
    let rhs = args.get(1).map(json_arg).unwrap_or(JsonValue::Null);
    Ok(JsonValue::Bool(scalar_equal(&lhs, &rhs)))
}

/// `contains(pattern[, doc])`: partial-document match.
pub(super) fn contains(
    _: &EventContext,
    doc: &JDoc,
    args: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    let pattern = args.first().map(json_arg).unwrap_or(JsonValue::Null);
    let target = doc_arg(args, 1, doc);
    Ok(JsonValue::Bool(target.matches_pattern(&pattern).0))
}

/// `exists(path[, doc])`.
pub(super) fn exists(
    _: &EventContext,
    doc: &JDoc,
    args: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    let path = text_arg(args, 0);
    if !path.starts_with('/') && path != "." {
        return Err(EvalError::syntax(format!(
            "exists expects a path starting with `/`, got `{path}`"
        )));
    }
    let target = doc_arg(args, 1, doc);
    Ok(JsonValue::Bool(target.has_path(&path)))
}

pub(super) fn always_true(
    _: &EventContext,
    _: &JDoc,
    _: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    Ok(JsonValue::Bool(true))
}

pub(super) fn always_false(
    _: &EventContext,
    _: &JDoc,
    _: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    Ok(JsonValue::Bool(false))
}

// The evaluator settles conditionals lazily before ordinary calls; these eager
// forms only run when a conditional is invoked with already-collapsed values.

pub(super) fn ifte(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    let branch = if args.first().is_some_and(is_truthy) {
        args.get(1)
    } else {
        args.get(2)
    };
    Ok(branch
        .cloned()
        .unwrap_or_else(|| JsonValue::String(String::new())))
}

pub(super) fn alt(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    Ok(args
        .iter()
        .find(|value| !is_blank(value))
        .cloned()
        .unwrap_or_else(|| JsonValue::String(String::new())))
}

pub(super) fn case(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    for triple in args.chunks_exact(3) {
        if scalar_equal(&triple[0], &triple[1]) {
            return Ok(triple[2].clone());
        }
    }
    if args.len() % 3 == 1 {
        return Ok(args.last().cloned().unwrap_or(JsonValue::Null));
    }
    Ok(JsonValue::String(String::new()))
}
