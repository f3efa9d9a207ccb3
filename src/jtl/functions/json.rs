use super::{doc_arg, json_arg, text_arg};
use crate::context::{EvalError, EventContext};
use crate::jdoc::{self, JDoc};
use serde_json::Value as JsonValue;

/// `eval(path[, doc])`.
pub(super) fn eval(_: &EventContext, doc: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    let path = text_arg(args, 0);
    let path = path.trim();
    if path != "." && !path.starts_with('/') {
        return Err(EvalError::syntax(format!(
            "eval expects a path starting with `/`, got `{path}`"
        )));
    }
    jdoc::parse_path(path).map_err(|err| EvalError::syntax(err.to_string()))?;
    let target = doc_arg(args, 1, doc);
    Ok(target.value(path).cloned().unwrap_or(JsonValue::Null))
}

/// `join(a, b)`: deep-merges `a` into `b`.
pub(super) fn join(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    let source = args.first().map(json_arg).unwrap_or(JsonValue::Null);
    let mut target = args.get(1).map(json_arg).unwrap_or(JsonValue::Null);
    if !source.is_object() || !target.is_object() {
        return Err(EvalError::runtime("join expects two JSON objects"));
    }
    jdoc::merge_into(&mut target, source);
    Ok(target)
}

/// `choose(doc, pattern)`.
pub(super) fn choose(
    _: &EventContext,
    _: &JDoc,
    args: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    let source = args.first().map(json_arg).unwrap_or(JsonValue::Null);
    let pattern = args.get(1).map(json_arg).unwrap_or(JsonValue::Null);
    Ok(jdoc::choose(&source, &pattern))
}

pub(super) fn crush(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    let source = args.first().map(json_arg).unwrap_or(JsonValue::Null);
    Ok(jdoc::crush(&source))
}
