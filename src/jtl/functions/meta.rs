use super::text_arg;
use crate::context::{EvalError, EventContext};
use crate::jdoc::JDoc;
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

pub(super) fn ident(_: &EventContext, _: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    Ok(args.first().cloned().unwrap_or(JsonValue::Null))
}

pub(super) fn uuid(_: &EventContext, _: &JDoc, _: &[JsonValue]) -> Result<JsonValue, EvalError> {
    Ok(JsonValue::String(Uuid::new_v4().to_string()))
}

pub(super) fn traceid(
    ctx: &EventContext,
    _: &JDoc,
    _: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    Ok(JsonValue::String(ctx.trace_id().to_string()))
}

pub(super) fn tenant(ctx: &EventContext, _: &JDoc, _: &[JsonValue]) -> Result<JsonValue, EvalError> {
    Ok(JsonValue::String(ctx.tenant_id().to_string()))
}

/// `header(name)` or, without arguments, every request header as a mapping.
pub(super) fn header(
    ctx: &EventContext,
    _: &JDoc,
    args: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    if args.is_empty() {
        let headers: JsonMap<String, JsonValue> = ctx
            .headers()
            .iter()
            .map(|(name, value)| (name.clone(), JsonValue::String(value.clone())))
            .collect();
        return Ok(JsonValue::Object(headers));
    }
    let name = text_arg(args, 0);
    Ok(JsonValue::String(ctx.header(&name).unwrap_or_default()))
}

/// `prop(name)`: already evaluated handler properties first, then the raw
/// handler definition, then the global configuration.
pub(super) fn prop(ctx: &EventContext, doc: &JDoc, args: &[JsonValue]) -> Result<JsonValue, EvalError> {
    let name = text_arg(args, 0);
    if let Some(value) = ctx.custom_properties().get(&name) {
        return Ok(value.clone());
    }

    let stored = ctx
        .handler()
        .and_then(|handler| handler.custom_properties.get(&name).cloned())
        .or_else(|| {
            ctx.engine()
                .config()
                .custom_properties
                .get(&name)
                .cloned()
        })
        .ok_or_else(|| EvalError::runtime(format!("unknown custom property `{name}`")))?;

    let _guard = ctx.enter().ok_or_else(|| {
        EvalError::runtime(format!("custom property `{name}` recurses too deeply"))
    })?;
    Ok(match stored {
        JsonValue::String(expression) => crate::jtl::evaluate(&expression, doc, ctx),
        other => crate::transform::by_example(&other, doc, ctx),
    })
}

pub(super) fn js(_: &EventContext, _: &JDoc, _: &[JsonValue]) -> Result<JsonValue, EvalError> {
    Err(EvalError::runtime(
        "javascript evaluation is not available; use calc, regex or case instead",
    ))
}
