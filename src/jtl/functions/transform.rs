use super::{doc_arg, json_arg, present_arg, text_arg};
use crate::context::{EvalError, EventContext};
use crate::handler::NamedTransformation;
use crate::jdoc::{merge_into, JDoc};
use crate::pipeline;
use serde_json::Value as JsonValue;

fn named_transformation(
    ctx: &EventContext,
    name: &str,
) -> Result<NamedTransformation, EvalError> {
    let handler = ctx.handler().ok_or_else(|| {
        EvalError::runtime(format!("transformation `{name}` used outside of a handler"))
    })?;
    handler
        .named_transformation(name)
        .cloned()
        .ok_or_else(|| {
            EvalError::runtime(format!(
                "handler `{}` has no transformation named `{name}`",
                handler.name
            ))
        })
}

/// Applies one named transformation to `source`, honouring the optional
/// pattern and join arguments. `None` means the pattern did not match.
fn apply_named(
    ctx: &EventContext,
    named: &NamedTransformation,
    source: JsonValue,
    pattern: Option<&JsonValue>,
    join: Option<&JsonValue>,
) -> Option<JsonValue> {
    let mut source = source;
    if let Some(pattern) = pattern {
        if !crate::jdoc::matches_pattern(&source, pattern).0 {
            return None;
        }
    }
    if let Some(join) = join {
        merge_into(&mut source, join.clone());
    }
    let doc = JDoc::from_value(source);
    crate::transform::apply(
        &named.transformation,
        named.transformation_by_example,
        &doc,
        ctx,
    )
}

/// `transform(name[, doc[, pattern[, join]]])`.
pub(super) fn transform(
    ctx: &EventContext,
    doc: &JDoc,
    args: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    let name = text_arg(args, 0);
    let named = named_transformation(ctx, &name)?;
    let _guard = ctx
        .enter()
        .ok_or_else(|| EvalError::runtime(format!("transformation `{name}` recurses too deeply")))?;

    let source = doc_arg(args, 1, doc).into_root();
    let pattern = present_arg(args, 2).map(json_arg);
    let join = present_arg(args, 3).map(json_arg);
    Ok(apply_named(ctx, &named, source, pattern.as_ref(), join.as_ref()).unwrap_or(JsonValue::Null))
}

/// `itransform(name[, doc[, pattern[, join]]])`: applies the transformation to
/// every element of a sequence, skipping elements that miss the pattern.
pub(super) fn itransform(
    ctx: &EventContext,
    doc: &JDoc,
    args: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    let name = text_arg(args, 0);
    let named = named_transformation(ctx, &name)?;
    let _guard = ctx
        .enter()
        .ok_or_else(|| EvalError::runtime(format!("transformation `{name}` recurses too deeply")))?;

    let JsonValue::Array(items) = doc_arg(args, 1, doc).into_root() else {
        return Err(EvalError::runtime(format!(
            "itransform `{name}` expects a sequence"
        )));
    };
    let pattern = present_arg(args, 2).map(json_arg);
    let join = present_arg(args, 3).map(json_arg);

    let transformed = items
        .into_iter()
        .filter_map(|item| apply_named(ctx, &named, item, pattern.as_ref(), join.as_ref()))
        .collect();
    Ok(JsonValue::Array(transformed))
}

/// `etransform(event)`: the first payload produced by the first handler
/// matching `event`.
pub(super) fn etransform(
    ctx: &EventContext,
    _: &JDoc,
    args: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    let event = JDoc::from_value(args.first().map(json_arg).unwrap_or(JsonValue::Null));
    let _guard = ctx
        .enter()
        .ok_or_else(|| EvalError::runtime("etransform recurses too deeply"))?;

    let mut child = ctx.derive();
    let registry = ctx.engine().registry();
    let handlers = registry.match_handlers(&event, &child);
    let result = match handlers.first() {
        Some(handler) => pipeline::process_handler(&mut child, &event, handler)
            .into_iter()
            .next()
            .map(|publisher| publisher.payload_parsed)
            .ok_or_else(|| {
                EvalError::runtime(format!(
                    "handler `{}` produced no payload for etransform",
                    handler.name
                ))
            }),
        None => Err(EvalError::runtime("no handler matches the etransform event")),
    };
    ctx.absorb(child);
    result
}

/// `ptransform(event)`: routes `event` through the full pipeline and sends
/// every resulting publisher before returning.
pub(super) fn ptransform(
    ctx: &EventContext,
    _: &JDoc,
    args: &[JsonValue],
) -> Result<JsonValue, EvalError> {
    let event = JDoc::from_value(args.first().map(json_arg).unwrap_or(JsonValue::Null));
    let _guard = ctx
        .enter()
        .ok_or_else(|| EvalError::runtime("ptransform recurses too deeply"))?;

    let mut child = ctx.derive();
    let publishers = pipeline::process_event(&mut child, &event);
    if !publishers.is_empty() {
        let sent = crate::engine::block_on_io(pipeline::send_publishers(&child, publishers));
        if sent.is_none() {
            child.record_error(EvalError::runtime("ptransform could not reach a runtime"));
        }
    }
    ctx.absorb(child);
    Ok(JsonValue::Null)
}
