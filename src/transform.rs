//! Handler transformations.
//!
//! By-path: a mapping from target path expression to source expression; each
//! evaluated value is deep-merged into the output at the target path. Null
//! values are written as null, so an identity mapping of a null event is null.
//! By-example: a template whose string leaves are JTL expressions.

use crate::context::{EvalError, EventContext};
use crate::jdoc::{self, assign_path, parse_path, JDoc, Segment};
use crate::jtl;
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Applies a transformation, recording failures on `ctx`. A null result is
/// itself an error and yields `None`.
pub fn apply(
    template: &JsonValue,
    is_by_example: bool,
    doc: &JDoc,
    ctx: &EventContext,
) -> Option<JsonValue> {
    let result = if is_by_example {
        Ok(by_example(template, doc, ctx))
    } else {
        by_path(template, doc, ctx)
    };
    match result {
        Ok(JsonValue::Null) => {
            ctx.record_error(EvalError::runtime("transformation produced null"));
            None
        }
        Ok(value) => Some(value),
        Err(err) => {
            ctx.record_error(err);
            None
        }
    }
}

pub fn by_path(template: &JsonValue, doc: &JDoc, ctx: &EventContext) -> Result<JsonValue, EvalError> {
    let JsonValue::Object(entries) = template else {
        return Err(EvalError::runtime(
            "by-path transformation must be a mapping of target paths to expressions",
        ));
    };

    let mut output = JsonValue::Null;
    let mut assigned = false;
    for (target, source) in entries {
        let segments = target_segments(target, doc, ctx)?;
        let value = match source {
            JsonValue::String(expression) => jtl::evaluate(expression, doc, ctx),
            nested => by_example(nested, doc, ctx),
        };
        assigned = true;
        if segments.is_empty() {
            // A null root leaves earlier assignments alone.
            if !value.is_null() {
                jdoc::merge_into(&mut output, value);
            }
        } else {
            assign_path(&mut output, &segments, value);
        }
    }

    if output.is_null() && !assigned {
        output = JsonValue::Object(JsonMap::new());
    }
    Ok(jdoc::normalize_numbers(output))
}

fn target_segments(target: &str, doc: &JDoc, ctx: &EventContext) -> Result<Vec<Segment>, EvalError> {
    let path = match jtl::path_expression(target) {
        Some(path) => path.to_string(),
        None => jtl::evaluate_text(target, doc, ctx),
    };
    let path = path.trim();
    if path != "." && !path.starts_with('/') {
        return Err(EvalError::runtime(format!(
            "transformation target `{target}` does not resolve to a path"
        )));
    }
    let segments = parse_path(path).map_err(|err| EvalError::syntax(err.to_string()))?;
    if segments.iter().any(|segment| segment.selector.is_some()) {
        return Err(EvalError::runtime(format!(
            "transformation target `{target}` cannot use array selectors"
        )));
    }
    Ok(segments)
}

/// Walks the template replacing every string with its evaluation.
pub fn by_example(template: &JsonValue, doc: &JDoc, ctx: &EventContext) -> JsonValue {
    match template {
        JsonValue::String(expression) => jtl::evaluate(expression, doc, ctx),
        JsonValue::Array(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| by_example(item, doc, ctx))
                .collect(),
        ),
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), by_example(value, doc, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Load-time problems with a by-path transformation.
pub fn validate_by_path(template: &JsonValue) -> Vec<String> {
    let JsonValue::Object(entries) = template else {
        return vec!["by-path transformation must be a mapping".to_string()];
    };
    let mut problems = Vec::new();
    for (target, source) in entries {
        if let Err(err) = jtl::validate(target) {
            problems.push(format!("invalid target `{target}`: {err}"));
        }
        collect_invalid_strings(source, &mut problems);
    }
    problems
}

/// Invalid expressions anywhere in a template.
pub fn validate_template(template: &JsonValue) -> Vec<String> {
    let mut problems = Vec::new();
    collect_invalid_strings(template, &mut problems);
    problems
}

fn collect_invalid_strings(value: &JsonValue, problems: &mut Vec<String>) {
    match value {
        JsonValue::String(expression) => {
            if let Err(err) = jtl::validate(expression) {
                problems.push(format!("invalid expression `{expression}`: {err}"));
            }
        }
        JsonValue::Array(items) => items
            .iter()
            .for_each(|item| collect_invalid_strings(item, problems)),
        JsonValue::Object(map) => map
            .values()
            .for_each(|item| collect_invalid_strings(item, problems)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EelConfig;
    use crate::engine::Engine;
    use crate::handler::HandlerRegistry;
    use serde_json::json;
    use std::sync::Arc;

    fn context() -> EventContext {
        let engine = Engine::new(EelConfig::default(), HandlerRegistry::default()).expect("engine");
        EventContext::new(Arc::new(engine), "")
    }

    #[test]
    fn identity_of_a_null_event_is_null() {
        let ctx = context();
        let template = json!({ "{{/}}": "{{/}}" });
        let output = by_path(&template, &JDoc::from_value(JsonValue::Null), &ctx).expect("by-path");
        assert_eq!(output, JsonValue::Null);

        assert!(apply(&template, false, &JDoc::from_value(JsonValue::Null), &ctx).is_none());
        assert_eq!(ctx.error_count(), 1);
    }

    #[test]
    fn missing_sources_are_written_as_null() {
        let ctx = context();
        let template = json!({ "{{/id}}": "{{/sku}}", "{{/meta/note}}": "{{/absent}}" });
        let output = by_path(&template, &JDoc::from_value(json!({ "sku": "a-1" })), &ctx)
            .expect("by-path");
        assert_eq!(output, json!({ "id": "a-1", "meta": { "note": null } }));
    }

    #[test]
    fn empty_mapping_yields_an_empty_object() {
        let ctx = context();
        let output = by_path(&json!({}), &JDoc::from_value(json!({ "a": 1 })), &ctx).expect("by-path");
        assert_eq!(output, json!({}));
    }
}
