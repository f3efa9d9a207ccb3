//! Built-in JTL functions.
//!
//! Every function shares one signature and one failure policy: a problem is
//! recorded on the event context and the call yields null, so evaluation of
//! the surrounding expression carries on.

mod json;
mod logic;
mod meta;
mod net;
mod text;
mod time;
mod transform;

use crate::context::{EvalError, EventContext};
use crate::jdoc::{normalize_numbers, to_text, JDoc};
use serde_json::Value as JsonValue;

pub use net::{oauth1_authorization, OAuth1Keys};

pub type FunctionImpl = fn(&EventContext, &JDoc, &[JsonValue]) -> Result<JsonValue, EvalError>;

pub const VARIADIC: usize = usize::MAX;

const CONDITIONALS: [&str; 3] = ["ifte", "case", "alt"];

pub struct FunctionSpec {
    pub name: &'static str,
    pub min_params: usize,
    pub max_params: usize,
    pub implementation: FunctionImpl,
}

impl FunctionSpec {
    const fn new(
        name: &'static str,
        min_params: usize,
        max_params: usize,
        implementation: FunctionImpl,
    ) -> Self {
        Self {
            name,
            min_params,
            max_params,
            implementation,
        }
    }

    pub fn arity_label(&self) -> String {
        match (self.min_params, self.max_params) {
            (min, max) if min == max => min.to_string(),
            (min, VARIADIC) => format!("at least {min}"),
            (min, max) => format!("{min} to {max}"),
        }
    }
}

static FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec::new("and", 1, VARIADIC, logic::and),
    FunctionSpec::new("or", 1, VARIADIC, logic::or),
    FunctionSpec::new("not", 1, 1, logic::not),
    FunctionSpec::new("equals", 2, 2, logic::equals),
    FunctionSpec::new("contains", 1, 2, logic::contains),
    FunctionSpec::new("exists", 1, 2, logic::exists),
    FunctionSpec::new("true", 0, 0, logic::always_true),
    FunctionSpec::new("false", 0, 0, logic::always_false),
    FunctionSpec::new("ifte", 2, 3, logic::ifte),
    FunctionSpec::new("case", 3, VARIADIC, logic::case),
    FunctionSpec::new("alt", 1, VARIADIC, logic::alt),
    FunctionSpec::new("upper", 1, 1, text::upper),
    FunctionSpec::new("lower", 1, 1, text::lower),
    FunctionSpec::new("substr", 3, 3, text::substr),
    FunctionSpec::new("regex", 2, 3, text::regex),
    FunctionSpec::new("match", 2, 2, text::is_match),
    FunctionSpec::new("base64decode", 1, 1, text::base64decode),
    FunctionSpec::new("len", 1, 1, text::len),
    FunctionSpec::new("string", 1, 1, text::string),
    FunctionSpec::new("hmac", 2, 2, text::hmac),
    FunctionSpec::new("hashmod", 2, 2, text::hashmod),
    FunctionSpec::new("time", 0, 0, time::time),
    FunctionSpec::new("format", 1, 3, time::format),
    FunctionSpec::new("calc", 1, 1, time::calc),
    FunctionSpec::new("eval", 1, 2, json::eval),
    FunctionSpec::new("join", 2, 2, json::join),
    FunctionSpec::new("choose", 2, 2, json::choose),
    FunctionSpec::new("crush", 1, 1, json::crush),
    FunctionSpec::new("ident", 1, 1, meta::ident),
    FunctionSpec::new("uuid", 0, 0, meta::uuid),
    FunctionSpec::new("traceid", 0, 0, meta::traceid),
    FunctionSpec::new("tenant", 0, 0, meta::tenant),
    FunctionSpec::new("header", 0, 1, meta::header),
    FunctionSpec::new("prop", 1, 1, meta::prop),
    FunctionSpec::new("js", 1, VARIADIC, meta::js),
    FunctionSpec::new("transform", 1, 4, transform::transform),
    FunctionSpec::new("itransform", 1, 4, transform::itransform),
    FunctionSpec::new("etransform", 1, 1, transform::etransform),
    FunctionSpec::new("ptransform", 1, 1, transform::ptransform),
    FunctionSpec::new("curl", 2, 5, net::curl),
    FunctionSpec::new("curlOAuth1", 3, 5, net::curl_oauth1),
    FunctionSpec::new("loadfile", 1, 1, net::loadfile),
];

pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS.iter().find(|spec| spec.name == name)
}

pub fn names() -> impl Iterator<Item = &'static str> {
    FUNCTIONS.iter().map(|spec| spec.name)
}

pub fn is_conditional(name: &str) -> bool {
    CONDITIONALS.contains(&name)
}

/// Invokes a function by name, recording any failure on the context.
pub fn call(name: &str, ctx: &EventContext, doc: &JDoc, args: &[JsonValue]) -> JsonValue {
    let Some(spec) = lookup(name) else {
        ctx.record_error(EvalError::syntax(format!("unknown function `{name}`")));
        return JsonValue::Null;
    };
    if args.len() < spec.min_params || args.len() > spec.max_params {
        ctx.record_error(EvalError::syntax(format!(
            "function `{name}` takes {} parameters, got {}",
            spec.arity_label(),
            args.len()
        )));
        return JsonValue::Null;
    }
    match (spec.implementation)(ctx, doc, args) {
        Ok(value) => value,
        Err(err) => {
            ctx.record_error(err);
            JsonValue::Null
        }
    }
}

pub(crate) fn text_arg(args: &[JsonValue], index: usize) -> String {
    args.get(index).map(to_text).unwrap_or_default()
}

/// Optional argument treated as absent when missing or blank.
pub(crate) fn present_arg(args: &[JsonValue], index: usize) -> Option<&JsonValue> {
    args.get(index)
        .filter(|value| !super::eval::is_blank(value))
}

/// Argument as structured JSON: strings holding JSON are parsed.
pub(crate) fn json_arg(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(text) => match serde_json::from_str::<JsonValue>(text) {
            Ok(parsed) => normalize_numbers(parsed),
            Err(_) => value.clone(),
        },
        other => other.clone(),
    }
}

/// Document argument at `index`, or the current document when absent.
pub(crate) fn doc_arg(args: &[JsonValue], index: usize, doc: &JDoc) -> JDoc {
    match present_arg(args, index) {
        Some(value) => JDoc::from_value(json_arg(value)),
        None => doc.clone(),
    }
}

pub(crate) fn int_arg(name: &str, args: &[JsonValue], index: usize) -> Result<i64, EvalError> {
    let value = args.get(index).ok_or_else(|| {
        EvalError::syntax(format!("function `{name}` is missing parameter {}", index + 1))
    })?;
    match value {
        JsonValue::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64))
            .ok_or_else(|| EvalError::syntax(format!("`{name}` expects an integer, got {number}"))),
        other => {
            let text = to_text(other);
            text.trim().parse::<i64>().map_err(|_| {
                EvalError::syntax(format!("`{name}` expects an integer, got `{text}`"))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditionals_are_registered() {
        for name in CONDITIONALS {
            assert!(lookup(name).is_some(), "{name} missing");
        }
    }

    #[test]
    fn arity_labels() {
        assert_eq!(lookup("not").map(FunctionSpec::arity_label).as_deref(), Some("1"));
        assert_eq!(
            lookup("and").map(FunctionSpec::arity_label).as_deref(),
            Some("at least 1")
        );
        assert_eq!(
            lookup("curl").map(FunctionSpec::arity_label).as_deref(),
            Some("2 to 5")
        );
    }

    #[test]
    fn json_arguments_parse_embedded_documents() {
        assert_eq!(
            json_arg(&JsonValue::String(r#"{"a":2.0}"#.into())),
            serde_json::json!({ "a": 2 })
        );
        assert_eq!(
            json_arg(&JsonValue::String("plain".into())),
            JsonValue::String("plain".into())
        );
    }
}
