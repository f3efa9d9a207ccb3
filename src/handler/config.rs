use crate::config::one_or_many;
use crate::context::EventContext;
use crate::jdoc::pattern::scalar_equal;
use crate::jdoc::JDoc;
use crate::jtl;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_VERB: &str = "POST";
pub const DEFAULT_PROTOCOL: &str = "http";

/// One handler definition, loaded from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerConfig {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_true", alias = "isActive")]
    pub active: bool,
    #[serde(default)]
    pub terminate_on_match: bool,
    #[serde(default)]
    pub topic: String,
    #[serde(default, rename = "match")]
    pub match_values: Option<JsonValue>,
    #[serde(default)]
    pub match_by_example: bool,
    #[serde(default)]
    pub transformation: Option<JsonValue>,
    #[serde(default)]
    pub transformation_by_example: bool,
    #[serde(default, alias = "transformations")]
    pub named_transformations: BTreeMap<String, NamedTransformation>,
    #[serde(default)]
    pub custom_properties: JsonMap<String, JsonValue>,
    #[serde(default)]
    pub filter: Option<JsonValue>,
    #[serde(default)]
    pub filter_by_example: bool,
    #[serde(default)]
    pub filter_inverted: bool,
    #[serde(default)]
    pub filter_after_transformation: bool,
    #[serde(default, deserialize_with = "one_or_many")]
    pub filter_if_true: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub filter_if_false: Vec<String>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub path: Vec<String>,
    #[serde(default)]
    pub verb: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub endpoint: Vec<String>,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub auth_info: Option<JsonValue>,
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,
    #[serde(skip)]
    pub file: Option<PathBuf>,
}

/// Named transformation callable through `transform()` and `itransform()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedTransformation {
    #[serde(default)]
    pub transformation: JsonValue,
    #[serde(default, alias = "byExample")]
    pub transformation_by_example: bool,
}

/// Entry of the ordered `filters` list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    #[serde(default)]
    pub filter: JsonValue,
    #[serde(default)]
    pub filter_by_example: bool,
    #[serde(default)]
    pub filter_inverted: bool,
    #[serde(default)]
    pub filter_after_transformation: bool,
    #[serde(default)]
    pub log_params: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl HandlerConfig {
    /// Fills in defaults that depend on other fields.
    pub fn normalize(&mut self) {
        if self.verb.trim().is_empty() {
            self.verb = DEFAULT_VERB.to_string();
        } else {
            self.verb = self.verb.trim().to_ascii_uppercase();
        }
        if self.protocol.trim().is_empty() {
            self.protocol = DEFAULT_PROTOCOL.to_string();
        }
        self.topic = self.topic.trim().to_string();
    }

    pub fn is_topic_handler(&self) -> bool {
        !self.topic.is_empty()
    }

    pub fn named_transformation(&self, name: &str) -> Option<&NamedTransformation> {
        self.named_transformations.get(name)
    }

    /// Match decision and strength for a custom-match handler.
    pub fn matches_expected_values(&self, event: &JDoc, ctx: &EventContext) -> (bool, i32) {
        match &self.match_values {
            Some(expected) => expected_values_match(expected, self.match_by_example, event, ctx),
            None => (false, 0),
        }
    }
}

/// Evaluates a match or filter clause against `event`: either a pattern
/// (by example) or a mapping from path expression to expected value.
pub fn expected_values_match(
    expected: &JsonValue,
    by_example: bool,
    event: &JDoc,
    ctx: &EventContext,
) -> (bool, i32) {
    if by_example {
        return event.matches_pattern(expected);
    }
    let JsonValue::Object(entries) = expected else {
        return (false, 0);
    };

    let mut strength = 0;
    for (path_expression, expected_value) in entries {
        let actual = jtl::evaluate(path_expression, event, ctx);
        match value_matches(&actual, expected_value) {
            Some(wins) => strength += wins,
            None => return (false, 0),
        }
    }
    (true, strength)
}

/// `Some(wins)` on a match. An expected sequence accepts any actual scalar
/// it contains; two sequences match when they intersect; an actual sequence
/// never matches an expected scalar.
fn value_matches(actual: &JsonValue, expected: &JsonValue) -> Option<i32> {
    match (actual, expected) {
        (JsonValue::Array(actual_items), JsonValue::Array(expected_items)) => actual_items
            .iter()
            .any(|item| expected_items.iter().any(|candidate| scalar_equal(item, candidate)))
            .then_some(1),
        (scalar, JsonValue::Array(expected_items)) => expected_items
            .iter()
            .any(|candidate| scalar_equal(scalar, candidate))
            .then_some(1),
        (JsonValue::Array(_), _) => None,
        (actual, expected) => scalar_equal(actual, expected).then_some(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_string_or_sequence_fields() {
        let handler: HandlerConfig = serde_json::from_value(json!({
            "name": "h",
            "endpoint": "http://a",
            "path": ["/1", "/2"],
            "match": { "{{/kind}}": "x" }
        }))
        .expect("handler");
        assert_eq!(handler.endpoint, vec!["http://a"]);
        assert_eq!(handler.path, vec!["/1", "/2"]);
        assert!(handler.active);
        assert!(handler.match_values.is_some());
    }

    #[test]
    fn normalize_applies_verb_and_protocol_defaults() {
        let mut handler = HandlerConfig {
            verb: " put ".to_string(),
            ..HandlerConfig::default()
        };
        handler.normalize();
        assert_eq!(handler.verb, "PUT");
        assert_eq!(handler.protocol, "http");

        let mut handler = HandlerConfig::default();
        handler.normalize();
        assert_eq!(handler.verb, "POST");
    }

    #[test]
    fn sequence_matching_is_asymmetric() {
        assert_eq!(value_matches(&json!("a"), &json!(["a", "b"])), Some(1));
        assert_eq!(value_matches(&json!(["a", "b"]), &json!("a")), None);
        assert_eq!(value_matches(&json!(["c", "b"]), &json!(["a", "b"])), Some(1));
        assert_eq!(value_matches(&json!(["c"]), &json!(["a", "b"])), None);
        assert_eq!(value_matches(&json!(1), &json!("1")), Some(1));
    }
}
