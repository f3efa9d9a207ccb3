use super::path::Segment;
use super::to_text;
use serde_json::{Map as JsonMap, Value as JsonValue};

const WILDCARD: &str = "*";
const ALTERNATIVE_SEPARATOR: &str = "||";

/// Deep equality: mappings unordered, sequences ordered, integers and floats
/// with the same numeric value compare equal.
pub fn deep_equal(lhs: &JsonValue, rhs: &JsonValue) -> bool {
    match (lhs, rhs) {
        (JsonValue::Number(a), JsonValue::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => a == b,
            },
        },
        (JsonValue::Array(a), JsonValue::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| deep_equal(x, y))
        }
        (JsonValue::Object(a), JsonValue::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, value)| b.get(key).is_some_and(|other| deep_equal(value, other)))
        }
        _ => lhs == rhs,
    }
}

/// Equality between two scalars that also accepts matching string forms, so the
/// pattern `"1"` matches the number `1`.
pub fn scalar_equal(doc: &JsonValue, pattern: &JsonValue) -> bool {
    if deep_equal(doc, pattern) {
        return true;
    }
    match (doc, pattern) {
        (JsonValue::String(text), other) | (other, JsonValue::String(text))
            if !other.is_array() && !other.is_object() && !other.is_null() =>
        {
            to_text(other) == *text
        }
        _ => false,
    }
}

/// Partial-document match. Returns whether `doc` satisfies `pattern` and the
/// number of scalar equality wins used for ranking.
pub fn matches_pattern(doc: &JsonValue, pattern: &JsonValue) -> (bool, i32) {
    let mut strength = 0;
    let matched = match_value(doc, pattern, &mut strength);
    (matched, if matched { strength } else { 0 })
}

fn match_value(doc: &JsonValue, pattern: &JsonValue, strength: &mut i32) -> bool {
    match pattern {
        JsonValue::Object(expected) => {
            let Some(actual) = doc.as_object() else {
                return false;
            };
            expected.iter().all(|(key, expected_value)| {
                actual
                    .get(key)
                    .is_some_and(|actual_value| match_value(actual_value, expected_value, strength))
            })
        }
        JsonValue::Array(expected) => {
            let Some(actual) = doc.as_array() else {
                return false;
            };
            expected.iter().all(|expected_item| {
                actual.iter().any(|actual_item| {
                    let mut local = 0;
                    if match_value(actual_item, expected_item, &mut local) {
                        *strength += local;
                        true
                    } else {
                        false
                    }
                })
            })
        }
        scalar => match_scalar(doc, scalar, strength),
    }
}

fn match_scalar(doc: &JsonValue, pattern: &JsonValue, strength: &mut i32) -> bool {
    if doc.is_array() || doc.is_object() {
        return false;
    }
    if scalar_equal(doc, pattern) {
        *strength += 1;
        return true;
    }
    let Some(text) = pattern.as_str() else {
        return false;
    };
    if text == WILDCARD {
        return true;
    }
    if text.contains(ALTERNATIVE_SEPARATOR) {
        for alternative in text.split(ALTERNATIVE_SEPARATOR) {
            let alternative = alternative.trim();
            if alternative == WILDCARD {
                return true;
            }
            if scalar_equal(doc, &JsonValue::String(alternative.to_string())) {
                *strength += 1;
                return true;
            }
        }
    }
    false
}

/// Elements of a sequence (or values of a mapping) matching `pattern`; a scalar
/// input is returned when it matches, otherwise null.
pub fn choose(doc: &JsonValue, pattern: &JsonValue) -> JsonValue {
    match doc {
        JsonValue::Array(items) => JsonValue::Array(
            items
                .iter()
                .filter(|item| matches_pattern(item, pattern).0)
                .cloned()
                .collect(),
        ),
        JsonValue::Object(map) => JsonValue::Array(
            map.values()
                .filter(|item| matches_pattern(item, pattern).0)
                .cloned()
                .collect(),
        ),
        scalar => {
            if matches_pattern(scalar, pattern).0 {
                scalar.clone()
            } else {
                JsonValue::Null
            }
        }
    }
}

/// Flattens nested sequences into one sequence; mappings stay atomic.
pub fn crush(doc: &JsonValue) -> JsonValue {
    fn walk(value: &JsonValue, out: &mut Vec<JsonValue>) {
        match value {
            JsonValue::Array(items) => items.iter().for_each(|item| walk(item, out)),
            other => out.push(other.clone()),
        }
    }

    let mut out = Vec::new();
    walk(doc, &mut out);
    JsonValue::Array(out)
}

/// Deep-merges `src` into `dst`: mappings merge key by key, sequences
/// concatenate, anything else is replaced.
pub fn merge_into(dst: &mut JsonValue, src: JsonValue) {
    match (dst, src) {
        (JsonValue::Object(target), JsonValue::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (JsonValue::Array(target), JsonValue::Array(source)) => target.extend(source),
        (slot, value) => *slot = value,
    }
}

/// Assigns `value` at the plain path, creating intermediate mappings and
/// merging into whatever already lives there.
pub fn assign_path(target: &mut JsonValue, segments: &[Segment], value: JsonValue) {
    let Some((last, parents)) = segments.split_last() else {
        merge_into(target, value);
        return;
    };

    let mut cursor = target;
    for segment in parents {
        let map = ensure_object(cursor);
        cursor = map
            .entry(segment.key.clone())
            .or_insert_with(|| JsonValue::Object(JsonMap::new()));
    }

    let map = ensure_object(cursor);
    match map.get_mut(&last.key) {
        Some(existing) => merge_into(existing, value),
        None => {
            map.insert(last.key.clone(), value);
        }
    }
}

fn ensure_object(value: &mut JsonValue) -> &mut JsonMap<String, JsonValue> {
    if !value.is_object() {
        *value = JsonValue::Object(JsonMap::new());
    }
    match value {
        JsonValue::Object(map) => map,
        _ => unreachable!("value ensured to be object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jdoc::path::parse_path;
    use serde_json::json;

    #[test]
    fn wildcard_and_alternatives() {
        let doc = json!({ "kind": "fruit", "n": 3 });
        assert_eq!(matches_pattern(&doc, &json!({ "kind": "*" })), (true, 0));
        assert_eq!(
            matches_pattern(&doc, &json!({ "kind": "veg||fruit" })),
            (true, 1)
        );
        assert!(!matches_pattern(&doc, &json!({ "kind": "veg||nut" })).0);
        assert_eq!(matches_pattern(&doc, &json!({ "n": "3" })), (true, 1));
    }

    #[test]
    fn sequences_match_order_independently() {
        let doc = json!({ "tags": ["a", "b", "c"] });
        assert_eq!(matches_pattern(&doc, &json!({ "tags": ["c", "a"] })), (true, 2));
        assert!(!matches_pattern(&doc, &json!({ "tags": ["d"] })).0);
    }

    #[test]
    fn wildcard_does_not_match_structures() {
        let doc = json!({ "nested": { "a": 1 } });
        assert!(!matches_pattern(&doc, &json!({ "nested": "*" })).0);
    }

    #[test]
    fn assigning_merges_mappings_and_concatenates_sequences() {
        let mut target = json!({ "a": { "x": 1 }, "list": [1] });
        assign_path(&mut target, &parse_path("/a").expect("path"), json!({ "y": 2 }));
        assign_path(&mut target, &parse_path("/list").expect("path"), json!([2]));
        assign_path(&mut target, &parse_path("/b/c").expect("path"), json!("new"));
        assert_eq!(
            target,
            json!({ "a": { "x": 1, "y": 2 }, "list": [1, 2], "b": { "c": "new" } })
        );
    }

    #[test]
    fn crush_flattens_nested_sequences() {
        let doc = json!([1, [2, [3, { "a": [4] }]]]);
        assert_eq!(crush(&doc), json!([1, 2, 3, { "a": [4] }]));
    }
}
