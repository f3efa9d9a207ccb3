//! In-memory JSON document with a flat path index.
//!
//! A [`JDoc`] keeps the structural root alongside a map from canonical path
//! (`/a/b`) to the value found there. Sequences are indexed at their own path
//! but never descended into; array addressing (`name[i]`, `name[k=v]`) always
//! walks the structural root instead.

pub mod path;
pub mod pattern;

use serde::de::DeserializeOwned;
use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};
use std::collections::BTreeMap;
use thiserror::Error;

pub use path::{parse_path, PathError, Segment, Selector};
pub use pattern::{assign_path, choose, crush, deep_equal, matches_pattern, merge_into};

pub type FlatIndex = BTreeMap<String, JsonValue>;

#[derive(Debug, Error)]
pub enum JDocError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct JDoc {
    root: JsonValue,
    flat: FlatIndex,
}

impl Default for JDoc {
    fn default() -> Self {
        Self::from_value(JsonValue::Object(JsonMap::new()))
    }
}

impl PartialEq for JDoc {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl JDoc {
    pub fn from_str(raw: &str) -> Result<Self, JDocError> {
        let value: JsonValue = serde_json::from_str(raw)?;
        Ok(Self::from_value(value))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, JDocError> {
        let value: JsonValue = serde_json::from_slice(raw)?;
        Ok(Self::from_value(value))
    }

    /// Adopts a value, collapsing integral floats to integers.
    pub fn from_value(value: JsonValue) -> Self {
        let root = normalize_numbers(value);
        let flat = build_flat_index(&root);
        Self { root, flat }
    }

    pub fn root(&self) -> &JsonValue {
        &self.root
    }

    pub fn into_root(self) -> JsonValue {
        self.root
    }

    /// Replaces the structural root and rebuilds the flat index.
    pub fn set_root(&mut self, value: JsonValue) {
        self.root = normalize_numbers(value);
        self.flat = build_flat_index(&self.root);
    }

    pub fn flat(&self) -> &FlatIndex {
        &self.flat
    }

    pub fn has_path(&self, path: &str) -> bool {
        self.value(path).is_some()
    }

    /// Value at `path`; plain paths use the flat index, selector paths walk the root.
    pub fn value(&self, path: &str) -> Option<&JsonValue> {
        if path::is_plain_path(path) {
            return self.flat.get(&path::canonical_path(path));
        }
        let segments = path::parse_path(path).ok()?;
        path::select(&self.root, &segments)
    }

    pub fn value_as<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.value(path)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn string_value(&self, path: &str) -> Option<String> {
        self.value(path).map(to_text)
    }

    pub fn i64_value(&self, path: &str) -> Option<i64> {
        self.value(path).and_then(JsonValue::as_i64)
    }

    pub fn bool_value(&self, path: &str) -> Option<bool> {
        self.value(path).and_then(JsonValue::as_bool)
    }

    pub fn equals(&self, other: &JDoc) -> bool {
        deep_equal(&self.root, &other.root)
    }

    pub fn matches_pattern(&self, pattern: &JsonValue) -> (bool, i32) {
        matches_pattern(&self.root, pattern)
    }

    pub fn choose(&self, pattern: &JsonValue) -> JsonValue {
        choose(&self.root, pattern)
    }

    pub fn crush(&self) -> JsonValue {
        crush(&self.root)
    }

    /// Deep-merges this document into `other`, returning the merged document.
    pub fn merge_into(&self, other: &JDoc) -> JDoc {
        let mut merged = other.root.clone();
        merge_into(&mut merged, self.root.clone());
        JDoc::from_value(merged)
    }

    pub fn to_json_string(&self) -> String {
        self.root.to_string()
    }
}

impl std::fmt::Display for JDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.root)
    }
}

/// String form used when values are concatenated or passed as text:
/// strings are raw, null is empty, everything else is compact JSON.
pub fn to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(text) => text.clone(),
        JsonValue::Bool(flag) => flag.to_string(),
        JsonValue::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

/// Collapses every float whose value equals its integer truncation to an integer.
pub fn normalize_numbers(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Number(number) => JsonValue::Number(normalize_number(number)),
        JsonValue::Array(items) => {
            JsonValue::Array(items.into_iter().map(normalize_numbers).collect())
        }
        JsonValue::Object(map) => JsonValue::Object(
            map.into_iter()
                .map(|(key, value)| (key, normalize_numbers(value)))
                .collect(),
        ),
        other => other,
    }
}

fn normalize_number(number: JsonNumber) -> JsonNumber {
    if number.is_i64() || number.is_u64() {
        return number;
    }
    match number.as_f64() {
        Some(float)
            if float.is_finite()
                && float.fract() == 0.0
                && float >= i64::MIN as f64
                && float < i64::MAX as f64 =>
        {
            JsonNumber::from(float as i64)
        }
        _ => number,
    }
}

fn build_flat_index(root: &JsonValue) -> FlatIndex {
    let mut flat = FlatIndex::new();
    flat.insert("/".to_string(), root.clone());
    if let JsonValue::Object(map) = root {
        for (key, value) in map {
            index_value(&mut flat, format!("/{key}"), value);
        }
    }
    flat
}

fn index_value(flat: &mut FlatIndex, path: String, value: &JsonValue) {
    if let JsonValue::Object(map) = value {
        for (key, child) in map {
            index_value(flat, format!("{path}/{key}"), child);
        }
    }
    flat.insert(path, value.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integral_floats_collapse_to_integers() {
        let doc = JDoc::from_str(r#"{"a": 1.0, "b": 1.5, "c": [2.0]}"#).expect("valid json");
        assert!(doc.root()["a"].is_i64());
        assert!(doc.root()["b"].is_f64());
        assert!(doc.root()["c"][0].is_i64());
    }

    #[test]
    fn flat_index_stops_at_sequences() {
        let doc = JDoc::from_value(json!({ "a": { "b": [{ "c": 1 }] } }));
        assert!(doc.flat().contains_key("/a/b"));
        assert!(!doc.flat().keys().any(|key| key.starts_with("/a/b/")));
        assert_eq!(doc.value("/a/b[0]/c"), Some(&json!(1)));
    }

    #[test]
    fn invalid_json_is_rejected() {
        assert!(matches!(
            JDoc::from_str("{not json"),
            Err(JDocError::InvalidJson(_))
        ));
    }
}
