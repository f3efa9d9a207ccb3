//! Selector paths: `/a/b`, `/items[2]/id`, `/items[kind=fruit]/name`.

use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Index(usize),
    FieldEquals { field: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub key: String,
    pub selector: Option<Selector>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path `{0}` must start with `/`")]
    MissingRoot(String),
    #[error("path `{path}` has an unterminated selector in segment `{segment}`")]
    UnterminatedSelector { path: String, segment: String },
    #[error("path `{path}` has an invalid selector `{selector}`")]
    InvalidSelector { path: String, selector: String },
}

/// Splits a selector path into segments. `/` and `.` address the root.
pub fn parse_path(path: &str) -> Result<Vec<Segment>, PathError> {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "/" || trimmed == "." {
        return Ok(Vec::new());
    }
    if !trimmed.starts_with('/') {
        return Err(PathError::MissingRoot(path.to_string()));
    }

    let mut segments = Vec::new();
    for raw in trimmed.split('/').filter(|part| !part.is_empty()) {
        segments.push(parse_segment(path, raw)?);
    }
    Ok(segments)
}

/// True when the path addresses values through the flat index (no array selectors).
pub fn is_plain_path(path: &str) -> bool {
    !path.contains('[')
}

/// Canonical flat-index key for a plain path.
pub fn canonical_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "." {
        return "/".to_string();
    }
    let parts: Vec<&str> = trimmed.split('/').filter(|part| !part.is_empty()).collect();
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

fn parse_segment(path: &str, raw: &str) -> Result<Segment, PathError> {
    let Some(open) = raw.find('[') else {
        return Ok(Segment {
            key: raw.to_string(),
            selector: None,
        });
    };

    if !raw.ends_with(']') {
        return Err(PathError::UnterminatedSelector {
            path: path.to_string(),
            segment: raw.to_string(),
        });
    }

    let key = raw[..open].to_string();
    let inner = &raw[open + 1..raw.len() - 1];
    let selector = if let Some((field, value)) = inner.split_once('=') {
        if field.is_empty() {
            return Err(PathError::InvalidSelector {
                path: path.to_string(),
                selector: inner.to_string(),
            });
        }
        Selector::FieldEquals {
            field: field.trim().to_string(),
            value: value.trim().to_string(),
        }
    } else {
        let index = inner
            .trim()
            .parse::<usize>()
            .map_err(|_| PathError::InvalidSelector {
                path: path.to_string(),
                selector: inner.to_string(),
            })?;
        Selector::Index(index)
    };

    Ok(Segment {
        key,
        selector: Some(selector),
    })
}

/// Walks the structural root following the segments.
pub fn select<'a>(root: &'a JsonValue, segments: &[Segment]) -> Option<&'a JsonValue> {
    let mut current = root;
    for segment in segments {
        if !segment.key.is_empty() {
            current = current.as_object()?.get(&segment.key)?;
        }
        if let Some(selector) = &segment.selector {
            let items = current.as_array()?;
            current = match selector {
                Selector::Index(index) => items.get(*index)?,
                Selector::FieldEquals { field, value } => items.iter().find(|item| {
                    item.get(field)
                        .map(|candidate| super::to_text(candidate) == *value)
                        .unwrap_or(false)
                })?,
            };
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_index_and_field_selectors() {
        let segments = parse_path("/items[1]/tags[kind=a]").expect("valid path");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].selector, Some(Selector::Index(1)));
        assert_eq!(
            segments[1].selector,
            Some(Selector::FieldEquals {
                field: "kind".to_string(),
                value: "a".to_string()
            })
        );
    }

    #[test]
    fn rejects_relative_and_malformed_paths() {
        assert!(matches!(parse_path("a/b"), Err(PathError::MissingRoot(_))));
        assert!(parse_path("/a[1").is_err());
        assert!(parse_path("/a[x]").is_err());
    }

    #[test]
    fn selects_first_element_with_matching_field() {
        let doc = json!({ "items": [{ "k": "x", "v": 1 }, { "k": "y", "v": 2 }, { "k": "y", "v": 3 }] });
        let segments = parse_path("/items[k=y]/v").expect("valid path");
        assert_eq!(select(&doc, &segments), Some(&json!(2)));
    }

    #[test]
    fn canonicalises_slashes() {
        assert_eq!(canonical_path("//a//b/"), "/a/b");
        assert_eq!(canonical_path("."), "/");
    }
}
