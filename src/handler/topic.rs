//! Hierarchical topic matching.
//!
//! Topics are `/`-separated; handlers may use `*` for inner segments. For an
//! event topic the candidate patterns are tried level by level: the full topic
//! (exact, then one wildcard, then two), then each parent topic the same way,
//! and finally the empty catch-all.

const WILDCARD: &str = "*";

/// `/a/b` form with duplicate and trailing separators removed.
pub fn canonical_topic(topic: &str) -> String {
    let segments: Vec<&str> = segments(topic);
    if segments.is_empty() {
        String::new()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn segments(topic: &str) -> Vec<&str> {
    topic
        .trim()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Candidate patterns grouped by ascent level, most specific first.
pub fn candidate_levels(topic: &str) -> Vec<Vec<String>> {
    let segments = segments(topic);
    let mut levels = Vec::with_capacity(segments.len() + 1);
    for length in (1..=segments.len()).rev() {
        levels.push(level_candidates(&segments[..length]));
    }
    levels.push(vec![String::new()]);
    levels
}

fn level_candidates(segments: &[&str]) -> Vec<String> {
    let render = |parts: &[&str]| format!("/{}", parts.join("/"));
    let mut candidates = vec![render(segments)];
    if segments.len() < 3 {
        return candidates;
    }

    let inner: Vec<usize> = (1..segments.len() - 1).collect();
    for &index in &inner {
        let mut parts = segments.to_vec();
        parts[index] = WILDCARD;
        candidates.push(render(&parts));
    }
    for (position, &first) in inner.iter().enumerate() {
        for &second in &inner[position + 1..] {
            let mut parts = segments.to_vec();
            parts[first] = WILDCARD;
            parts[second] = WILDCARD;
            candidates.push(render(&parts));
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalises_separators() {
        assert_eq!(canonical_topic("x//y/"), "/x/y");
        assert_eq!(canonical_topic("  "), "");
    }

    #[test]
    fn wildcards_replace_inner_segments_only() {
        let levels = candidate_levels("/a/b/c/d");
        assert_eq!(
            levels[0],
            vec!["/a/b/c/d", "/a/*/c/d", "/a/b/*/d", "/a/*/*/d"]
        );
        assert_eq!(levels[1], vec!["/a/b/c", "/a/*/c"]);
        assert_eq!(levels[2], vec!["/a/b"]);
        assert_eq!(levels[3], vec!["/a"]);
        assert_eq!(levels[4], vec![""]);
    }

    #[test]
    fn two_segment_topics_have_no_wildcards() {
        assert_eq!(candidate_levels("/x/z")[0], vec!["/x/z"]);
    }
}
