//! Helpers for reading step payloads.
//!
//! Payloads are opaque [`serde_json::Value`]s shaped by each step's
//! [`OutputSchema`](crate::OutputSchema). Gate rules address values inside
//! them with a small path syntax: dot-separated field names, where a trailing
//! `[]` on a segment iterates an array (`"days[].posts[].title"`).

use serde_json::Value;

/// A value found by [`select`], with its concrete location.
#[derive(Debug, Clone, PartialEq)]
pub struct Located<'a> {
    /// Concrete path, e.g. `"days[3].posts[0].title"`.
    pub location: String,
    /// The value at that path.
    pub value: &'a Value,
}

/// Returns every value matching `path` within `root`.
///
/// Missing fields and non-array values under a `[]` segment are skipped.
pub fn select<'a>(root: &'a Value, path: &str) -> Vec<Located<'a>> {
    let mut current = vec![Located {
        location: String::new(),
        value: root,
    }];
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let (field, iterate) = match segment.strip_suffix("[]") {
            Some(field) => (field, true),
            None => (segment, false),
        };
        let mut next = Vec::new();
        for item in current {
            let Some(child) = item.value.get(field) else {
                continue;
            };
            let base = if item.location.is_empty() {
                field.to_string()
            } else {
                format!("{}.{}", item.location, field)
            };
            if iterate {
                if let Some(array) = child.as_array() {
                    next.extend(array.iter().enumerate().map(|(i, v)| Located {
                        location: format!("{base}[{i}]"),
                        value: v,
                    }));
                }
            } else {
                next.push(Located {
                    location: base,
                    value: child,
                });
            }
        }
        current = next;
    }
    current
}

/// Returns every non-empty string matching `path`, with its location.
pub fn select_strings<'a>(root: &'a Value, path: &str) -> Vec<(String, &'a str)> {
    select(root, path)
        .into_iter()
        .filter_map(|l| {
            l.value
                .as_str()
                .filter(|s| !s.trim().is_empty())
                .map(|s| (l.location, s))
        })
        .collect()
}

/// Normalises a title or theme for uniqueness comparison: trimmed,
/// lower-cased, inner whitespace collapsed, trailing punctuation removed.
pub fn normalize_key(text: &str) -> String {
    let collapsed = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_string()
}

/// Returns `true` for `null`, empty strings, empty arrays and empty objects.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Concatenates every string value (and object key) in `value`, lower-cased,
/// separated by single spaces.
pub fn flatten_text(value: &Value) -> String {
    fn walk(value: &Value, out: &mut String) {
        match value {
            Value::String(s) => {
                out.push_str(&s.to_lowercase());
                out.push(' ');
            }
            Value::Array(items) => items.iter().for_each(|v| walk(v, out)),
            Value::Object(map) => {
                for (k, v) in map {
                    out.push_str(&k.to_lowercase());
                    out.push(' ');
                    walk(v, out);
                }
            }
            Value::Number(n) => {
                out.push_str(&n.to_string());
                out.push(' ');
            }
            Value::Null | Value::Bool(_) => {}
        }
    }
    let mut out = String::new();
    walk(value, &mut out);
    out
}

/// Reads `value[field]` as a non-negative integer.
pub fn field_u32(value: &Value, field: &str) -> Option<u32> {
    value
        .get(field)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

/// Truncates `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn select_walks_nested_arrays_with_locations() {
        let payload = json!({
            "days": [
                { "day": 1, "posts": [{ "title": "A" }, { "title": "B" }] },
                { "day": 2, "posts": [] },
                { "day": 3, "posts": [{ "title": "C" }] }
            ]
        });
        let found = select_strings(&payload, "days[].posts[].title");
        let locations: Vec<&str> = found.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(
            locations,
            vec!["days[0].posts[0].title", "days[0].posts[1].title", "days[2].posts[0].title"]
        );
        assert_eq!(found[2].1, "C");
    }

    #[test]
    fn select_skips_missing_fields() {
        let payload = json!({ "weekly_themes": [{ "week": 1 }, { "theme": "Launch" }] });
        let found = select_strings(&payload, "weekly_themes[].theme");
        assert_eq!(found, vec![("weekly_themes[1].theme".to_string(), "Launch")]);
        assert!(select(&payload, "missing[].x").is_empty());
    }

    #[test]
    fn normalize_key_ignores_case_spacing_and_trailing_punctuation() {
        assert_eq!(normalize_key("  Scaling   Content Ops!  "), "scaling content ops");
        assert_eq!(normalize_key("Scaling content ops"), normalize_key("SCALING CONTENT OPS."));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[test]
    fn emptiness_covers_blank_strings() {
        assert!(is_empty_value(&json!("   ")));
        assert!(is_empty_value(&json!([])));
        assert!(!is_empty_value(&json!(0)));
    }
}
