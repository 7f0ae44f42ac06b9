use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Addressing expression used by output rules.
///
/// Grammar:
/// - `'text'` is a literal constant and is never evaluated against a document.
/// - Anything else is an optional `$` root marker followed by dot-separated segments. A segment
///   selects an object field, or an array element when it is a base-10 index.
///
/// Resolution never fails loudly: a missing field, a non-container, or an out-of-range index
/// yields `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PathExpr {
    Literal(String),
    Fields(Vec<String>),
}

/// A successfully resolved path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved<'a> {
    Literal(&'a str),
    Value(&'a Value),
}

impl PathExpr {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
            return Self::Literal(trimmed[1..trimmed.len() - 1].to_string());
        }

        let body = trimmed.strip_prefix('$').unwrap_or(trimmed);
        let segments = body
            .split('.')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        Self::Fields(segments)
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    pub fn resolve<'a>(&'a self, doc: &'a Value) -> Option<Resolved<'a>> {
        match self {
            Self::Literal(text) => Some(Resolved::Literal(text)),
            Self::Fields(segments) => {
                let mut current = doc;
                for segment in segments {
                    current = step(current, segment)?;
                }
                Some(Resolved::Value(current))
            }
        }
    }

    /// Resolves and renders the result as text; `null` counts as unresolved.
    pub fn resolve_text(&self, doc: &Value) -> Option<String> {
        self.resolve(doc).and_then(|resolved| resolved.to_text())
    }
}

fn step<'a>(current: &'a Value, segment: &str) -> Option<&'a Value> {
    match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|idx| items.get(idx)),
        _ => None,
    }
}

impl<'a> Resolved<'a> {
    pub fn to_text(self) -> Option<String> {
        match self {
            Resolved::Literal(text) => Some(text.to_string()),
            Resolved::Value(Value::Null) => None,
            Resolved::Value(Value::String(text)) => Some(text.clone()),
            Resolved::Value(other) => Some(other.to_string()),
        }
    }

    pub fn to_value(self) -> Value {
        match self {
            Resolved::Literal(text) => Value::String(text.to_string()),
            Resolved::Value(value) => value.clone(),
        }
    }

    pub fn is_null(self) -> bool {
        matches!(self, Resolved::Value(Value::Null))
    }
}

impl From<String> for PathExpr {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<&str> for PathExpr {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<PathExpr> for String {
    fn from(path: PathExpr) -> Self {
        path.to_string()
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(text) => write!(f, "'{text}'"),
            Self::Fields(segments) if segments.is_empty() => f.write_str("$"),
            Self::Fields(segments) => write!(f, "$.{}", segments.join(".")),
        }
    }
}

/// Convenience wrapper for one-off lookups.
pub fn resolve_path(path: &str, doc: &Value) -> Option<Value> {
    PathExpr::parse(path).resolve(doc).map(Resolved::to_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn root_marker_is_optional() {
        let doc = json!({"type": "message", "nested": {"text": "hi"}});
        assert_eq!(resolve_path("type", &doc), Some(json!("message")));
        assert_eq!(resolve_path("$.type", &doc), Some(json!("message")));
        assert_eq!(resolve_path("$nested.text", &doc), Some(json!("hi")));
        assert_eq!(resolve_path("$", &doc), Some(doc.clone()));
    }

    #[test]
    fn unresolved_paths_short_circuit() {
        let doc = json!({"a": {"b": 1}, "s": "text"});
        assert_eq!(resolve_path("$.missing.deeper", &doc), None);
        assert_eq!(resolve_path("$.s.length", &doc), None);
        assert_eq!(resolve_path("$.a.b.c", &doc), None);
    }

    #[test]
    fn quoted_paths_are_literals() {
        let doc = json!({"pending": "nope"});
        let path = PathExpr::parse("'pending'");
        assert!(path.is_literal());
        assert_eq!(path.resolve_text(&doc).as_deref(), Some("pending"));
    }

    #[test]
    fn numeric_segments_index_arrays() {
        let doc = json!({"message": {"content": [{"text": "first"}, {"text": "second"}]}});
        assert_eq!(
            PathExpr::parse("$.message.content.1.text")
                .resolve_text(&doc)
                .as_deref(),
            Some("second")
        );
        assert_eq!(resolve_path("$.message.content.9", &doc), None);
    }

    #[test]
    fn resolution_is_repeatable() {
        let doc = json!({"a": [1, {"b": null}]});
        let path = PathExpr::parse("a.1.b");
        let first = path.resolve(&doc);
        let second = path.resolve(&doc);
        assert_eq!(first, second);
        assert!(first.is_some_and(Resolved::is_null));
        assert_eq!(path.resolve_text(&doc), None);
    }

    #[test]
    fn display_round_trips_through_parse() {
        for raw in ["$.a.b", "'done'", "$"] {
            let parsed = PathExpr::parse(raw);
            assert_eq!(PathExpr::parse(&parsed.to_string()), parsed);
        }
    }
}
