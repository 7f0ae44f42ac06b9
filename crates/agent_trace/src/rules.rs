use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::{PathExpr, Resolved};
use crate::update::{ParsedUpdate, UpdateKind, UpdateSource};

/// Match value that accepts any resolved, non-null value.
pub const MATCH_ANY: &str = "*";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OutputEventRule {
    #[serde(rename = "match")]
    pub matcher: MatchClause,
    pub emit_as: UpdateKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractClause>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchClause {
    pub path: PathExpr,
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractClause {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<PathExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<PathExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PathExpr>,
}

/// Recognizes the record that ends a conversation turn and locates its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResultRule {
    pub match_path: PathExpr,
    pub match_value: Value,
    pub content_path: PathExpr,
}

impl MatchClause {
    pub fn new(path: impl Into<PathExpr>, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &Value) -> bool {
        value_matches(self.path.resolve(record), &self.value)
    }
}

impl ResultRule {
    pub fn matches(&self, record: &Value) -> bool {
        value_matches(self.match_path.resolve(record), &self.match_value)
    }

    /// Content of a result record; `None` when the record is not a result or has no content.
    pub fn content(&self, record: &Value) -> Option<String> {
        if !self.matches(record) {
            return None;
        }
        self.content_path.resolve_text(record)
    }
}

fn value_matches(resolved: Option<Resolved<'_>>, expected: &Value) -> bool {
    let Some(resolved) = resolved else {
        return false;
    };
    if expected.as_str() == Some(MATCH_ANY) {
        return !resolved.is_null();
    }
    match (resolved, expected) {
        (Resolved::Literal(text), Value::String(want)) => text == want,
        (Resolved::Literal(_), _) => false,
        (Resolved::Value(found), want) => found == want,
    }
}

impl OutputEventRule {
    pub fn new(matcher: MatchClause, emit_as: UpdateKind) -> Self {
        Self {
            matcher,
            emit_as,
            extract: None,
        }
    }

    pub fn extract(mut self, extract: ExtractClause) -> Self {
        self.extract = Some(extract);
        self
    }

    fn build_update(&self, record: &Value) -> ParsedUpdate {
        let mut update = ParsedUpdate::new(self.emit_as);
        let Some(extract) = self.extract.as_ref() else {
            return update;
        };

        if let Some(path) = extract.content.as_ref() {
            match path.resolve(record) {
                Some(Resolved::Value(Value::Array(items))) if self.emit_as == UpdateKind::Plan => {
                    update.entries = items.clone();
                }
                // A tool call's content is its input payload.
                Some(Resolved::Value(value)) if self.emit_as == UpdateKind::ToolCall => {
                    if !value.is_null() {
                        update.input = Some(value.clone());
                    }
                }
                Some(Resolved::Literal(text)) if self.emit_as == UpdateKind::ToolCall => {
                    update.input = Some(Value::String(text.to_string()));
                }
                Some(resolved) => update.content = resolved.to_text(),
                None => {}
            }
        }
        update.title = extract.title.as_ref().and_then(|p| p.resolve_text(record));
        update.status = extract.status.as_ref().and_then(|p| p.resolve_text(record));
        update
    }
}

/// Declarative classifier for headless CLI output lines.
///
/// Rules are consulted in declaration order and the first matching rule alone decides the
/// classification of a record.
#[derive(Debug, Clone, Copy)]
pub struct RuleInterpreter<'a> {
    rules: &'a [OutputEventRule],
}

impl<'a> RuleInterpreter<'a> {
    pub fn new(rules: &'a [OutputEventRule]) -> Self {
        Self { rules }
    }

    /// Index of the rule that classifies `record`, if any.
    pub fn matching_rule(&self, record: &Value) -> Option<usize> {
        self.rules
            .iter()
            .position(|rule| rule.matcher.matches(record))
    }
}

impl UpdateSource for RuleInterpreter<'_> {
    fn classify(&self, record: &Value) -> Option<ParsedUpdate> {
        let idx = self.matching_rule(record)?;
        Some(self.rules[idx].build_update(record))
    }
}
