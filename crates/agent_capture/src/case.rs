use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CaptureError;

/// A prompt, or the ordered turns of a multi-turn conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CaseInput {
    Single(String),
    Turns(Vec<String>),
}

impl CaseInput {
    pub fn turns(&self) -> Vec<&str> {
        match self {
            CaseInput::Single(prompt) => vec![prompt.as_str()],
            CaseInput::Turns(turns) => turns.iter().map(String::as_str).collect(),
        }
    }
}

/// One line of a case file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureCase {
    pub id: String,
    pub input: CaseInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl CaptureCase {
    pub fn new(id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            input: CaseInput::Single(input.into()),
            expected: None,
            hint: None,
            metadata: None,
        }
    }

    pub fn conversation(id: impl Into<String>, turns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            input: CaseInput::Turns(turns.into_iter().map(Into::into).collect()),
            ..Self::new(id, String::new())
        }
    }

    pub fn expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Parses JSONL case text. Blank lines are skipped; every other line must be a valid case.
pub fn parse_cases(text: &str) -> Result<Vec<CaptureCase>, CaptureError> {
    let mut cases = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line_number = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let case: CaptureCase =
            serde_json::from_str(line).map_err(|err| CaptureError::InvalidCase {
                line_number,
                message: err.to_string(),
            })?;
        if case.id.trim().is_empty() {
            return Err(CaptureError::InvalidCase {
                line_number,
                message: "id must not be empty".to_string(),
            });
        }
        if matches!(&case.input, CaseInput::Turns(turns) if turns.is_empty()) {
            return Err(CaptureError::InvalidCase {
                line_number,
                message: "input must contain at least one turn".to_string(),
            });
        }
        cases.push(case);
    }
    Ok(cases)
}

pub async fn load_cases(path: impl AsRef<Path>) -> Result<Vec<CaptureCase>, CaptureError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CaptureError::ReadCases {
            path: path.to_path_buf(),
            source,
        })?;
    parse_cases(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_and_multi_turn_cases() {
        let text = r#"{"id":"a","input":"2+2?","expected":"4"}

{"id":"b","input":["hi","and again"],"hint":"be brief","metadata":{"tier":1}}
"#;
        let cases = parse_cases(text).expect("cases");
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].input.turns(), vec!["2+2?"]);
        assert_eq!(cases[0].expected.as_deref(), Some("4"));
        assert_eq!(cases[1].input.turns(), vec!["hi", "and again"]);
        assert_eq!(cases[1].metadata, Some(serde_json::json!({"tier": 1})));
    }

    #[test]
    fn reports_the_offending_line() {
        let text = "{\"id\":\"a\",\"input\":\"x\"}\n{\"id\":\"b\"}\n";
        assert!(matches!(
            parse_cases(text),
            Err(CaptureError::InvalidCase { line_number: 2, .. })
        ));

        let empty_turns = "{\"id\":\"c\",\"input\":[]}";
        assert!(matches!(
            parse_cases(empty_turns),
            Err(CaptureError::InvalidCase { line_number: 1, .. })
        ));
    }

    #[tokio::test]
    async fn loads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cases.jsonl");
        std::fs::write(&path, "{\"id\":\"a\",\"input\":\"x\"}\n").expect("write");
        assert_eq!(load_cases(&path).await.expect("load").len(), 1);
        assert!(matches!(
            load_cases(dir.path().join("missing.jsonl")).await,
            Err(CaptureError::ReadCases { .. })
        ));
    }
}
