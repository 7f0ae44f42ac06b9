use std::{path::Path, time::Duration};

use agent_trace::{OutputEventRule, PathExpr, ResultRule};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

pub const SUPPORTED_VERSIONS: [u8; 2] = [1, 2];

/// How a headless agent continues a conversation across turns.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// One live process per conversation (or per-turn processes chained by a resume id).
    Stream,
    /// A fresh process per turn with prior turns rendered into the prompt.
    Iterative,
}

/// Declarative description of a headless agent CLI.
///
/// Loaded once per run and treated as read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AdapterConfig {
    pub version: u8,
    pub name: String,
    /// Program followed by its fixed arguments.
    pub command: Vec<String>,
    pub session_mode: SessionMode,
    pub prompt: PromptConfig,
    pub output: OutputConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_approve: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<ResumeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd_flag: Option<String>,
    pub output_events: Vec<OutputEventRule>,
    pub result: ResultRule,
    /// Per-turn timeout in milliseconds (version 2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_template: Option<HistoryTemplate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(default)]
    pub stdin: bool,
}

/// Resolved prompt delivery mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDelivery<'a> {
    Flag(&'a str),
    Positional,
    Stdin,
}

impl PromptConfig {
    pub fn delivery(&self) -> PromptDelivery<'_> {
        match (self.flag.as_deref(), self.stdin) {
            (_, true) => PromptDelivery::Stdin,
            (Some(flag), false) => PromptDelivery::Flag(flag),
            (None, false) => PromptDelivery::Positional,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub flag: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResumeConfig {
    pub flag: String,
    pub session_id_path: PathExpr,
}

/// Rendering of prior turns for iterative sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryTemplate {
    /// A turn format such as `"User: {{input}}\nAssistant: {{output}}"`.
    Flat(String),
    /// Version 2 only.
    #[serde(rename_all = "camelCase")]
    Structured {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        system_prefix: Option<String>,
        turn_format: String,
    },
}

impl AdapterConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_VERSIONS.contains(&self.version) {
            return Err(ConfigError::UnsupportedVersion(self.version));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".to_string()));
        }
        if self.command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(ConfigError::Invalid("command must name a program".to_string()));
        }
        if self.prompt.flag.is_some() && self.prompt.stdin {
            return Err(ConfigError::Invalid(
                "prompt.flag and prompt.stdin are mutually exclusive".to_string(),
            ));
        }
        if matches!(self.prompt.flag.as_deref(), Some(flag) if flag.trim().is_empty()) {
            return Err(ConfigError::Invalid("prompt.flag must not be empty".to_string()));
        }
        if self.version < 2 {
            if self.timeout.is_some() {
                return Err(ConfigError::Invalid(
                    "timeout requires config version 2".to_string(),
                ));
            }
            if matches!(self.history_template, Some(HistoryTemplate::Structured { .. })) {
                return Err(ConfigError::Invalid(
                    "structured historyTemplate requires config version 2".to_string(),
                ));
            }
        }
        if self.timeout == Some(0) {
            return Err(ConfigError::Invalid("timeout must be positive".to_string()));
        }
        Ok(())
    }

    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    /// Stream sessions keep one process alive only when turns can be written to its stdin and no
    /// resume id needs to be threaded through argv.
    pub fn uses_persistent_process(&self) -> bool {
        self.session_mode == SessionMode::Stream
            && self.prompt.delivery() == PromptDelivery::Stdin
            && self.resume.is_none()
    }
}

/// Launch description for an agent that speaks the native JSON-RPC session protocol on stdio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NativeAgentConfig {
    pub name: String,
    pub command: Vec<String>,
    /// Per-turn timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl NativeAgentConfig {
    pub fn new(name: impl Into<String>, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            command: command.into_iter().map(Into::into).collect(),
            timeout: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(ConfigError::Invalid("command must name a program".to_string()));
        }
        if self.timeout == Some(0) {
            return Err(ConfigError::Invalid("timeout must be positive".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }
}
