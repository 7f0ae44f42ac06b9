use std::path::Path;

use crate::config::{AdapterConfig, PromptDelivery};

/// A fully resolved agent launch: program, argv, and what (if anything) goes to stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInvocation {
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
    pub(crate) stdin: Option<String>,
    pub(crate) keep_stdin_open: bool,
}

impl AgentInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            keep_stdin_open: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin_text(mut self, text: impl Into<String>) -> Self {
        self.stdin = Some(text.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }

    pub fn stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }
}

/// What a headless launch carries besides the adapter's fixed flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchContext<'a> {
    /// `None` launches a persistent process whose turns are written to stdin later.
    pub prompt: Option<&'a str>,
    pub resume_id: Option<&'a str>,
    pub cwd: Option<&'a Path>,
}

/// Builds the argv for one headless launch.
///
/// Order: fixed command arguments, output-format flag, auto-approve flags, working-directory
/// flag, resume flag, then the prompt (flag or positional) last.
pub fn headless_invocation(config: &AdapterConfig, ctx: LaunchContext<'_>) -> AgentInvocation {
    let mut invocation = AgentInvocation::new(config.program())
        .args(config.command.iter().skip(1).cloned())
        .arg(config.output.flag.clone())
        .arg(config.output.value.clone())
        .args(config.auto_approve.iter().cloned());

    if let (Some(flag), Some(cwd)) = (config.cwd_flag.as_ref(), ctx.cwd) {
        invocation = invocation
            .arg(flag.clone())
            .arg(cwd.to_string_lossy().into_owned());
    }

    if let (Some(resume), Some(id)) = (config.resume.as_ref(), ctx.resume_id) {
        invocation = invocation.arg(resume.flag.clone()).arg(id);
    }

    match (config.prompt.delivery(), ctx.prompt) {
        (PromptDelivery::Flag(flag), Some(prompt)) => invocation.arg(flag).arg(prompt),
        (PromptDelivery::Positional, Some(prompt)) => invocation.arg(prompt),
        (PromptDelivery::Stdin, Some(prompt)) => invocation.stdin_text(prompt),
        (PromptDelivery::Stdin, None) => AgentInvocation {
            keep_stdin_open: true,
            ..invocation
        },
        (_, None) => invocation,
    }
}
