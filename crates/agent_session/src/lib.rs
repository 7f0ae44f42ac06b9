#![forbid(unsafe_code)]
//! Turn-based sessions with coding agents running as local subprocesses.
//!
//! Two kinds of agent are supported:
//! - headless CLIs described by an [`AdapterConfig`] document, continued either in `stream` mode
//!   (one live process, or per-turn processes chained by a resume id) or in `iterative` mode
//!   (a fresh process per turn with prior turns rendered into the prompt);
//! - agents speaking the native JSON-RPC session protocol on stdio ([`NativeAgentConfig`]).
//!
//! Agent failures never abort the caller: spawn errors, crashes, malformed output and timeouts
//! are collected into the [`TurnResult`] of the turn they happened in.

mod builder;
mod command;
mod config;
mod error;
mod headless;
mod history;
mod manager;
mod native;
mod process;
mod turn;

pub use builder::SessionManagerBuilder;
pub use command::{headless_invocation, AgentInvocation, LaunchContext};
pub use config::{
    AdapterConfig, HistoryTemplate, NativeAgentConfig, OutputConfig, PromptConfig,
    PromptDelivery, ResumeConfig, SessionMode, SUPPORTED_VERSIONS,
};
pub use error::{ConfigError, SessionError, TurnError};
pub use history::{render_turn, render_with_history, HistoryTurn, DEFAULT_TURN_FORMAT};
pub use manager::{AgentBackend, SessionId, SessionManager, SessionState};
pub use native::PROTOCOL_VERSION;
pub use process::ExitInfo;
pub use turn::{TimedUpdate, TurnResult};
