#![forbid(unsafe_code)]
//! Normalization of coding-agent output into one canonical, ordered trajectory.
//!
//! This crate is pure data plumbing; it spawns nothing. It provides:
//! - Path expressions and declarative output rules for headless CLI JSON lines.
//! - A fixed mapping for native session-protocol `session/update` notifications.
//! - Tool-call correlation and the trajectory builder that turns classified updates into steps.
//! - A bounded-memory, line-oriented JSON ingestion loop (sync + optional tokio).

mod config;
mod correlator;
mod error;
mod ingest;
mod native;
mod normalizer;
mod path;
mod reader;
mod rules;
mod trajectory;
mod update;

pub use config::IngestLimits;
pub use correlator::{Correlation, ToolCallCorrelator};
pub use error::{LineRecord, LineRecordError};
pub use ingest::LineIngestor;
pub use native::NativeUpdateMapper;
pub use normalizer::{normalize_records, TrajectoryBuilder};
pub use path::{resolve_path, PathExpr, Resolved};
pub use rules::{
    ExtractClause, MatchClause, OutputEventRule, ResultRule, RuleInterpreter, MATCH_ANY,
};
pub use trajectory::{
    classify_richness, has_tool_errors, message_output, NormalizedTrajectory, Richness,
    TrajectoryStep, STATUS_COMPLETED, STATUS_FAILED, STATUS_PENDING,
};
pub use update::{ParsedUpdate, UpdateKind, UpdateSource};

#[cfg(feature = "tokio")]
pub use ingest::AsyncLineIngestor;
