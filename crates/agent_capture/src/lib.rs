#![forbid(unsafe_code)]
//! Batch capture of agent trajectories.
//!
//! Each [`CaptureCase`] runs in its own session: the runner creates it, sends every turn in
//! order, normalizes the collected updates into one trajectory, optionally scores the result
//! and destroys the session. Records are appended to a JSONL file as each case finishes.

mod capture;
mod case;
mod error;
mod pool;
mod record;
mod scoring;

pub use capture::{CaptureOptions, CaptureRunner, CaptureSummary};
pub use case::{load_cases, parse_cases, CaptureCase, CaseInput};
pub use error::{CaptureError, ScoreError};
pub use pool::{run_pool, MemoryPressureGauge, PoolOptions, PressureGauge};
pub use record::{CaptureRecord, JsonlSink, Timing};
pub use scoring::{FnScorer, ProcessScorer, ScoreOutcome, ScoreRequest, Scorer};
