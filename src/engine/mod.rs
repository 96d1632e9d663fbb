// src/engine/mod.rs

//! Orchestration engine for countdag.
//!
//! This module ties together:
//! - the DAG scheduler (ready detection, retries, checkpoint expansion)
//! - the dispatch budget (global CPU / memory in flight)
//! - the main runtime event loop that reacts to stage completions and
//!   shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

/// Canonical stage identifier used throughout the engine.
pub type StageId = String;

/// Why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Non-zero exit, kill, timeout or IO hiccup. Retried with escalated
    /// resources until the retry ceiling.
    Resource { exit_code: Option<i32> },
    /// Missing or malformed output. Never retried.
    Structural(String),
}

/// Outcome of one stage attempt, as reported to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    /// A checkpoint finished and discovered `units` elementary units.
    Resolved { units: u64 },
    Failed(FailureKind),
}

impl StageOutcome {
    pub fn resource_failure(exit_code: Option<i32>) -> Self {
        StageOutcome::Failed(FailureKind::Resource { exit_code })
    }

    pub fn structural(message: impl Into<String>) -> Self {
        StageOutcome::Failed(FailureKind::Structural(message.into()))
    }
}

/// Events flowing into the runtime from executors and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// An attempt of a stage finished.
    StageCompleted {
        stage: StageId,
        attempt: u32,
        outcome: StageOutcome,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C): dispatch nothing new.
    ShutdownRequested,
}

pub mod budget;
pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use budget::DispatchBudget;
pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
