// src/dag/mod.rs

//! Job graph and scheduling.
//!
//! - [`graph`] holds the DAG of stages, including the deferred expansion
//!   point used when a checkpoint resolves.
//! - [`node`] defines node kinds, the per-node state machine and the
//!   descriptors handed to executors.
//! - [`scheduler`] decides which nodes are ready, retries with escalated
//!   resources, and propagates failures.
//! - [`scheduler_step`] defines the result type for scheduler steps.

pub mod graph;
pub mod node;
pub mod scheduler;
pub mod scheduler_step;

pub use graph::JobGraph;
pub use node::{NodeKind, NodeState, RunReport, ScheduledStage, StageFailure};
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
