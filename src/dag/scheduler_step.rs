// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::node::ScheduledStage;
use crate::engine::StageId;

/// Structured result of a single scheduler "step".
///
/// Useful for tests that want to manually step the DAG and make assertions
/// about what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Stage attempts dispatched as a result of this step.
    pub newly_scheduled: Vec<ScheduledStage>,
    /// Stages newly failed for good or blocked in this step.
    pub newly_failed: Vec<StageId>,
    /// Stages that will be retried with escalated resources.
    pub newly_retrying: Vec<StageId>,
    /// Batch nodes appended by a checkpoint resolving in this step.
    pub expanded: Vec<StageId>,
    /// Whether this step finished the run.
    pub run_just_finished: bool,
}
