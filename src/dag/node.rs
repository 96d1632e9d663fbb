// src/dag/node.rs

//! Node kinds, per-node state machine and dispatch descriptors.

use crate::config::model::{CommandConfig, FanoutConfig, StageConfig};
use crate::engine::StageId;
use crate::plan::{Batch, BatchPolicy, ResourceRequest};
use crate::types::StageClass;

/// Node id of a fan-out's checkpoint.
pub fn checkpoint_id(fanout: &str) -> StageId {
    format!("{fanout}.checkpoint")
}

/// Node id of one batch of a fan-out.
pub fn batch_id(fanout: &str, label: &str) -> StageId {
    format!("{fanout}.batch-{label}")
}

/// Node id of a fan-out's reducer.
pub fn reduce_id(fanout: &str) -> StageId {
    format!("{fanout}.reduce")
}

/// A static stage: one command over declared inputs and outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub command: CommandConfig,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl From<&StageConfig> for StageSpec {
    fn from(cfg: &StageConfig) -> Self {
        Self {
            command: cfg.command(),
            inputs: cfg.inputs.clone(),
            outputs: cfg.outputs.clone(),
        }
    }
}

/// A checkpoint: probes the fan-out input and decides the unit count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointSpec {
    pub fanout: String,
    pub input: String,
    pub probe: CommandConfig,
    pub count_pattern: String,
    pub policy: BatchPolicy,
    /// Commands handed to the batches this checkpoint creates.
    pub count: CommandConfig,
    pub merge: CommandConfig,
}

/// One batch of a fan-out, appended to the graph when its checkpoint resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub fanout: String,
    pub checkpoint: StageId,
    pub batch: Batch,
    pub policy: BatchPolicy,
    pub input: String,
    pub count: CommandConfig,
    pub merge: CommandConfig,
}

/// The reducer over all batch outputs of a fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceSpec {
    pub fanout: String,
    pub output: String,
    pub threshold: u64,
    pub workers: usize,
    /// Batch node ids, filled in when the checkpoint resolves.
    pub batches: Vec<StageId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Stage(StageSpec),
    Checkpoint(CheckpointSpec),
    Batch(BatchJob),
    Reduce(ReduceSpec),
}

impl NodeKind {
    pub fn checkpoint_of(fanout: &str, cfg: &FanoutConfig) -> Self {
        NodeKind::Checkpoint(CheckpointSpec {
            fanout: fanout.to_string(),
            input: cfg.input.clone(),
            probe: cfg.probe.clone(),
            count_pattern: cfg.count_pattern.clone(),
            policy: BatchPolicy::new(cfg.batch_size).unwrap_or_default(),
            count: cfg.count.clone(),
            merge: cfg.merge.clone(),
        })
    }

    pub fn reduce_of(fanout: &str, cfg: &FanoutConfig) -> Self {
        NodeKind::Reduce(ReduceSpec {
            fanout: fanout.to_string(),
            output: cfg.reduce.output.clone(),
            threshold: cfg.reduce.threshold,
            workers: cfg.reduce.workers,
            batches: Vec::new(),
        })
    }
}

/// Per-node state.
///
/// `Pending -> Running(attempt) -> Succeeded | Retrying(attempt + 1) | FatalFailed`,
/// with `Retrying(n) -> Running(n)` once dispatched again. `Blocked` marks
/// nodes that will never run because an upstream node failed for good or
/// the run was halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Running { attempt: u32 },
    Retrying { attempt: u32 },
    Succeeded,
    FatalFailed,
    Blocked,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Succeeded | NodeState::FatalFailed | NodeState::Blocked
        )
    }

    /// The attempt number the node would be dispatched with, if it is waiting.
    pub fn next_attempt(&self) -> Option<u32> {
        match self {
            NodeState::Pending => Some(1),
            NodeState::Retrying { attempt } => Some(*attempt),
            _ => None,
        }
    }
}

/// Static node information plus mutable state.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub id: StageId,
    pub class: StageClass,
    pub kind: NodeKind,
    pub state: NodeState,
    /// Request reserved for the attempt currently running.
    pub in_flight: Option<ResourceRequest>,
}

impl NodeInfo {
    pub fn new(id: StageId, class: StageClass, kind: NodeKind) -> Self {
        Self {
            id,
            class,
            kind,
            state: NodeState::Pending,
            in_flight: None,
        }
    }
}

/// Description of a stage attempt the scheduler wants executed now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledStage {
    pub id: StageId,
    pub class: StageClass,
    pub kind: NodeKind,
    /// 1-based attempt number.
    pub attempt: u32,
    pub request: ResourceRequest,
}

/// A stage that failed for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: StageId,
    pub attempts: u32,
    pub reason: String,
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s): {}",
            self.stage, self.attempts, self.reason
        )
    }
}

/// Final summary of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub succeeded: Vec<StageId>,
    pub failed: Vec<StageFailure>,
    pub blocked: Vec<StageId>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty()
    }
}
