// src/dag/scheduler.rs

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use crate::config::model::ConfigFile;
use crate::dag::graph::JobGraph;
use crate::dag::node::{
    batch_id, checkpoint_id, reduce_id, BatchJob, NodeInfo, NodeKind, NodeState, RunReport,
    ScheduledStage, StageFailure, StageSpec,
};
use crate::dag::scheduler_step::SchedulerStep;
use crate::engine::budget::DispatchBudget;
use crate::engine::{FailureKind, StageId, StageOutcome};
use crate::errors::Result;
use crate::plan::ResourcePolicy;
use crate::types::{FailurePolicy, StageClass};

/// Scheduler holds the job graph plus per-node state.
///
/// It is responsible for:
/// - deciding when a node is ready (all dependencies succeeded)
/// - picking the resource request for each attempt and admitting it
///   against the dispatch budget
/// - retrying resource failures with escalated requests
/// - failing (or blocking) dependents when a node fails for good
/// - expanding the graph when a checkpoint resolves
#[derive(Debug)]
pub struct Scheduler {
    graph: JobGraph,
    nodes: BTreeMap<StageId, NodeInfo>,
    policy: ResourcePolicy,
    budget: DispatchBudget,
    max_attempts: u32,
    on_failure: FailurePolicy,
    started: bool,
    halted: bool,
    finished: bool,
    failures: Vec<StageFailure>,
}

impl Scheduler {
    /// Construct a scheduler from a validated [`ConfigFile`].
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let graph = JobGraph::from_config(cfg);
        let mut nodes = BTreeMap::new();

        for (name, stage) in &cfg.stage {
            let kind = NodeKind::Stage(StageSpec::from(stage));
            nodes.insert(name.clone(), NodeInfo::new(name.clone(), stage.class, kind));
        }

        for (name, fanout) in &cfg.fanout {
            let cp = checkpoint_id(name);
            let kind = NodeKind::checkpoint_of(name, fanout);
            nodes.insert(cp.clone(), NodeInfo::new(cp, StageClass::Checkpoint, kind));

            let red = reduce_id(name);
            let kind = NodeKind::reduce_of(name, fanout);
            nodes.insert(red.clone(), NodeInfo::new(red, StageClass::Reduce, kind));
        }

        Self {
            graph,
            nodes,
            policy: ResourcePolicy::from_overrides(&cfg.resources),
            budget: DispatchBudget::unlimited(),
            max_attempts: cfg.config.max_attempts.max(1),
            on_failure: cfg.config.on_failure,
            started: false,
            halted: false,
            finished: false,
            failures: Vec::new(),
        }
    }

    /// Enforce a global in-flight budget at dispatch.
    pub fn with_budget(mut self, budget: DispatchBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_failure_policy(mut self, on_failure: FailurePolicy) -> Self {
        self.on_failure = on_failure;
        self
    }

    pub fn with_resource_policy(mut self, policy: ResourcePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }

    pub fn resource_policy(&self) -> &ResourcePolicy {
        &self.policy
    }

    pub fn budget(&self) -> &DispatchBudget {
        &self.budget
    }

    pub fn node(&self, id: &str) -> Option<&NodeInfo> {
        self.nodes.get(id)
    }

    pub fn state_of(&self, id: &str) -> Option<NodeState> {
        self.nodes.get(id).map(|n| n.state)
    }

    /// All node ids currently in the graph, in sorted order.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    /// `true` once no attempt is in flight and nothing more will be dispatched.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn failures(&self) -> &[StageFailure] {
        &self.failures
    }

    /// Whether all dependencies of `id` have succeeded. `None` if unknown.
    pub fn deps_satisfied(&self, id: &str) -> Option<bool> {
        self.nodes.get(id)?;
        Some(self.deps_succeeded(id))
    }

    /// Start the run (production API).
    pub fn start(&mut self) -> Vec<ScheduledStage> {
        self.step_start().newly_scheduled
    }

    /// Handle the outcome of a stage attempt (production API).
    pub fn handle_completion(
        &mut self,
        id: &str,
        attempt: u32,
        outcome: StageOutcome,
    ) -> Vec<ScheduledStage> {
        self.step_completion(id, attempt, outcome).newly_scheduled
    }

    /// Manual-step variant of [`Scheduler::start`].
    pub fn step_start(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        if self.started {
            warn!("scheduler already started; ignoring");
            return step;
        }
        self.started = true;
        info!(nodes = self.nodes.len(), "scheduler: starting run");

        step.newly_scheduled = self.dispatch_ready();
        step.run_just_finished = self.maybe_finish();
        step
    }

    /// Manual-step variant of [`Scheduler::handle_completion`].
    pub fn step_completion(
        &mut self,
        id: &str,
        attempt: u32,
        outcome: StageOutcome,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let (class, is_checkpoint) = match self.nodes.get(id) {
            Some(info) if info.state == (NodeState::Running { attempt }) => {
                (info.class, matches!(info.kind, NodeKind::Checkpoint(_)))
            }
            Some(info) => {
                warn!(
                    stage = %id,
                    attempt,
                    state = ?info.state,
                    "completion for an attempt that is not running; ignoring"
                );
                return step;
            }
            None => {
                warn!(stage = %id, "completion for unknown stage; ignoring");
                return step;
            }
        };

        if let Some(info) = self.nodes.get_mut(id) {
            if let Some(req) = info.in_flight.take() {
                self.budget.release(&req);
            }
        }

        match outcome {
            StageOutcome::Resolved { units } if is_checkpoint => {
                match self.resolve_checkpoint(id, units) {
                    Ok(expanded) => {
                        self.set_state(id, NodeState::Succeeded);
                        info!(stage = %id, units, batches = expanded.len(), "checkpoint resolved");
                        step.expanded = expanded;
                    }
                    Err(e) => {
                        step.newly_failed =
                            self.fail_node(id, attempt, format!("expansion failed: {e}"));
                    }
                }
            }
            StageOutcome::Success if is_checkpoint => {
                step.newly_failed =
                    self.fail_node(id, attempt, "checkpoint reported no unit count".to_string());
            }
            StageOutcome::Success | StageOutcome::Resolved { .. } => {
                debug!(stage = %id, attempt, "stage succeeded");
                self.set_state(id, NodeState::Succeeded);
            }
            StageOutcome::Failed(FailureKind::Structural(msg)) => {
                error!(stage = %id, attempt, reason = %msg, "structural failure; not retrying");
                step.newly_failed = self.fail_node(id, attempt, msg);
            }
            StageOutcome::Failed(FailureKind::Resource { exit_code }) => {
                let next = attempt + 1;
                if next > self.max_attempts {
                    let reason = format!(
                        "exhausted {} attempt(s) (last exit code {})",
                        self.max_attempts,
                        fmt_exit_code(exit_code)
                    );
                    step.newly_failed = self.fail_node(id, attempt, reason);
                } else if !self.policy.escalates(class) {
                    let reason = format!(
                        "class '{class}' uses fixed resources; not retrying (last exit code {})",
                        fmt_exit_code(exit_code)
                    );
                    step.newly_failed = self.fail_node(id, attempt, reason);
                } else if !self.policy.within_ceiling(class, next) {
                    let reason = format!(
                        "resource ceiling for class '{class}' reached after attempt {attempt} (last exit code {})",
                        fmt_exit_code(exit_code)
                    );
                    step.newly_failed = self.fail_node(id, attempt, reason);
                } else {
                    let request = self.policy.request(class, next);
                    warn!(
                        stage = %id,
                        attempt,
                        next_attempt = next,
                        exit_code = ?exit_code,
                        cpus = request.cpus,
                        memory_gb = request.memory_gb,
                        wall_time_h = request.wall_time_h,
                        "attempt failed; retrying with escalated resources"
                    );
                    self.set_state(id, NodeState::Retrying { attempt: next });
                    step.newly_retrying.push(id.to_string());
                }
            }
        }

        step.newly_scheduled = self.dispatch_ready();
        step.run_just_finished = self.maybe_finish();
        step
    }

    /// Stop dispatching new attempts; in-flight attempts may still complete.
    pub fn halt(&mut self) -> SchedulerStep {
        if !self.halted {
            info!("scheduler halted; no new stages will be dispatched");
        }
        self.halted = true;
        SchedulerStep {
            run_just_finished: self.maybe_finish(),
            ..SchedulerStep::default()
        }
    }

    /// Summary of the run so far.
    pub fn report(&self) -> RunReport {
        let mut report = RunReport {
            failed: self.failures.clone(),
            ..RunReport::default()
        };
        for info in self.nodes.values() {
            match info.state {
                NodeState::Succeeded => report.succeeded.push(info.id.clone()),
                NodeState::Blocked | NodeState::Pending | NodeState::Retrying { .. } => {
                    report.blocked.push(info.id.clone())
                }
                NodeState::Running { .. } | NodeState::FatalFailed => {}
            }
        }
        report
    }

    fn set_state(&mut self, id: &str, state: NodeState) {
        if let Some(info) = self.nodes.get_mut(id) {
            info.state = state;
        }
    }

    fn deps_succeeded(&self, id: &str) -> bool {
        self.graph.dependencies_of(id).iter().all(|dep| {
            self.nodes
                .get(dep)
                .is_some_and(|d| d.state == NodeState::Succeeded)
        })
    }

    /// Collect waiting nodes whose dependencies succeeded, admit them against
    /// the budget, mark them `Running` and return them.
    fn dispatch_ready(&mut self) -> Vec<ScheduledStage> {
        if self.halted || !self.started {
            return Vec::new();
        }

        let candidates: Vec<(StageId, u32)> = self
            .nodes
            .values()
            .filter_map(|info| {
                let attempt = info.state.next_attempt()?;
                self.deps_succeeded(&info.id).then(|| (info.id.clone(), attempt))
            })
            .collect();

        let mut ready = Vec::new();
        for (id, attempt) in candidates {
            let Some(info) = self.nodes.get_mut(&id) else {
                continue;
            };
            let request = self.policy.request(info.class, attempt);
            if !self.budget.try_reserve(&request) {
                continue;
            }

            info!(
                stage = %id,
                attempt,
                cpus = request.cpus,
                memory_gb = request.memory_gb,
                wall_time_h = request.wall_time_h,
                "dispatching stage"
            );
            info.state = NodeState::Running { attempt };
            info.in_flight = Some(request);
            ready.push(ScheduledStage {
                id: id.clone(),
                class: info.class,
                kind: info.kind.clone(),
                attempt,
                request,
            });
        }

        ready
    }

    /// Insert one batch node per planned batch between the checkpoint and its
    /// reducer. This is the only place the graph grows after start.
    fn resolve_checkpoint(&mut self, id: &str, units: u64) -> Result<Vec<StageId>> {
        let spec = match self.nodes.get(id).map(|n| &n.kind) {
            Some(NodeKind::Checkpoint(spec)) => spec.clone(),
            _ => return Ok(Vec::new()),
        };

        let batches = spec.policy.plan(units);
        let ids: Vec<StageId> = batches
            .iter()
            .map(|b| batch_id(&spec.fanout, &b.label))
            .collect();
        let barrier = reduce_id(&spec.fanout);

        self.graph.expand(id, &ids, &barrier)?;

        for (bid, batch) in ids.iter().zip(batches) {
            let job = BatchJob {
                fanout: spec.fanout.clone(),
                checkpoint: id.to_string(),
                batch,
                policy: spec.policy,
                input: spec.input.clone(),
                count: spec.count.clone(),
                merge: spec.merge.clone(),
            };
            self.nodes.insert(
                bid.clone(),
                NodeInfo::new(bid.clone(), StageClass::Batch, NodeKind::Batch(job)),
            );
        }

        if let Some(NodeKind::Reduce(reduce)) = self.nodes.get_mut(&barrier).map(|n| &mut n.kind) {
            reduce.batches = ids.clone();
        }

        Ok(ids)
    }

    /// Mark `id` as failed for good and block everything downstream of it.
    ///
    /// Returns the failed node followed by the newly blocked dependents.
    fn fail_node(&mut self, id: &str, attempts: u32, reason: String) -> Vec<StageId> {
        error!(stage = %id, attempts, reason = %reason, "stage failed permanently");
        self.set_state(id, NodeState::FatalFailed);
        self.failures.push(StageFailure {
            stage: id.to_string(),
            attempts,
            reason,
        });

        let mut newly_failed = vec![id.to_string()];
        let mut stack: Vec<StageId> = self.graph.dependents_of(id).to_vec();
        while let Some(name) = stack.pop() {
            if let Some(info) = self.nodes.get_mut(&name) {
                if info.state.next_attempt().is_some() {
                    debug!(stage = %name, upstream = %id, "blocking dependent of failed stage");
                    info.state = NodeState::Blocked;
                    newly_failed.push(name.clone());
                    stack.extend(self.graph.dependents_of(&name).iter().cloned());
                }
            }
        }

        if self.on_failure == FailurePolicy::Drain {
            self.halted = true;
        }
        newly_failed
    }

    /// Detect the end of the run: nothing in flight and nothing left that
    /// may still be dispatched. Leftover waiting nodes of a halted run become
    /// `Blocked`.
    fn maybe_finish(&mut self) -> bool {
        if self.finished || !self.started {
            return false;
        }

        let running = self
            .nodes
            .values()
            .any(|n| matches!(n.state, NodeState::Running { .. }));
        let waiting = self.nodes.values().any(|n| n.state.next_attempt().is_some());

        if running || (waiting && !self.halted) {
            return false;
        }

        for info in self.nodes.values_mut() {
            if info.state.next_attempt().is_some() {
                info.state = NodeState::Blocked;
            }
        }

        self.finished = true;
        info!(
            failed = self.failures.len(),
            "scheduler: no stages in flight or pending; run finished"
        );
        true
    }
}

fn fmt_exit_code(code: Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}
