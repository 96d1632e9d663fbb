// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::info;

use crate::dag::{ScheduledStage, Scheduler, SchedulerStep};
use crate::engine::{StageId, StageOutcome};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Submit these stage attempts to the executor backend.
    Dispatch(Vec<ScheduledStage>),
    /// The run is over; the shell should stop.
    RequestExit,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Start the run: dispatch every initially ready stage.
pub fn handle_start(scheduler: &mut Scheduler) -> CoreStep {
    let step = scheduler.step_start();
    into_core_step(scheduler, step)
}

/// Handle a stage completion event.
pub fn handle_stage_completion(
    scheduler: &mut Scheduler,
    stage: StageId,
    attempt: u32,
    outcome: StageOutcome,
) -> CoreStep {
    let step = scheduler.step_completion(&stage, attempt, outcome);
    into_core_step(scheduler, step)
}

/// Handle a shutdown request: dispatch nothing new, wait for in-flight
/// attempts to report back.
pub fn handle_shutdown(scheduler: &mut Scheduler) -> CoreStep {
    info!("shutdown requested; draining in-flight stages");
    let step = scheduler.halt();
    into_core_step(scheduler, step)
}

fn into_core_step(scheduler: &Scheduler, step: SchedulerStep) -> CoreStep {
    let mut commands = Vec::new();

    if !step.newly_scheduled.is_empty() {
        commands.push(CoreCommand::Dispatch(step.newly_scheduled));
    }

    let keep_running = !scheduler.is_finished();
    if !keep_running {
        commands.push(CoreCommand::RequestExit);
    }

    CoreStep {
        commands,
        keep_running,
    }
}
