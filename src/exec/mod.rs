// src/exec/mod.rs

//! Stage execution layer.
//!
//! Every stage attempt runs as a generated shell script under the stage's
//! own working directory, with output captured in a per-attempt log file.
//!
//! - [`backend`] provides the `ExecutorBackend` trait ("submit with a
//!   resource request") and the local process backend.
//! - [`script`] generates scripts from command templates.
//! - [`process`] runs a script with log capture and wall-time enforcement.
//! - [`stamp`] decides whether a stage's outputs are already up to date.
//! - [`stage`], [`checkpoint`], [`batch`] and [`reduce`] run each node kind.

pub mod artifact;
pub mod backend;
pub mod batch;
pub mod checkpoint;
pub mod process;
pub mod reduce;
pub mod script;
pub mod stage;
pub mod stamp;

use std::path::{Path, PathBuf};

use tracing::error;

use crate::config::model::{ConfigFile, Params};
use crate::dag::{NodeKind, ScheduledStage};
use crate::engine::StageOutcome;
use crate::exec::process::{AttemptFiles, ProcessOutcome};
use crate::exec::script::ToolPrefix;

pub use backend::{ExecutorBackend, LocalExecutorBackend};

/// File name of the generated script inside a stage directory.
pub const SCRIPT_FILE: &str = "run.sh";

/// Everything a runner needs besides the stage itself.
#[derive(Debug, Clone)]
pub struct ExecContext {
    work_dir: PathBuf,
    tools: ToolPrefix,
    params: Params,
}

impl ExecContext {
    pub fn new(work_dir: impl Into<PathBuf>, tools: ToolPrefix, params: Params) -> Self {
        Self {
            work_dir: work_dir.into(),
            tools,
            params,
        }
    }

    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self::new(
            &cfg.config.work_dir,
            ToolPrefix::from_install_root(&cfg.config.install_root),
            cfg.params.clone(),
        )
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn tools(&self) -> &ToolPrefix {
        &self.tools
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Working directory owned by a stage.
    pub fn stage_dir(&self, stage: &str) -> PathBuf {
        self.work_dir.join(stage)
    }

    /// Resolve an artifact path: relative paths live under the work directory.
    pub fn artifact(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.work_dir.join(p)
        }
    }

    pub fn log_path(&self, stage: &str, attempt: u32) -> PathBuf {
        self.stage_dir(stage).join(format!("attempt-{attempt}.log"))
    }
}

/// Run one stage attempt and classify the result.
///
/// Unexpected errors (IO, spawn failures) count as resource failures, so
/// they go through the normal retry path.
pub async fn run_stage(ctx: &ExecContext, stage: &ScheduledStage) -> StageOutcome {
    let result = match &stage.kind {
        NodeKind::Stage(spec) => stage::run_static(ctx, stage, spec).await,
        NodeKind::Checkpoint(spec) => checkpoint::run_checkpoint(ctx, stage, spec).await,
        NodeKind::Batch(job) => batch::run_batch(ctx, stage, job).await,
        NodeKind::Reduce(spec) => reduce::run_reduce(ctx, stage, spec).await,
    };

    match result {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(
                stage = %stage.id,
                attempt = stage.attempt,
                error = %format!("{err:#}"),
                "stage execution error"
            );
            StageOutcome::resource_failure(None)
        }
    }
}

/// Map a finished process to the outcome of a failed attempt.
pub(crate) fn failed_attempt(outcome: ProcessOutcome) -> StageOutcome {
    StageOutcome::resource_failure(outcome.exit_code())
}

pub(crate) fn attempt_files<'a>(
    stage: &'a ScheduledStage,
    script_path: &'a Path,
    log_path: &'a Path,
) -> AttemptFiles<'a> {
    AttemptFiles {
        stage: &stage.id,
        attempt: stage.attempt,
        script_path,
        log_path,
    }
}
