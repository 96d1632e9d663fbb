// src/exec/stage.rs

//! Runner for static (non fan-out) stages.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::dag::node::StageSpec;
use crate::dag::ScheduledStage;
use crate::engine::StageOutcome;
use crate::exec::process::run_script;
use crate::exec::script::{render_command, Bindings, Script, ScriptBuilder, TemplateKind};
use crate::exec::stamp::{invalidate, is_current, write_stamp, StampSubject, STAMP_FILE};
use crate::exec::{attempt_files, failed_attempt, ExecContext, SCRIPT_FILE};
use crate::plan::ResourceRequest;

/// Run one attempt of a static stage.
///
/// The stage is skipped when its stamp is current. A missing input or a
/// declared output the command did not produce is a structural failure; a
/// non-zero exit is a resource failure.
pub async fn run_static(
    ctx: &ExecContext,
    stage: &ScheduledStage,
    spec: &StageSpec,
) -> Result<StageOutcome> {
    let dir = ctx.stage_dir(&stage.id);
    fs::create_dir_all(&dir).with_context(|| format!("creating stage dir {:?}", dir))?;

    let inputs: Vec<PathBuf> = spec.inputs.iter().map(|p| ctx.artifact(p)).collect();
    let outputs: Vec<PathBuf> = spec.outputs.iter().map(|p| ctx.artifact(p)).collect();

    let build = |request: ResourceRequest| -> Result<Script, String> {
        let bindings = Bindings::new(ctx.params(), &dir, request)
            .inputs(&inputs)
            .outputs(&outputs);
        let line = render_command(ctx.tools(), TemplateKind::Stage, &spec.command, &bindings)
            .map_err(|e| e.to_string())?;
        Ok(ScriptBuilder::new(&stage.id, &dir).line(line).build())
    };

    let recipe = match build(ResourceRequest::default()) {
        Ok(script) => script,
        Err(msg) => return Ok(StageOutcome::structural(msg)),
    };

    let stamp = dir.join(STAMP_FILE);
    let subject = StampSubject {
        recipe: recipe.text(),
        inputs: &inputs,
        outputs: &outputs,
    };
    if is_current(&stamp, &subject)? {
        info!(stage = %stage.id, "outputs up to date; skipping");
        return Ok(StageOutcome::Success);
    }

    if let Some(missing) = inputs.iter().find(|p| !p.exists()) {
        return Ok(StageOutcome::structural(format!(
            "input {} does not exist",
            missing.display()
        )));
    }

    invalidate(&stamp)?;
    for out in &outputs {
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating output dir {:?}", parent))?;
        }
    }

    let script = match build(stage.request) {
        Ok(script) => script,
        Err(msg) => return Ok(StageOutcome::structural(msg)),
    };
    let script_path = dir.join(SCRIPT_FILE);
    let log_path = ctx.log_path(&stage.id, stage.attempt);
    let outcome = run_script(
        &script,
        &attempt_files(stage, &script_path, &log_path),
        &stage.request,
    )
    .await?;

    if !outcome.success() {
        warn!(stage = %stage.id, attempt = stage.attempt, ?outcome, log = ?log_path, "stage failed");
        return Ok(failed_attempt(outcome));
    }

    if let Some(missing) = outputs.iter().find(|p| !p.is_file()) {
        return Ok(StageOutcome::structural(format!(
            "declared output {} was not produced",
            missing.display()
        )));
    }

    write_stamp(&stamp, &subject)?;
    Ok(StageOutcome::Success)
}
