// src/exec/batch.rs

//! Batch runner: one job covering a fixed window of consecutive units.
//!
//! The window is derived from the batch's descriptor and the batch size, so
//! it may reach past the real unit count. The generated script reads N from
//! the checkpoint at run time and guards every unit with `unit <= N`; units
//! past N run nothing. Per-unit results land in `part-<unit>` files, are
//! merged into `output` and then deleted.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::dag::node::BatchJob;
use crate::dag::ScheduledStage;
use crate::engine::StageOutcome;
use crate::exec::artifact::remove_if_exists;
use crate::exec::checkpoint::{BATCHES_DIR, COUNT_FILE};
use crate::exec::process::run_script;
use crate::exec::script::{
    quote, render_command, Bindings, Script, ScriptBuilder, TemplateError, TemplateKind, PARTS_VAR,
    UNITS_TOTAL_VAR,
};
use crate::exec::stamp::{invalidate, is_current, write_stamp, StampSubject, STAMP_FILE};
use crate::exec::{attempt_files, failed_attempt, ExecContext, SCRIPT_FILE};
use crate::plan::{parse_descriptor, ResourceRequest};

/// Merged result of a batch, inside its stage directory.
pub const BATCH_OUTPUT: &str = "output";

const PART_PREFIX: &str = "part-";

/// Name of the per-unit intermediate file.
pub fn part_name(unit: u64) -> String {
    format!("{PART_PREFIX}{unit:04}")
}

/// Paths a batch script works with.
#[derive(Debug, Clone)]
pub struct BatchLayout {
    pub stage_dir: PathBuf,
    pub count_file: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Generate the script for a batch whose window starts at `first`.
pub fn render_batch_script(
    ctx: &ExecContext,
    stage: &str,
    job: &BatchJob,
    first: u64,
    layout: &BatchLayout,
    request: ResourceRequest,
) -> Result<Script, TemplateError> {
    let inputs = [layout.input.clone()];
    let mut b = ScriptBuilder::new(stage, &layout.stage_dir)
        .line(format!(
            "{UNITS_TOTAL_VAR}=$(cat {})",
            quote(&layout.count_file.to_string_lossy())
        ))
        .line(format!("{PARTS_VAR}=''"));

    for unit in job.policy.window(first) {
        let part = part_name(unit);
        let outputs = [layout.stage_dir.join(&part)];
        let bindings = Bindings::new(ctx.params(), &layout.stage_dir, request)
            .inputs(&inputs)
            .outputs(&outputs)
            .unit(unit);
        let line = render_command(ctx.tools(), TemplateKind::Count, &job.count, &bindings)?;
        b = b
            .guard_unit(unit)
            .line(line)
            .line(format!("{PARTS_VAR}=\"${PARTS_VAR} {part}\""))
            .end_guard();
    }

    let outputs = [layout.output.clone()];
    let bindings = Bindings::new(ctx.params(), &layout.stage_dir, request).outputs(&outputs);
    let merge = render_command(ctx.tools(), TemplateKind::Merge, &job.merge, &bindings)?;

    Ok(b.line(merge).line(format!("rm -f ${PARTS_VAR}")).build())
}

/// Run one attempt of a batch job.
pub async fn run_batch(
    ctx: &ExecContext,
    stage: &ScheduledStage,
    job: &BatchJob,
) -> Result<StageOutcome> {
    let dir = ctx.stage_dir(&stage.id);
    fs::create_dir_all(&dir).with_context(|| format!("creating stage dir {:?}", dir))?;

    let checkpoint_dir = ctx.stage_dir(&job.checkpoint);
    let descriptor = checkpoint_dir.join(BATCHES_DIR).join(&job.batch.label);
    let first = match fs::read_to_string(&descriptor)
        .ok()
        .as_deref()
        .and_then(parse_descriptor)
    {
        Some(first) => first,
        None => {
            return Ok(StageOutcome::structural(format!(
                "batch descriptor {} is missing or malformed",
                descriptor.display()
            )));
        }
    };
    if first != job.batch.first {
        return Ok(StageOutcome::structural(format!(
            "descriptor {} starts at unit {first}, planned {}",
            descriptor.display(),
            job.batch.first
        )));
    }

    let layout = BatchLayout {
        stage_dir: dir.clone(),
        count_file: checkpoint_dir.join(COUNT_FILE),
        input: ctx.artifact(&job.input),
        output: dir.join(BATCH_OUTPUT),
    };

    let recipe = match render_batch_script(
        ctx,
        &stage.id,
        job,
        first,
        &layout,
        ResourceRequest::default(),
    ) {
        Ok(script) => script,
        Err(e) => return Ok(StageOutcome::structural(e.to_string())),
    };

    let stamp = dir.join(STAMP_FILE);
    let stamp_inputs = [layout.input.clone(), layout.count_file.clone(), descriptor.clone()];
    let stamp_outputs = [layout.output.clone()];
    let subject = StampSubject {
        recipe: recipe.text(),
        inputs: &stamp_inputs,
        outputs: &stamp_outputs,
    };
    if is_current(&stamp, &subject)? {
        info!(stage = %stage.id, "batch output up to date; skipping");
        return Ok(StageOutcome::Success);
    }

    invalidate(&stamp)?;
    remove_leftover_parts(&dir)?;

    let script = match render_batch_script(ctx, &stage.id, job, first, &layout, stage.request) {
        Ok(script) => script,
        Err(e) => return Ok(StageOutcome::structural(e.to_string())),
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
        warn!(stage = %stage.id, attempt = stage.attempt, ?outcome, log = ?log_path, "batch failed");
        return Ok(failed_attempt(outcome));
    }

    if !layout.output.is_file() {
        return Ok(StageOutcome::structural(format!(
            "merge did not produce {}",
            layout.output.display()
        )));
    }

    write_stamp(&stamp, &subject)?;
    Ok(StageOutcome::Success)
}

/// Delete `part-*` files left behind by an interrupted attempt.
fn remove_leftover_parts(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("listing {:?}", dir))? {
        let path = entry?.path();
        let is_part = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(PART_PREFIX));
        if is_part {
            debug!(path = ?path, "removing leftover part");
            remove_if_exists(&path)?;
        }
    }
    Ok(())
}
