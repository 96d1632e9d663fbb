// src/exec/checkpoint.rs

//! Checkpoint runner: determine how many units a fan-out has.
//!
//! Layout of a checkpoint directory:
//!
//! ```text
//! <work>/<fanout>.checkpoint/
//!   count            total unit count N
//!   batches/<label>  one descriptor per batch, holding its first unit
//!   done             sentinel, written once count and descriptors exist
//!   stamp            digests of the fan-out input, probe recipe and count
//!   probe/           scratch for the probe command, removed after parsing
//! ```
//!
//! While the sentinel exists and the stamp is current the checkpoint is
//! resolved from disk without running the probe again.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::dag::node::{batch_id, CheckpointSpec};
use crate::dag::ScheduledStage;
use crate::engine::StageOutcome;
use crate::exec::artifact::{remove_dir_if_exists, remove_if_exists, write_atomic};
use crate::exec::process::run_script;
use crate::exec::script::{render_command, Bindings, ScriptBuilder, TemplateKind};
use crate::exec::stamp::{invalidate, is_current, write_stamp, StampSubject, STAMP_FILE};
use crate::exec::{attempt_files, ExecContext, SCRIPT_FILE};
use crate::plan::{Batch, BatchPolicy, ResourceRequest};

pub const COUNT_FILE: &str = "count";
pub const BATCHES_DIR: &str = "batches";
pub const SENTINEL_FILE: &str = "done";
pub const SCRATCH_DIR: &str = "probe";

/// Run the checkpoint for one fan-out.
///
/// Every failure here is structural: a probe that fails or prints no count
/// line will not behave differently with more resources. IO errors are
/// reported the same way.
pub async fn run_checkpoint(
    ctx: &ExecContext,
    stage: &ScheduledStage,
    spec: &CheckpointSpec,
) -> Result<StageOutcome> {
    match resolve(ctx, stage, spec).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            warn!(stage = %stage.id, error = %format!("{e:#}"), "checkpoint failed");
            Ok(StageOutcome::structural(format!("{e:#}")))
        }
    }
}

async fn resolve(
    ctx: &ExecContext,
    stage: &ScheduledStage,
    spec: &CheckpointSpec,
) -> Result<StageOutcome> {
    let dir = ctx.stage_dir(&stage.id);
    fs::create_dir_all(&dir).with_context(|| format!("creating checkpoint dir {:?}", dir))?;

    let pattern = match Regex::new(&spec.count_pattern) {
        Ok(re) => re,
        Err(e) => return Ok(StageOutcome::structural(format!("invalid count pattern: {e}"))),
    };

    let input = ctx.artifact(&spec.input);
    let scratch = dir.join(SCRATCH_DIR);
    let inputs = [input.clone()];
    let render = |request: ResourceRequest| {
        let bindings = Bindings::new(ctx.params(), &dir, request)
            .inputs(&inputs)
            .scratch(&scratch);
        render_command(ctx.tools(), TemplateKind::Probe, &spec.probe, &bindings)
    };

    let recipe = match render(ResourceRequest::default()) {
        Ok(line) => format!(
            "{line}\npattern {}\nbatch_size {}\n",
            spec.count_pattern,
            spec.policy.size()
        ),
        Err(e) => return Ok(StageOutcome::structural(e.to_string())),
    };
    let stamp = dir.join(STAMP_FILE);
    let outputs = [dir.join(COUNT_FILE)];
    let subject = StampSubject {
        recipe: &recipe,
        inputs: &inputs,
        outputs: &outputs,
    };

    if dir.join(SENTINEL_FILE).is_file() && is_current(&stamp, &subject)? {
        return Ok(match read_count(&dir) {
            Some(units) => {
                info!(stage = %stage.id, units, "checkpoint already resolved; reusing");
                StageOutcome::Resolved { units }
            }
            None => StageOutcome::structural(format!(
                "sentinel present but {} is missing or malformed",
                dir.join(COUNT_FILE).display()
            )),
        });
    }

    if !input.exists() {
        return Ok(StageOutcome::structural(format!(
            "fan-out input {} does not exist",
            input.display()
        )));
    }

    // The input or recipe changed since the last resolution, or it never
    // finished: probe again from scratch.
    invalidate(&stamp)?;
    remove_if_exists(&dir.join(SENTINEL_FILE))?;
    remove_dir_if_exists(&scratch)?;
    fs::create_dir_all(&scratch).with_context(|| format!("creating scratch {:?}", scratch))?;

    let line = match render(stage.request) {
        Ok(line) => line,
        Err(e) => return Ok(StageOutcome::structural(e.to_string())),
    };
    let script = ScriptBuilder::new(&stage.id, &dir).line(line).build();

    let script_path = dir.join(SCRIPT_FILE);
    let log_path = ctx.log_path(&stage.id, stage.attempt);
    let outcome = run_script(
        &script,
        &attempt_files(stage, &script_path, &log_path),
        &stage.request,
    )
    .await?;

    if !outcome.success() {
        warn!(stage = %stage.id, ?outcome, log = ?log_path, "probe failed");
        return Ok(StageOutcome::structural(format!(
            "probe did not succeed ({outcome:?}); see {}",
            log_path.display()
        )));
    }

    let log = fs::read_to_string(&log_path)
        .with_context(|| format!("reading probe log {:?}", log_path))?;
    let Some(units) = parse_unit_count(&pattern, &log) else {
        return Ok(StageOutcome::structural(format!(
            "probe output has no line matching `{}`",
            spec.count_pattern
        )));
    };

    remove_dir_if_exists(&scratch)?;
    if let Err(msg) = write_checkpoint(&dir, units, &spec.policy)? {
        return Ok(StageOutcome::structural(msg));
    }
    remove_stale_batches(ctx, &spec.fanout, &spec.policy.plan(units))?;
    write_stamp(&stamp, &subject)?;

    info!(stage = %stage.id, units, "checkpoint resolved");
    Ok(StageOutcome::Resolved { units })
}

/// Delete batch directories of this fan-out that the current plan no longer
/// contains, so a smaller count does not leave outputs for the reducer to
/// trip over.
fn remove_stale_batches(ctx: &ExecContext, fanout: &str, plan: &[Batch]) -> Result<()> {
    let prefix = batch_id(fanout, "");
    let planned: Vec<String> = plan.iter().map(|b| batch_id(fanout, &b.label)).collect();

    for entry in fs::read_dir(ctx.work_dir())
        .with_context(|| format!("listing {:?}", ctx.work_dir()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && !planned.contains(&name) && entry.path().is_dir() {
            debug!(dir = %name, "removing batch left over from an earlier count");
            remove_dir_if_exists(&entry.path())?;
        }
    }
    Ok(())
}

/// Extract the unit count from probe output.
///
/// The first capture group of the last matching line wins, so progress
/// lines printed earlier do not shadow the final answer.
pub fn parse_unit_count(pattern: &Regex, text: &str) -> Option<u64> {
    pattern
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().trim().parse::<u64>().ok())
        .last()
}

/// Persist a resolved count: the count file, one descriptor per batch, then
/// the sentinel.
///
/// The inner `Err` carries a structural problem (descriptor count differs
/// from the plan); the outer one is IO.
pub fn write_checkpoint(
    dir: &Path,
    units: u64,
    policy: &BatchPolicy,
) -> Result<std::result::Result<(), String>> {
    write_atomic(&dir.join(COUNT_FILE), format!("{units}\n").as_bytes())?;

    let batches_dir = dir.join(BATCHES_DIR);
    remove_dir_if_exists(&batches_dir)?;
    fs::create_dir_all(&batches_dir)
        .with_context(|| format!("creating descriptor dir {:?}", batches_dir))?;

    let plan = policy.plan(units);
    for batch in &plan {
        write_atomic(
            &batches_dir.join(&batch.label),
            format!("{}\n", batch.first).as_bytes(),
        )?;
    }

    let written = fs::read_dir(&batches_dir)
        .with_context(|| format!("listing descriptors in {:?}", batches_dir))?
        .count();
    if written != plan.len() {
        return Ok(Err(format!(
            "wrote {written} batch descriptor(s) but planned {}",
            plan.len()
        )));
    }

    write_atomic(&dir.join(SENTINEL_FILE), b"")?;
    Ok(Ok(()))
}

/// Read a previously written unit count.
pub fn read_count(dir: &Path) -> Option<u64> {
    fs::read_to_string(dir.join(COUNT_FILE))
        .ok()?
        .trim()
        .parse()
        .ok()
}
