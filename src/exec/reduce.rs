// src/exec/reduce.rs

//! Merge reducer: combine every batch output of a fan-out into one table.
//!
//! Each batch output is a text table of `key<whitespace>count` lines. The
//! reducer takes the union of all keys, sums counts per key, drops keys whose
//! total does not exceed the threshold and writes the result sorted by key.
//! Writing is split over `workers` threads, each producing a temporary
//! fragment; the fragments are concatenated in order and then deleted.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info};

use crate::dag::node::ReduceSpec;
use crate::dag::ScheduledStage;
use crate::engine::StageOutcome;
use crate::exec::batch::BATCH_OUTPUT;
use crate::exec::stamp::{invalidate, is_current, write_stamp, StampSubject, STAMP_FILE};
use crate::exec::ExecContext;

/// Summed counts keyed by item, in key order.
pub type Counts = BTreeMap<String, u64>;

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("{path}:{line}: malformed count line `{text}`")]
    Malformed {
        path: String,
        line: usize,
        text: String,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("reduce worker panicked")]
    WorkerPanicked,
}

impl ReduceError {
    fn io(path: &Path, source: io::Error) -> Self {
        ReduceError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// What a reduction produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReduceSummary {
    /// Distinct keys across all inputs.
    pub distinct: usize,
    /// Keys written to the output (count above threshold).
    pub retained: usize,
}

/// Add every line of the table at `path` into `counts`. Blank lines are
/// ignored.
pub fn accumulate(counts: &mut Counts, path: &Path) -> Result<(), ReduceError> {
    let file = File::open(path).map_err(|e| ReduceError::io(path, e))?;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| ReduceError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let malformed = || ReduceError::Malformed {
            path: path.display().to_string(),
            line: idx + 1,
            text: line.clone(),
        };
        let mut fields = line.split_whitespace();
        let (Some(key), Some(count), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(malformed());
        };
        let count: u64 = count.parse().map_err(|_| malformed())?;
        let slot = counts.entry(key.to_string()).or_insert(0);
        *slot = slot.saturating_add(count);
    }
    Ok(())
}

/// Union of all tables in `paths`, with counts summed per key.
pub fn union_counts(paths: &[PathBuf]) -> Result<Counts, ReduceError> {
    let mut counts = Counts::new();
    for path in paths {
        accumulate(&mut counts, path)?;
    }
    Ok(counts)
}

/// Name of the `index`-th temporary fragment.
pub fn fragment_name(index: usize) -> String {
    format!("fragment-{index:03}")
}

/// Write the keys of `counts` whose total exceeds `threshold` to `output`.
///
/// Keys are split into `workers` contiguous ranges; each range is written to
/// its own fragment in `fragment_dir` by a separate thread. The output is
/// assembled from the fragments in order and replaced atomically.
pub fn write_filtered(
    counts: &Counts,
    threshold: u64,
    workers: usize,
    fragment_dir: &Path,
    output: &Path,
) -> Result<ReduceSummary, ReduceError> {
    fs::create_dir_all(fragment_dir).map_err(|e| ReduceError::io(fragment_dir, e))?;

    let entries: Vec<(&String, &u64)> = counts.iter().collect();
    let chunk_size = entries.len().div_ceil(workers.max(1)).max(1);
    let fragments: Vec<PathBuf> = (0..entries.len().div_ceil(chunk_size))
        .map(|i| fragment_dir.join(fragment_name(i)))
        .collect();

    let written: Vec<Result<usize, ReduceError>> = thread::scope(|s| {
        let handles: Vec<_> = entries
            .chunks(chunk_size)
            .zip(&fragments)
            .map(|(chunk, path)| s.spawn(move || write_fragment(path, chunk, threshold)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(Err(ReduceError::WorkerPanicked)))
            .collect()
    });

    let mut retained = 0;
    for result in written {
        retained += result?;
    }

    concat_fragments(&fragments, output)?;
    for fragment in &fragments {
        fs::remove_file(fragment).map_err(|e| ReduceError::io(fragment, e))?;
    }

    Ok(ReduceSummary {
        distinct: counts.len(),
        retained,
    })
}

fn write_fragment(
    path: &Path,
    entries: &[(&String, &u64)],
    threshold: u64,
) -> Result<usize, ReduceError> {
    let file = File::create(path).map_err(|e| ReduceError::io(path, e))?;
    let mut out = BufWriter::new(file);
    let mut kept = 0;
    for (key, count) in entries {
        if **count > threshold {
            writeln!(out, "{key}\t{count}").map_err(|e| ReduceError::io(path, e))?;
            kept += 1;
        }
    }
    out.flush().map_err(|e| ReduceError::io(path, e))?;
    Ok(kept)
}

fn concat_fragments(fragments: &[PathBuf], output: &Path) -> Result<(), ReduceError> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|e| ReduceError::io(parent, e))?;
    }
    let mut tmp_name = output.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".partial");
    let tmp = output.with_file_name(tmp_name);

    {
        let file = File::create(&tmp).map_err(|e| ReduceError::io(&tmp, e))?;
        let mut out = BufWriter::new(file);
        for fragment in fragments {
            let mut src = File::open(fragment).map_err(|e| ReduceError::io(fragment, e))?;
            io::copy(&mut src, &mut out).map_err(|e| ReduceError::io(&tmp, e))?;
        }
        let file = out
            .into_inner()
            .map_err(|e| ReduceError::io(&tmp, e.into_error()))?;
        file.sync_all().map_err(|e| ReduceError::io(&tmp, e))?;
    }

    fs::rename(&tmp, output).map_err(|e| ReduceError::io(output, e))
}

/// Union `inputs`, filter by `threshold` and write the result to `output`.
pub fn reduce_files(
    inputs: &[PathBuf],
    output: &Path,
    fragment_dir: &Path,
    threshold: u64,
    workers: usize,
) -> Result<ReduceSummary, ReduceError> {
    let counts = union_counts(inputs)?;
    write_filtered(&counts, threshold, workers, fragment_dir, output)
}

/// Run the reduce node of a fan-out.
///
/// Every batch the checkpoint planned must have produced its output, and no
/// other batch directory of the fan-out may hold one; either mismatch is a
/// structural failure.
pub async fn run_reduce(
    ctx: &ExecContext,
    stage: &ScheduledStage,
    spec: &ReduceSpec,
) -> Result<StageOutcome> {
    let dir = ctx.stage_dir(&stage.id);
    fs::create_dir_all(&dir).with_context(|| format!("creating stage dir {:?}", dir))?;

    let inputs: Vec<PathBuf> = spec
        .batches
        .iter()
        .map(|b| ctx.stage_dir(b).join(BATCH_OUTPUT))
        .collect();
    if let Some(missing) = inputs.iter().find(|p| !p.is_file()) {
        return Ok(StageOutcome::structural(format!(
            "batch output {} is missing",
            missing.display()
        )));
    }

    let unexpected = unexpected_batch_outputs(ctx, &spec.fanout, &spec.batches)?;
    if !unexpected.is_empty() {
        return Ok(StageOutcome::structural(format!(
            "found output(s) from batches the checkpoint did not plan: {}",
            unexpected.join(", ")
        )));
    }

    let output = ctx.artifact(&spec.output);
    let recipe = format!(
        "reduce {} threshold={} batches={}",
        spec.fanout,
        spec.threshold,
        spec.batches.join(",")
    );
    let stamp = dir.join(STAMP_FILE);
    let outputs = [output.clone()];
    let subject = StampSubject {
        recipe: &recipe,
        inputs: &inputs,
        outputs: &outputs,
    };
    if is_current(&stamp, &subject)? {
        info!(stage = %stage.id, "reduced output up to date; skipping");
        return Ok(StageOutcome::Success);
    }
    invalidate(&stamp)?;

    let threshold = spec.threshold;
    let workers = spec.workers;
    let job_inputs = inputs.clone();
    let job_output = output.clone();
    let fragment_dir = dir.clone();
    let result = tokio::task::spawn_blocking(move || {
        reduce_files(&job_inputs, &job_output, &fragment_dir, threshold, workers)
    })
    .await
    .context("reduce task panicked")?;

    match result {
        Ok(summary) => {
            info!(
                stage = %stage.id,
                batches = inputs.len(),
                distinct = summary.distinct,
                retained = summary.retained,
                "reduce finished"
            );
        }
        Err(e @ ReduceError::Malformed { .. }) => {
            return Ok(StageOutcome::structural(e.to_string()));
        }
        Err(e) => return Err(e.into()),
    }

    write_stamp(&stamp, &subject)?;
    Ok(StageOutcome::Success)
}

/// Batch directories of `fanout` that hold an output but are not in `planned`.
fn unexpected_batch_outputs(
    ctx: &ExecContext,
    fanout: &str,
    planned: &[String],
) -> Result<Vec<String>> {
    let prefix = format!("{fanout}.batch-");
    let entries = match fs::read_dir(ctx.work_dir()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("listing {:?}", ctx.work_dir())),
    };

    let mut unexpected = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix)
            && !planned.contains(&name)
            && entry.path().join(BATCH_OUTPUT).is_file()
        {
            debug!(dir = %name, "unplanned batch output");
            unexpected.push(name);
        }
    }
    unexpected.sort();
    Ok(unexpected)
}
