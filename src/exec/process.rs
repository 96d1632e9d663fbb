// src/exec/process.rs

//! Running a generated stage script as a child process.

use std::fs;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::exec::script::Script;
use crate::plan::ResourceRequest;

/// How a script process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exited with this code.
    Exited(i32),
    /// Killed by a signal (no exit code).
    Signalled,
    /// Killed because it exceeded its wall-time request.
    TimedOut,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ProcessOutcome::Exited(0))
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessOutcome::Exited(code) => Some(*code),
            _ => None,
        }
    }
}

/// Paths of one attempt's script and log.
#[derive(Debug, Clone)]
pub struct AttemptFiles<'a> {
    pub stage: &'a str,
    pub attempt: u32,
    pub script_path: &'a Path,
    pub log_path: &'a Path,
}

/// The process group of a running script.
///
/// The script leads its own group, so every tool it starts can be signalled
/// at once. Dropping a group that was not released kills it; that covers
/// timeouts as well as an attempt future dropped on shutdown.
struct ProcessGroup<'a> {
    pgid: Option<Pid>,
    stage: &'a str,
}

impl<'a> ProcessGroup<'a> {
    fn new(leader: Option<u32>, stage: &'a str) -> Self {
        Self {
            pgid: leader.and_then(|pid| i32::try_from(pid).ok()).map(Pid::from_raw),
            stage,
        }
    }

    /// The script exited on its own; leave the group alone.
    fn release(&mut self) {
        self.pgid = None;
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => debug!(stage = %self.stage, pgid = pgid.as_raw(), "killed process group"),
            Err(Errno::ESRCH) => {}
            Err(e) => warn!(stage = %self.stage, error = %e, "failed to kill process group"),
        }
    }
}

impl Drop for ProcessGroup<'_> {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Write `script`, then run it with `sh`, sending stdout and stderr to the
/// attempt's log file. The script and everything it started are killed once
/// `request.wall_time()` elapses.
pub async fn run_script(
    script: &Script,
    files: &AttemptFiles<'_>,
    request: &ResourceRequest,
) -> Result<ProcessOutcome> {
    fs::write(files.script_path, script.text())
        .with_context(|| format!("writing script {:?}", files.script_path))?;

    let log = fs::File::create(files.log_path)
        .with_context(|| format!("creating log {:?}", files.log_path))?;
    let log_err = log
        .try_clone()
        .with_context(|| format!("cloning log handle {:?}", files.log_path))?;

    let mut cmd = Command::new("sh");
    cmd.arg(files.script_path)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .env("COUNTDAG_STAGE", files.stage)
        .env("COUNTDAG_ATTEMPT", files.attempt.to_string())
        .env("COUNTDAG_CPUS", request.cpus.to_string())
        .env("COUNTDAG_MEMORY_GB", request.memory_gb.to_string())
        .process_group(0)
        .kill_on_drop(true);

    info!(
        stage = %files.stage,
        attempt = files.attempt,
        script = ?files.script_path,
        log = ?files.log_path,
        "starting stage script"
    );

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning script for stage '{}'", files.stage))?;
    let mut group = ProcessGroup::new(child.id(), files.stage);

    let outcome = match tokio::time::timeout(request.wall_time(), child.wait()).await {
        Ok(status) => {
            group.release();
            let status = status
                .with_context(|| format!("waiting for script of stage '{}'", files.stage))?;
            match status.code() {
                Some(code) => ProcessOutcome::Exited(code),
                None => ProcessOutcome::Signalled,
            }
        }
        Err(_) => {
            warn!(
                stage = %files.stage,
                attempt = files.attempt,
                wall_time_h = request.wall_time_h,
                "wall time exceeded; killing stage process group"
            );
            group.kill();
            if let Err(e) = child.wait().await {
                warn!(stage = %files.stage, error = %e, "failed to reap timed out process");
            }
            ProcessOutcome::TimedOut
        }
    };

    info!(
        stage = %files.stage,
        attempt = files.attempt,
        outcome = ?outcome,
        "stage script finished"
    );
    Ok(outcome)
}
