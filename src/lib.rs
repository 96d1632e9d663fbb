// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod plan;
pub mod types;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::cli::CliArgs;
use crate::config::loader::load_for_cli;
use crate::config::model::ConfigFile;
use crate::dag::{JobGraph, RunReport, Scheduler};
use crate::engine::{CoreRuntime, DispatchBudget, Runtime, RuntimeEvent};
use crate::errors::{CountdagError, Result};
use crate::exec::{ExecContext, LocalExecutorBackend};
use crate::plan::ResourcePolicy;
use crate::types::StageClass;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and CLI overrides
/// - scheduler / core runtime / async runtime
/// - local process executor
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_for_cli(&args)?;

    if args.dry_run {
        print_dry_run(&cfg)?;
        return Ok(());
    }

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    // Ctrl-C → stop dispatching, wait for in-flight attempts.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let report = run_with_channel(&cfg, rt_tx, rt_rx).await?;
    ensure_success(&report)
}

/// Run a validated pipeline to completion with the local executor.
pub async fn run_pipeline(cfg: &ConfigFile) -> Result<RunReport> {
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    run_with_channel(cfg, rt_tx, rt_rx).await
}

async fn run_with_channel(
    cfg: &ConfigFile,
    rt_tx: mpsc::Sender<RuntimeEvent>,
    rt_rx: mpsc::Receiver<RuntimeEvent>,
) -> Result<RunReport> {
    let budget = DispatchBudget::new(cfg.config.cpu_budget, cfg.config.memory_budget_gb);
    let scheduler = Scheduler::from_config(cfg).with_budget(budget);

    let ctx = ExecContext::from_config(cfg);
    info!(
        work_dir = ?ctx.work_dir(),
        bin_dir = ?ctx.tools().bin_dir(),
        stages = cfg.stage.len(),
        fanouts = cfg.fanout.len(),
        "starting pipeline"
    );
    let executor = LocalExecutorBackend::new(ctx, rt_tx);

    let core = CoreRuntime::new(scheduler);
    let runtime = Runtime::new(core, rt_rx, executor);
    let report = runtime.run().await?;

    info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        blocked = report.blocked.len(),
        "pipeline finished"
    );
    Ok(report)
}

/// Turn a report with failed stages into [`CountdagError::RunFailed`].
pub fn ensure_success(report: &RunReport) -> Result<()> {
    if report.is_success() {
        return Ok(());
    }
    for failure in &report.failed {
        error!(stage = %failure.stage, attempts = failure.attempts, reason = %failure.reason, "stage failed");
    }
    Err(CountdagError::RunFailed {
        failed: report.failed.iter().map(|f| f.to_string()).collect(),
    })
}

/// Simple dry-run output: print the static graph, commands and resources.
fn print_dry_run(cfg: &ConfigFile) -> Result<()> {
    println!("countdag dry-run");
    println!("  config.install_root = {}", cfg.config.install_root);
    println!("  config.work_dir = {}", cfg.config.work_dir);
    println!("  config.max_attempts = {}", cfg.config.max_attempts);
    println!(
        "  config.budget = {} cpus / {} GB",
        cfg.config.cpu_budget, cfg.config.memory_budget_gb
    );
    println!("  config.on_failure = {:?}", cfg.config.on_failure);
    println!();

    let graph = JobGraph::from_config(cfg);
    println!("order ({} nodes before fan-out):", graph.len());
    for id in graph.topological_order()? {
        let deps = graph.dependencies_of(&id);
        if deps.is_empty() {
            println!("  - {id}");
        } else {
            println!("  - {id} (after {})", deps.join(", "));
        }
    }
    println!();

    for (name, stage) in &cfg.stage {
        println!("stage {name} [{}]", stage.class);
        println!("    {} {}", stage.tool, stage.args.join(" "));
    }
    for (name, fanout) in &cfg.fanout {
        println!(
            "fanout {name}: input {} in batches of {}",
            fanout.input, fanout.batch_size
        );
        println!("    probe: {} {}", fanout.probe.tool, fanout.probe.args.join(" "));
        println!("    count: {} {}", fanout.count.tool, fanout.count.args.join(" "));
        println!("    merge: {} {}", fanout.merge.tool, fanout.merge.args.join(" "));
        println!(
            "    reduce: {} (threshold {}, {} workers)",
            fanout.reduce.output, fanout.reduce.threshold, fanout.reduce.workers
        );
    }
    println!();

    let policy = ResourcePolicy::from_overrides(&cfg.resources);
    println!("resources:");
    for class in StageClass::ALL {
        let p = policy.class(class);
        println!(
            "  {class}: base {} / ceiling {} / {:?}",
            p.base, p.ceiling, p.escalation
        );
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
