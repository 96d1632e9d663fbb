// tests/runtime_fake_executor.rs

use countdag::config::ConfigFile;
use countdag::dag::Scheduler;
use countdag::engine::DispatchBudget;
use countdag_test_utils::builders::{ConfigFileBuilder, FanoutConfigBuilder, StageConfigBuilder};
use countdag_test_utils::fake_executor::Submission;
use countdag_test_utils::{init_tracing, run_with_fake};

fn pipeline() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_stage(
            "prepare",
            StageConfigBuilder::new("prep").output("prepared.fa").arg("{output}").build(),
        )
        .with_fanout(
            "kmers",
            FanoutConfigBuilder::new("prepared.fa", "kmers.txt")
                .after("prepare")
                .build(),
        )
        .build()
}

fn stages(subs: &[Submission]) -> Vec<&str> {
    subs.iter().map(|s| s.stage.as_str()).collect()
}

#[tokio::test]
async fn runtime_drives_the_fanout_to_completion() {
    init_tracing();
    let scheduler = Scheduler::from_config(&pipeline());

    let (report, subs) = run_with_fake(scheduler, |fake| {
        fake.with_checkpoint_units("kmers.checkpoint", 10)
    })
    .await;

    assert!(report.is_success(), "{report:?}");
    assert_eq!(
        stages(&subs),
        vec![
            "prepare",
            "kmers.checkpoint",
            "kmers.batch-001",
            "kmers.batch-005",
            "kmers.batch-009",
            "kmers.reduce",
        ]
    );
}

#[tokio::test]
async fn empty_fanout_runs_reducer_only() {
    init_tracing();
    let scheduler = Scheduler::from_config(&pipeline());

    let (report, subs) = run_with_fake(scheduler, |fake| fake).await;

    assert!(report.is_success());
    assert_eq!(
        stages(&subs),
        vec!["prepare", "kmers.checkpoint", "kmers.reduce"]
    );
}

#[tokio::test]
async fn retried_batch_gets_escalated_request() {
    init_tracing();
    let scheduler = Scheduler::from_config(&pipeline());

    let (report, subs) = run_with_fake(scheduler, |fake| {
        fake.with_checkpoint_units("kmers.checkpoint", 4)
            .with_failures("kmers.batch-001", 2)
    })
    .await;

    assert!(report.is_success(), "{report:?}");
    let attempts: Vec<&Submission> = subs
        .iter()
        .filter(|s| s.stage == "kmers.batch-001")
        .collect();
    assert_eq!(attempts.len(), 3);
    assert_eq!(
        attempts.iter().map(|s| s.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(attempts[1].request.memory_gb > attempts[0].request.memory_gb);
    assert!(attempts[2].request.memory_gb > attempts[1].request.memory_gb);
    assert_eq!(attempts[2].request.cpus, attempts[0].request.cpus);
}

#[tokio::test]
async fn exhausted_batch_fails_the_run_and_blocks_the_reducer() {
    init_tracing();
    let scheduler = Scheduler::from_config(&pipeline());

    let (report, subs) = run_with_fake(scheduler, |fake| {
        fake.with_checkpoint_units("kmers.checkpoint", 10)
            .with_failures("kmers.batch-005", 99)
    })
    .await;

    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].stage, "kmers.batch-005");
    assert_eq!(report.failed[0].attempts, 3);
    assert!(report.blocked.contains(&"kmers.reduce".to_string()));
    assert!(!stages(&subs).contains(&"kmers.reduce"));

    let err = countdag::ensure_success(&report).unwrap_err();
    assert!(err.to_string().contains("kmers.batch-005"));
}

#[tokio::test]
async fn structural_checkpoint_failure_stops_the_run() {
    init_tracing();
    let scheduler = Scheduler::from_config(&pipeline());

    let (report, subs) = run_with_fake(scheduler, |fake| {
        fake.with_structural_failure("kmers.checkpoint", "no count line")
    })
    .await;

    assert_eq!(report.failed[0].stage, "kmers.checkpoint");
    assert_eq!(report.failed[0].attempts, 1);
    assert_eq!(
        subs.iter().filter(|s| s.stage == "kmers.checkpoint").count(),
        1
    );
}

#[tokio::test]
async fn budgeted_run_still_finishes() {
    init_tracing();
    let scheduler = Scheduler::from_config(&pipeline()).with_budget(DispatchBudget::new(4, 8));

    let (report, subs) = run_with_fake(scheduler, |fake| {
        fake.with_checkpoint_units("kmers.checkpoint", 20)
    })
    .await;

    assert!(report.is_success());
    assert_eq!(
        subs.iter()
            .filter(|s| s.stage.starts_with("kmers.batch-"))
            .count(),
        5
    );
}
