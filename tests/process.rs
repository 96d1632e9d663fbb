// tests/process.rs
//
// Script processes: exit codes, log capture and the wall-time kill.

use std::path::Path;
use std::time::Duration;

use countdag::exec::process::{run_script, AttemptFiles, ProcessOutcome};
use countdag::exec::script::{Script, ScriptBuilder};
use countdag::plan::ResourceRequest;
use countdag_test_utils::init_tracing;

async fn run(dir: &Path, script: &Script, request: ResourceRequest) -> ProcessOutcome {
    let script_path = dir.join("run.sh");
    let log_path = dir.join("attempt-1.log");
    let files = AttemptFiles {
        stage: "slow",
        attempt: 1,
        script_path: &script_path,
        log_path: &log_path,
    };
    run_script(script, &files, &request).await.unwrap()
}

#[tokio::test]
async fn exit_code_and_output_are_captured() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let script = ScriptBuilder::new("slow", dir.path())
        .line("echo \"cpus=$COUNTDAG_CPUS\"")
        .line("exit 3")
        .build();

    let outcome = run(dir.path(), &script, ResourceRequest::new(2, 1, 1)).await;
    assert_eq!(outcome, ProcessOutcome::Exited(3));
    assert_eq!(outcome.exit_code(), Some(3));

    let log = std::fs::read_to_string(dir.path().join("attempt-1.log")).unwrap();
    assert!(log.contains("cpus=2"), "{log}");
}

#[tokio::test]
async fn wall_time_kill_reaches_tools_started_by_the_script() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let script = ScriptBuilder::new("slow", dir.path())
        .line("sh -c 'sleep 2; touch marker'")
        .build();

    // Zero hours of wall time: the attempt is over immediately.
    let outcome = run(dir.path(), &script, ResourceRequest::new(1, 1, 0)).await;
    assert_eq!(outcome, ProcessOutcome::TimedOut);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(
        !dir.path().join("marker").exists(),
        "tool outlived its timed out attempt"
    );
}
