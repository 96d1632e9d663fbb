// tests/end_to_end.rs
//
// Whole pipelines through the local executor, with fake shell tools.

mod common;

use std::fs;

use common::Sandbox;
use countdag::cli::CliArgs;
use countdag::config::ConfigFile;
use countdag::errors::CountdagError;
use countdag::{run, run_pipeline};
use countdag_test_utils::builders::{ConfigFileBuilder, FanoutConfigBuilder, StageConfigBuilder};
use countdag_test_utils::init_tracing;

/// prepare (copy) -> kmers fan-out -> report (line count)
fn pipeline(sb: &Sandbox, threshold: u64) -> ConfigFile {
    sb.counting_tools()
        .tool("copy", "cp \"$1\" \"$2\"")
        .tool("report", "wc -l < \"$1\" > \"$2\"");

    ConfigFileBuilder::new()
        .work_dir(sb.work_dir())
        .install_root(sb.install_root())
        .with_stage(
            "prepare",
            StageConfigBuilder::new("copy")
                .arg("{input}")
                .arg("{output}")
                .input("raw.fa")
                .output("reads.fa")
                .build(),
        )
        .with_fanout(
            "kmers",
            FanoutConfigBuilder::new("reads.fa", "kmers.txt")
                .after("prepare")
                .threshold(threshold)
                .build(),
        )
        .with_stage(
            "report",
            StageConfigBuilder::new("report")
                .arg("{input}")
                .arg("{output}")
                .input("kmers.txt")
                .output("report.txt")
                .after("kmers")
                .build(),
        )
        .build()
}

#[tokio::test]
async fn ten_units_end_to_end() {
    init_tracing();
    let sb = Sandbox::new();
    sb.input("raw.fa", 10);
    let cfg = pipeline(&sb, 1);

    let report = run_pipeline(&cfg).await.unwrap();
    assert!(report.is_success(), "{report:?}");

    let mut calls = sb.calls();
    calls.sort_by_key(|c| c.parse::<u64>().unwrap());
    let expected: Vec<String> = (1..=10).map(|u| u.to_string()).collect();
    assert_eq!(calls, expected, "every unit counted exactly once");

    for label in ["001", "005", "009"] {
        assert!(sb.work_dir().join(format!("kmers.batch-{label}/output")).is_file());
    }
    assert!(!sb.work_dir().join("kmers.batch-013").exists());

    assert_eq!(sb.read("kmers.txt"), "shared\t10\n");
    assert_eq!(sb.read("report.txt").trim(), "1");
}

#[tokio::test]
async fn threshold_zero_keeps_every_key() {
    init_tracing();
    let sb = Sandbox::new();
    sb.input("raw.fa", 5);
    let cfg = pipeline(&sb, 0);

    let report = run_pipeline(&cfg).await.unwrap();
    assert!(report.is_success(), "{report:?}");

    let out = sb.read("kmers.txt");
    let keys: Vec<&str> = out.lines().map(|l| l.split('\t').next().unwrap()).collect();
    assert_eq!(keys, vec!["shared", "unit1", "unit2", "unit3", "unit4", "unit5"]);
}

#[tokio::test]
async fn second_run_reexecutes_nothing() {
    init_tracing();
    let sb = Sandbox::new();
    sb.input("raw.fa", 6);
    let cfg = pipeline(&sb, 1);

    assert!(run_pipeline(&cfg).await.unwrap().is_success());
    let first_calls = sb.calls().len();
    let first_output = sb.read("kmers.txt");

    assert!(run_pipeline(&cfg).await.unwrap().is_success());
    assert_eq!(sb.calls().len(), first_calls);
    assert_eq!(sb.read("kmers.txt"), first_output);
}

#[tokio::test]
async fn changed_upstream_input_reaches_the_final_artifact() {
    init_tracing();
    let sb = Sandbox::new();
    sb.input("raw.fa", 6);
    let cfg = pipeline(&sb, 0);

    assert!(run_pipeline(&cfg).await.unwrap().is_success());
    assert!(sb.read("kmers.txt").starts_with("shared\t6\n"));

    sb.input("raw.fa", 10);
    let report = run_pipeline(&cfg).await.unwrap();
    assert!(report.is_success(), "{report:?}");

    assert_eq!(sb.read("kmers.checkpoint/count").trim(), "10");
    let out = sb.read("kmers.txt");
    assert!(out.starts_with("shared\t10\n"), "{out}");
    assert!(out.contains("unit10\t1\n"), "{out}");
    assert!(sb.work_dir().join("kmers.batch-009/output").is_file());
}

#[tokio::test]
async fn shrinking_input_drops_batches_from_the_old_plan() {
    init_tracing();
    let sb = Sandbox::new();
    sb.input("raw.fa", 10);
    let cfg = pipeline(&sb, 0);

    assert!(run_pipeline(&cfg).await.unwrap().is_success());
    assert!(sb.work_dir().join("kmers.batch-009").is_dir());

    sb.input("raw.fa", 3);
    let report = run_pipeline(&cfg).await.unwrap();
    assert!(report.is_success(), "{report:?}");

    assert!(!sb.work_dir().join("kmers.batch-005").exists());
    assert!(!sb.work_dir().join("kmers.batch-009").exists());
    assert_eq!(
        sb.read("kmers.txt"),
        "shared\t3\nunit1\t1\nunit2\t1\nunit3\t1\n"
    );
}

#[tokio::test]
async fn empty_input_produces_empty_output() {
    init_tracing();
    let sb = Sandbox::new();
    sb.input("raw.fa", 0);
    let cfg = pipeline(&sb, 1);

    let report = run_pipeline(&cfg).await.unwrap();
    assert!(report.is_success(), "{report:?}");
    assert!(sb.calls().is_empty());
    assert_eq!(sb.read("kmers.txt"), "");
    assert!(sb.work_dir().join("report.txt").is_file());
}

#[tokio::test]
async fn always_failing_batch_is_named_in_the_report() {
    init_tracing();
    let sb = Sandbox::new();
    sb.input("raw.fa", 10);
    let cfg = pipeline(&sb, 1);
    // Units 5..=8 crash the counter on every attempt.
    sb.tool(
        "count",
        "if [ \"$1\" -ge 5 ] && [ \"$1\" -le 8 ]; then exit 137; fi\nprintf 'shared 1\\n' > \"$3\"",
    );

    let report = run_pipeline(&cfg).await.unwrap();
    assert!(!report.is_success());

    let failed: Vec<&str> = report.failed.iter().map(|f| f.stage.as_str()).collect();
    assert_eq!(failed, vec!["kmers.batch-005"]);
    assert_eq!(report.failed[0].attempts, 3);
    assert!(report.failed[0].reason.contains("137"));
    assert!(report.blocked.contains(&"report".to_string()));
    assert!(!sb.work_dir().join("kmers.txt").exists());

    // Three attempts of the failing batch left three logs.
    let dir = sb.work_dir().join(failed[0]);
    for n in 1..=3 {
        assert!(dir.join(format!("attempt-{n}.log")).is_file());
    }
}

#[tokio::test]
async fn cli_run_reports_failure_as_error() {
    init_tracing();
    let sb = Sandbox::new();
    sb.tool("broken", "exit 1");
    let config_path = sb.dir.path().join("Countdag.toml");
    fs::write(
        &config_path,
        r#"
[config]
max_attempts = 1

[stage.only]
tool = "broken"
"#,
    )
    .unwrap();

    let args = CliArgs {
        config: config_path.to_string_lossy().into_owned(),
        work_dir: Some(sb.work_dir().to_string_lossy().into_owned()),
        install_root: Some(sb.install_root().to_string_lossy().into_owned()),
        log_level: None,
        dry_run: false,
    };

    match run(args.clone()).await {
        Err(CountdagError::RunFailed { failed }) => {
            assert_eq!(failed.len(), 1);
            assert!(failed[0].starts_with("only failed after 1 attempt"));
        }
        other => panic!("expected RunFailed, got {other:?}"),
    }

    // Dry run never executes anything.
    let dry = CliArgs {
        dry_run: true,
        ..args
    };
    run(dry).await.unwrap();
}
