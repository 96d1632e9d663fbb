// tests/error_handling.rs

use std::io::Write;

use countdag::cli::CliArgs;
use countdag::config::{load_and_validate, load_for_cli, parse_config};
use countdag::errors::CountdagError;
use countdag::types::StageClass;
use countdag_test_utils::builders::{ConfigFileBuilder, StageConfigBuilder};
use tempfile::NamedTempFile;

fn load(toml: &str) -> Result<countdag::config::ConfigFile, CountdagError> {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{toml}").unwrap();
    load_and_validate(file.path())
}

fn expect_config_error(toml: &str, needle: &str) {
    match load(toml) {
        Err(CountdagError::ConfigError(msg)) => {
            assert!(msg.contains(needle), "message `{msg}` lacks `{needle}`")
        }
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

const FANOUT: &str = r#"
[fanout.kmers]
input = "reads.fa"
probe = { tool = "counter", args = ["plan", "{input}", "{scratch}"] }
count = { tool = "counter", args = ["count", "{unit}", "{input}", "{output}"] }
merge = { tool = "counter", args = ["merge", "{output}", "{parts}"] }
reduce = { output = "kmers.txt" }
"#;

#[test]
fn full_config_loads_with_defaults() {
    let cfg = load(&format!(
        r#"
[config]
install_root = "/opt/tools"

[params]
kmer_size = 25
mode = "canonical"

[resources.batch]
memory_gb = 12
escalation = "step"
step_memory_gb = 4

[stage.prepare]
class = "heavy"
tool = "prep"
args = ["-k", "{{params.kmer_size}}", "{{input}}", "{{output}}"]
inputs = ["reads.raw"]
outputs = ["reads.fa"]
{FANOUT}
"#
    ))
    .unwrap();

    assert_eq!(cfg.config.install_root, "/opt/tools");
    assert_eq!(cfg.config.work_dir, "work");
    assert_eq!(cfg.config.max_attempts, 3);
    assert_eq!(cfg.stage["prepare"].class, StageClass::Heavy);
    assert_eq!(cfg.fanout["kmers"].batch_size, 4);
    assert_eq!(cfg.fanout["kmers"].reduce.threshold, 1);
    assert_eq!(cfg.resources[&StageClass::Batch].memory_gb, Some(12));
    assert_eq!(cfg.params["kmer_size"].to_string(), "25");
}

#[test]
fn test_dag_cycle_returns_structured_error() {
    let result = load(
        r#"
[stage.A]
tool = "a"
after = ["B"]

[stage.B]
tool = "b"
after = ["A"]
"#,
    );

    match result {
        Err(CountdagError::DagCycle(msg)) => {
            assert!(msg.contains("cycle detected"));
            assert!(msg.contains("A") || msg.contains("B"));
        }
        Err(e) => panic!("Expected DagCycle error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn cycle_through_a_fanout_is_detected() {
    let result = load(&format!(
        r#"
[stage.post]
tool = "post"
after = ["kmers"]
{FANOUT}
after = ["post"]
"#
    ));
    assert!(matches!(result, Err(CountdagError::DagCycle(_))));
}

#[test]
fn test_unknown_dependency_returns_config_error() {
    expect_config_error(
        r#"
[stage.A]
tool = "a"
after = ["NonExistent"]
"#,
        "unknown dependency 'NonExistent'",
    );
}

#[test]
fn self_dependency_is_rejected() {
    expect_config_error(
        r#"
[stage.A]
tool = "a"
after = ["A"]
"#,
        "cannot depend on itself",
    );
}

#[test]
fn empty_config_is_rejected() {
    expect_config_error("[config]\nmax_attempts = 2\n", "at least one");
}

#[test]
fn zero_max_attempts_is_rejected() {
    expect_config_error(
        r#"
[config]
max_attempts = 0

[stage.A]
tool = "a"
"#,
        "max_attempts",
    );
}

#[test]
fn unknown_placeholder_is_rejected() {
    expect_config_error(
        r#"
[stage.A]
tool = "a"
args = ["{bogus}"]
"#,
        "unknown placeholder",
    );
}

#[test]
fn missing_param_is_rejected() {
    expect_config_error(
        r#"
[stage.A]
tool = "a"
args = ["{params.kmer_size}"]
"#,
        "kmer_size",
    );
}

#[test]
fn output_index_out_of_range_is_rejected() {
    expect_config_error(
        r#"
[stage.A]
tool = "a"
args = ["{output:1}"]
outputs = ["only-one.txt"]
"#,
        "out of range",
    );
}

#[test]
fn unit_placeholder_only_allowed_in_count_commands() {
    expect_config_error(
        r#"
[stage.A]
tool = "a"
args = ["{unit}"]
"#,
        "not available in stage commands",
    );
}

#[test]
fn parts_must_stand_alone() {
    expect_config_error(
        &FANOUT.replace(r#""{output}", "{parts}""#, r#""{output}", "--parts={parts}""#),
        "whole argument",
    );
}

#[test]
fn duplicate_outputs_are_rejected() {
    expect_config_error(
        &format!(
            r#"
[stage.A]
tool = "a"
outputs = ["kmers.txt"]
{FANOUT}
"#
        ),
        "produced by both",
    );
}

#[test]
fn count_pattern_needs_a_capture_group() {
    expect_config_error(
        &FANOUT.replace(
            "[fanout.kmers]\n",
            "[fanout.kmers]\ncount_pattern = \"batches: \\\\d+\"\n",
        ),
        "capture group",
    );
}

#[test]
fn zero_batch_size_is_rejected() {
    expect_config_error(
        &FANOUT.replace("[fanout.kmers]\n", "[fanout.kmers]\nbatch_size = 0\n"),
        "batch_size",
    );
}

#[test]
fn unknown_resource_class_is_rejected() {
    expect_config_error(
        r#"
[resources.gigantic]
memory_gb = 4

[stage.A]
tool = "a"
"#,
        "resources.gigantic",
    );
}

#[test]
fn base_request_above_ceiling_is_rejected() {
    expect_config_error(
        r#"
[resources.light]
memory_gb = 64
max_memory_gb = 32

[stage.A]
tool = "a"
"#,
        "exceeds the ceiling",
    );
}

#[test]
fn step_escalation_without_memory_growth_is_rejected() {
    expect_config_error(
        r#"
[resources.batch]
escalation = "step"
step_memory_gb = 0
step_wall_time_h = 2

[stage.A]
tool = "a"
"#,
        "step_memory_gb must be >= 1",
    );
}

#[test]
fn invalid_stage_name_is_rejected() {
    expect_config_error(
        r#"
[stage."has space"]
tool = "a"
"#,
        "must be non-empty",
    );
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let result = load("[stage.A\ntool = 1");
    assert!(matches!(result, Err(CountdagError::TomlError(_))));
}

#[test]
fn params_declared_through_the_builder_satisfy_templates() {
    let stage = || StageConfigBuilder::new("a").arg("{params.kmer_size}").build();

    let missing = ConfigFileBuilder::new().with_stage("A", stage()).try_build();
    assert!(matches!(missing, Err(CountdagError::ConfigError(_))));

    let cfg = ConfigFileBuilder::new()
        .with_param("kmer_size", 21i64)
        .with_stage("A", stage())
        .build();
    assert_eq!(cfg.params["kmer_size"].to_string(), "21");
}

#[test]
fn unreadable_config_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Missing.toml");
    match load_and_validate(&path) {
        Err(CountdagError::ConfigError(msg)) => {
            assert!(msg.contains("Missing.toml"), "{msg}")
        }
        other => panic!("Expected ConfigError, got: {:?}", other.map(|_| ())),
    }
}

#[test]
fn cli_overrides_replace_config_paths() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        "[config]\nwork_dir = \"from-file\"\ninstall_root = \"/opt/file\"\n\n[stage.A]\ntool = \"a\"\n"
    )
    .unwrap();

    let args = CliArgs {
        config: file.path().to_string_lossy().into_owned(),
        work_dir: Some("/tmp/override".to_string()),
        install_root: Some(String::new()),
        log_level: None,
        dry_run: false,
    };
    let cfg = load_for_cli(&args).unwrap();
    assert_eq!(cfg.config.work_dir, "/tmp/override");
    assert_eq!(cfg.config.install_root, "/opt/file", "empty override is ignored");
}

#[test]
fn config_text_parses_without_a_file() {
    let cfg = parse_config(FANOUT).unwrap();
    assert!(cfg.fanout.contains_key("kmers"));
    assert!(matches!(
        parse_config("[stage.A]\nafter = [\"B\"]\ntool = \"a\"\n"),
        Err(CountdagError::ConfigError(_))
    ));
}
