// tests/script_render.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use countdag::config::{CommandConfig, ParamValue, Params};
use countdag::dag::node::BatchJob;
use countdag::exec::batch::{render_batch_script, BatchLayout};
use countdag::exec::script::{
    check_template, quote, render_command, Bindings, ScriptBuilder, TemplateError, TemplateKind,
    ToolPrefix,
};
use countdag::exec::ExecContext;
use countdag::plan::{BatchPolicy, ResourceRequest};
use countdag_test_utils::builders::command;

fn params() -> Params {
    let mut p = BTreeMap::new();
    p.insert("kmer_size".to_string(), ParamValue::Int(25));
    p.insert("label".to_string(), ParamValue::from("it's"));
    p
}

fn tools() -> ToolPrefix {
    ToolPrefix::from_install_root("/opt/kt")
}

#[test]
fn tools_resolve_under_the_install_root() {
    assert_eq!(tools().bin_dir(), Path::new("/opt/kt/bin"));
    assert_eq!(tools().tool_path("jf"), PathBuf::from("/opt/kt/bin/jf"));
}

#[test]
fn stage_command_substitutes_paths_params_and_resources() {
    let params = params();
    let inputs = vec![PathBuf::from("/w/in.fa")];
    let outputs = vec![PathBuf::from("/w/out.txt")];
    let b = Bindings::new(&params, Path::new("/w/prepare"), ResourceRequest::new(2, 8, 1))
        .inputs(&inputs)
        .outputs(&outputs);

    let cmd = command(
        "prep",
        &["-k", "{params.kmer_size}", "-t", "{cpus}", "{input}", "-o", "{output:0}"],
    );
    let line = render_command(&tools(), TemplateKind::Stage, &cmd, &b).unwrap();

    assert_eq!(
        line,
        "'/opt/kt/bin/prep' '-k' '25' '-t' '2' '/w/in.fa' '-o' '/w/out.txt'"
    );
}

#[test]
fn values_with_quotes_stay_one_shell_word() {
    let params = params();
    let b = Bindings::new(&params, Path::new("/w"), ResourceRequest::default());
    let cmd = command("echo", &["--label={params.label}"]);

    let line = render_command(&tools(), TemplateKind::Stage, &cmd, &b).unwrap();
    assert_eq!(line, r"'/opt/kt/bin/echo' '--label=it'\''s'");
    assert_eq!(quote("a b"), "'a b'");
}

#[test]
fn units_total_expands_at_run_time() {
    let params = params();
    let inputs = vec![PathBuf::from("/w/in.fa")];
    let outputs = vec![PathBuf::from("/w/b/part-0001")];
    let b = Bindings::new(&params, Path::new("/w/b"), ResourceRequest::default())
        .inputs(&inputs)
        .outputs(&outputs)
        .unit(1);

    let cmd = command("count", &["{unit}/{units_total}", "{output}"]);
    let line = render_command(&tools(), TemplateKind::Count, &cmd, &b).unwrap();
    assert_eq!(line, r#"'/opt/kt/bin/count' '1/'"$N" '/w/b/part-0001'"#);
}

#[test]
fn parts_expand_unquoted() {
    let params = params();
    let outputs = vec![PathBuf::from("/w/b/output")];
    let b = Bindings::new(&params, Path::new("/w/b"), ResourceRequest::default()).outputs(&outputs);

    let cmd = command("merge", &["{output}", "{parts}"]);
    let line = render_command(&tools(), TemplateKind::Merge, &cmd, &b).unwrap();
    assert_eq!(line, "'/opt/kt/bin/merge' '/w/b/output' $PARTS");
}

#[test]
fn placeholders_are_checked_per_command_kind() {
    let params = params();
    let check = |kind, args: &[&str]| check_template(kind, &command("t", args), &params, Some(1), Some(1));

    assert!(check(TemplateKind::Probe, &["{input}", "{scratch}"]).is_ok());
    assert!(matches!(
        check(TemplateKind::Probe, &["{output}"]),
        Err(TemplateError::NotAllowed { .. })
    ));
    assert!(matches!(
        check(TemplateKind::Merge, &["{unit}"]),
        Err(TemplateError::NotAllowed { .. })
    ));
    assert!(matches!(
        check(TemplateKind::Stage, &["{scratch}"]),
        Err(TemplateError::NotAllowed { .. })
    ));
    assert!(matches!(
        check(TemplateKind::Stage, &["{input"]),
        Err(TemplateError::Unbalanced(_))
    ));
    assert_eq!(
        check_template(
            TemplateKind::Stage,
            &CommandConfig {
                tool: " ".to_string(),
                args: vec![]
            },
            &params,
            None,
            None
        ),
        Err(TemplateError::EmptyTool)
    );
}

#[test]
fn script_builder_starts_strict_and_indents_guards() {
    let script = ScriptBuilder::new("s", Path::new("/w/s"))
        .line("N=3")
        .guard_unit(2)
        .line("echo two")
        .end_guard()
        .build();

    assert_eq!(
        script.text(),
        "#!/bin/sh\n# countdag stage: s\nset -eu\ncd '/w/s'\nN=3\nif [ 2 -le \"$N\" ]; then\n  echo two\nfi\n"
    );
}

#[test]
fn last_batch_script_guards_every_unit_of_its_window() {
    let policy = BatchPolicy::default();
    let batch = policy.plan(10).pop().unwrap();
    let job = BatchJob {
        fanout: "kmers".to_string(),
        checkpoint: "kmers.checkpoint".to_string(),
        batch,
        policy,
        input: "reads.fa".to_string(),
        count: command("count", &["{unit}", "{input}", "{output}"]),
        merge: command("merge", &["{output}", "{parts}"]),
    };
    let ctx = ExecContext::new("/w", tools(), params());
    let layout = BatchLayout {
        stage_dir: PathBuf::from("/w/kmers.batch-009"),
        count_file: PathBuf::from("/w/kmers.checkpoint/count"),
        input: PathBuf::from("/w/reads.fa"),
        output: PathBuf::from("/w/kmers.batch-009/output"),
    };

    let script = render_batch_script(
        &ctx,
        "kmers.batch-009",
        &job,
        9,
        &layout,
        ResourceRequest::new(4, 8, 2),
    )
    .unwrap();
    let text = script.text();

    assert!(text.contains("N=$(cat '/w/kmers.checkpoint/count')"));
    for unit in 9..=12 {
        assert!(text.contains(&format!("if [ {unit} -le \"$N\" ]; then")));
        assert!(text.contains(&format!(
            "'/opt/kt/bin/count' '{unit}' '/w/reads.fa' '/w/kmers.batch-009/part-{unit:04}'"
        )));
    }
    assert!(!text.contains("if [ 13 "));
    assert!(text.contains("'/opt/kt/bin/merge' '/w/kmers.batch-009/output' $PARTS"));
    assert!(text.trim_end().ends_with("rm -f $PARTS"));
}
