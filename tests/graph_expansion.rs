// tests/graph_expansion.rs

use countdag::dag::JobGraph;
use countdag::errors::CountdagError;
use countdag_test_utils::builders::{ConfigFileBuilder, FanoutConfigBuilder, StageConfigBuilder};

fn graph() -> JobGraph {
    let cfg = ConfigFileBuilder::new()
        .with_stage("prepare", StageConfigBuilder::new("prep").build())
        .with_fanout(
            "kmers",
            FanoutConfigBuilder::new("prepared.fa", "kmers.txt")
                .after("prepare")
                .build(),
        )
        .with_stage("report", StageConfigBuilder::new("report").after("kmers").build())
        .build();
    JobGraph::from_config(&cfg)
}

fn batch_ids(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|l| format!("kmers.batch-{l}")).collect()
}

#[test]
fn static_graph_links_fanout_through_its_reducer() {
    let g = graph();

    assert_eq!(g.len(), 4);
    assert_eq!(g.dependencies_of("kmers.checkpoint"), ["prepare"]);
    assert_eq!(g.dependencies_of("kmers.reduce"), ["kmers.checkpoint"]);
    assert_eq!(g.dependencies_of("report"), ["kmers.reduce"]);

    let order = g.topological_order().unwrap();
    let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
    assert!(pos("prepare") < pos("kmers.checkpoint"));
    assert!(pos("kmers.reduce") < pos("report"));
}

#[test]
fn expansion_inserts_batches_between_checkpoint_and_reducer() {
    let mut g = graph();
    let ids = batch_ids(&["001", "005", "009"]);

    g.expand("kmers.checkpoint", &ids, "kmers.reduce").unwrap();

    assert_eq!(g.len(), 7);
    for id in &ids {
        assert_eq!(g.dependencies_of(id), ["kmers.checkpoint"]);
        assert_eq!(g.dependents_of(id), ["kmers.reduce"]);
    }
    let reduce_deps = g.dependencies_of("kmers.reduce");
    assert_eq!(reduce_deps.len(), 4);
    assert!(ids.iter().all(|id| reduce_deps.contains(id)));

    // Nothing was added upstream of the checkpoint.
    assert_eq!(g.dependencies_of("kmers.checkpoint"), ["prepare"]);

    let order = g.topological_order().unwrap();
    let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
    for id in &ids {
        assert!(pos("kmers.checkpoint") < pos(id));
        assert!(pos(id) < pos("kmers.reduce"));
    }
}

#[test]
fn expanding_with_no_nodes_is_a_no_op() {
    let mut g = graph();
    g.expand("kmers.checkpoint", &[], "kmers.reduce").unwrap();
    assert_eq!(g.len(), 4);
}

#[test]
fn expansion_rejects_unknown_trigger_or_barrier() {
    let mut g = graph();
    let ids = batch_ids(&["001"]);

    match g.expand("missing", &ids, "kmers.reduce") {
        Err(CountdagError::StageNotFound(name)) => assert_eq!(name, "missing"),
        other => panic!("expected StageNotFound, got {other:?}"),
    }
    match g.expand("kmers.checkpoint", &ids, "missing") {
        Err(CountdagError::StageNotFound(name)) => assert_eq!(name, "missing"),
        other => panic!("expected StageNotFound, got {other:?}"),
    }
    assert_eq!(g.len(), 4);
}

#[test]
fn expansion_requires_barrier_downstream_of_trigger() {
    let mut g = graph();
    let ids = batch_ids(&["001"]);

    // `report` does not depend on `prepare` directly.
    let err = g.expand("prepare", &ids, "report").unwrap_err();
    assert!(matches!(err, CountdagError::ConfigError(ref m) if m.contains("does not depend")));
    assert!(!g.contains("kmers.batch-001"));
}

#[test]
fn expansion_never_redefines_existing_nodes() {
    let mut g = graph();
    let ids = vec!["report".to_string()];

    let err = g.expand("kmers.checkpoint", &ids, "kmers.reduce").unwrap_err();
    assert!(matches!(err, CountdagError::ConfigError(ref m) if m.contains("redefine")));

    // The graph is unchanged after a rejected expansion.
    assert_eq!(g.dependencies_of("report"), ["kmers.reduce"]);
    assert_eq!(g.dependencies_of("kmers.reduce"), ["kmers.checkpoint"]);
}

#[test]
fn expansion_happens_once_per_checkpoint() {
    let mut g = graph();
    g.expand("kmers.checkpoint", &batch_ids(&["001"]), "kmers.reduce")
        .unwrap();

    let again = g.expand("kmers.checkpoint", &batch_ids(&["001"]), "kmers.reduce");
    assert!(again.is_err());
}
