// src/dag/graph.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::ConfigFile;
use crate::dag::node::{checkpoint_id, reduce_id};
use crate::engine::StageId;
use crate::errors::{CountdagError, Result};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct GraphNode {
    /// Direct dependencies: nodes that must succeed before this one can run.
    deps: Vec<StageId>,
    /// Direct dependents: nodes that depend on this one.
    dependents: Vec<StageId>,
}

/// Job DAG keyed by node id.
///
/// Built in two phases. [`JobGraph::from_config`] creates the static part:
/// every `[stage.*]` plus, per fan-out, a checkpoint node and a reduce node
/// with an edge between them. [`JobGraph::expand`] later inserts the batch
/// nodes between a resolved checkpoint and its reducer. `expand` is the only
/// mutation after construction and re-checks acyclicity.
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    nodes: BTreeMap<StageId, GraphNode>,
}

impl JobGraph {
    /// Build the static graph from a validated [`ConfigFile`].
    ///
    /// A dependency on a fan-out name resolves to that fan-out's reduce node.
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let resolve = |dep: &String| -> StageId {
            if cfg.fanout.contains_key(dep) {
                reduce_id(dep)
            } else {
                dep.clone()
            }
        };

        let mut graph = JobGraph::default();

        for (name, stage) in &cfg.stage {
            let deps = stage.after.iter().map(resolve).collect();
            graph.insert_node(name.clone(), deps);
        }

        for (name, fanout) in &cfg.fanout {
            let checkpoint = checkpoint_id(name);
            let deps = fanout.after.iter().map(resolve).collect();
            graph.insert_node(checkpoint.clone(), deps);
            graph.insert_node(reduce_id(name), vec![checkpoint]);
        }

        graph.link_dependents();
        graph
    }

    fn insert_node(&mut self, id: StageId, deps: Vec<StageId>) {
        self.nodes.entry(id).or_default().deps = deps;
    }

    fn link_dependents(&mut self) {
        let edges: Vec<(StageId, StageId)> = self
            .nodes
            .iter()
            .flat_map(|(id, n)| n.deps.iter().map(move |d| (d.clone(), id.clone())))
            .collect();

        for node in self.nodes.values_mut() {
            node.dependents.clear();
        }
        for (dep, dependent) in edges {
            if let Some(node) = self.nodes.get_mut(&dep) {
                node.dependents.push(dependent);
            }
        }
    }

    /// Insert `new_nodes` downstream of `trigger` and upstream of `barrier`.
    ///
    /// Each new node depends only on `trigger`; `barrier` gains a dependency
    /// on every new node. `barrier` must already depend on `trigger`, so the
    /// expansion never adds anything upstream of the trigger.
    pub fn expand(&mut self, trigger: &str, new_nodes: &[StageId], barrier: &str) -> Result<()> {
        if !self.nodes.contains_key(trigger) {
            return Err(CountdagError::StageNotFound(trigger.to_string()));
        }
        let barrier_deps = self
            .nodes
            .get(barrier)
            .map(|n| n.deps.clone())
            .ok_or_else(|| CountdagError::StageNotFound(barrier.to_string()))?;
        if !barrier_deps.iter().any(|d| d == trigger) {
            return Err(CountdagError::ConfigError(format!(
                "expansion barrier '{barrier}' does not depend on '{trigger}'"
            )));
        }
        if let Some(dup) = new_nodes.iter().find(|n| self.nodes.contains_key(*n)) {
            return Err(CountdagError::ConfigError(format!(
                "expansion of '{trigger}' would redefine existing node '{dup}'"
            )));
        }

        let mut next = self.clone();
        for id in new_nodes {
            next.insert_node(id.clone(), vec![trigger.to_string()]);
        }
        if let Some(b) = next.nodes.get_mut(barrier) {
            b.deps.extend(new_nodes.iter().cloned());
        }
        next.link_dependents();

        next.topological_order()?;
        *self = next;
        Ok(())
    }

    /// All node ids, in sorted order.
    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Immediate dependencies of a node.
    pub fn dependencies_of(&self, id: &str) -> &[StageId] {
        self.nodes.get(id).map(|n| n.deps.as_slice()).unwrap_or(&[])
    }

    /// Immediate dependents of a node.
    pub fn dependents_of(&self, id: &str) -> &[StageId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Topological order, or a [`CountdagError::DagCycle`].
    pub fn topological_order(&self) -> Result<Vec<StageId>> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for id in self.nodes.keys() {
            graph.add_node(id.as_str());
        }
        for (id, node) in &self.nodes {
            for dep in &node.deps {
                graph.add_edge(dep.as_str(), id.as_str(), ());
            }
        }

        toposort(&graph, None)
            .map(|order| order.into_iter().map(str::to_string).collect())
            .map_err(|cycle| {
                CountdagError::DagCycle(format!(
                    "cycle detected in job graph involving '{}'",
                    cycle.node_id()
                ))
            })
    }
}
