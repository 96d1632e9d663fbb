// src/config/validate.rs

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use regex::Regex;

use crate::config::model::{ConfigFile, RawConfigFile, ResourceConfig};
use crate::errors::{CountdagError, Result};
use crate::exec::script::{check_template, TemplateKind};
use crate::plan::{Escalation, ResourcePolicy};
use crate::types::StageClass;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::CountdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let resources = resolve_resource_classes(&raw.resources)?;
        validate_resources(&resources)?;
        Ok(ConfigFile::new_unchecked(
            raw.config,
            raw.params,
            resources,
            raw.stage,
            raw.fanout,
        ))
    }
}

fn config_error(msg: impl Into<String>) -> CountdagError {
    CountdagError::ConfigError(msg.into())
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_work(cfg)?;
    validate_global_config(cfg)?;
    validate_names(cfg)?;
    validate_dependencies(cfg)?;
    validate_outputs(cfg)?;
    validate_stage_templates(cfg)?;
    validate_fanouts(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_work(cfg: &RawConfigFile) -> Result<()> {
    if cfg.stage.is_empty() && cfg.fanout.is_empty() {
        return Err(config_error(
            "config must contain at least one [stage.<name>] or [fanout.<name>] section",
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    let c = &cfg.config;

    if c.max_attempts == 0 {
        return Err(config_error("[config].max_attempts must be >= 1 (got 0)"));
    }
    if c.cpu_budget == 0 {
        return Err(config_error("[config].cpu_budget must be >= 1 (got 0)"));
    }
    if c.memory_budget_gb == 0 {
        return Err(config_error("[config].memory_budget_gb must be >= 1 (got 0)"));
    }
    if c.work_dir.trim().is_empty() {
        return Err(config_error("[config].work_dir must not be empty"));
    }
    if c.install_root.trim().is_empty() {
        return Err(config_error("[config].install_root must not be empty"));
    }

    Ok(())
}

/// Stage and fan-out names share one namespace and end up as directory
/// names, so they must be plain identifiers.
fn validate_names(cfg: &RawConfigFile) -> Result<()> {
    let check = |kind: &str, name: &str| -> Result<()> {
        let ok = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !ok {
            return Err(config_error(format!(
                "{kind} name '{name}' must be non-empty and use only [A-Za-z0-9_-]"
            )));
        }
        Ok(())
    };

    for name in cfg.stage.keys() {
        check("stage", name)?;
        if cfg.fanout.contains_key(name) {
            return Err(config_error(format!(
                "'{name}' is defined both as a stage and as a fanout"
            )));
        }
    }
    for name in cfg.fanout.keys() {
        check("fanout", name)?;
    }
    Ok(())
}

fn validate_dependencies(cfg: &RawConfigFile) -> Result<()> {
    let known = |dep: &str| cfg.stage.contains_key(dep) || cfg.fanout.contains_key(dep);

    let deps = cfg
        .stage
        .iter()
        .map(|(n, s)| ("stage", n, &s.after))
        .chain(cfg.fanout.iter().map(|(n, f)| ("fanout", n, &f.after)));

    for (kind, name, after) in deps {
        for dep in after {
            if !known(dep) {
                return Err(config_error(format!(
                    "{kind} '{name}' has unknown dependency '{dep}' in `after`"
                )));
            }
            if dep == name {
                return Err(config_error(format!(
                    "{kind} '{name}' cannot depend on itself in `after`"
                )));
            }
        }
    }
    Ok(())
}

/// Every artifact has exactly one producer.
fn validate_outputs(cfg: &RawConfigFile) -> Result<()> {
    let mut owners: HashMap<&str, &str> = HashMap::new();

    let outputs = cfg
        .stage
        .iter()
        .flat_map(|(n, s)| s.outputs.iter().map(move |o| (n.as_str(), o.as_str())))
        .chain(
            cfg.fanout
                .iter()
                .map(|(n, f)| (n.as_str(), f.reduce.output.as_str())),
        );

    for (owner, output) in outputs {
        if output.trim().is_empty() {
            return Err(config_error(format!("'{owner}' declares an empty output path")));
        }
        if let Some(prev) = owners.insert(output, owner) {
            return Err(config_error(format!(
                "output '{output}' is produced by both '{prev}' and '{owner}'"
            )));
        }
    }
    Ok(())
}

fn validate_stage_templates(cfg: &RawConfigFile) -> Result<()> {
    for (name, stage) in &cfg.stage {
        check_template(
            TemplateKind::Stage,
            &stage.command(),
            &cfg.params,
            Some(stage.inputs.len()),
            Some(stage.outputs.len()),
        )
        .map_err(|e| config_error(format!("stage '{name}': {e}")))?;
    }
    Ok(())
}

fn validate_fanouts(cfg: &RawConfigFile) -> Result<()> {
    for (name, f) in &cfg.fanout {
        if f.batch_size == 0 {
            return Err(config_error(format!("fanout '{name}': batch_size must be >= 1")));
        }
        if f.input.trim().is_empty() {
            return Err(config_error(format!("fanout '{name}': input must not be empty")));
        }
        if f.reduce.workers == 0 {
            return Err(config_error(format!(
                "fanout '{name}': reduce.workers must be >= 1"
            )));
        }

        let re = Regex::new(&f.count_pattern).map_err(|e| {
            config_error(format!("fanout '{name}': invalid count_pattern: {e}"))
        })?;
        if re.captures_len() < 2 {
            return Err(config_error(format!(
                "fanout '{name}': count_pattern needs a capture group for the count"
            )));
        }

        let templates = [
            (TemplateKind::Probe, &f.probe, "probe", Some(1), Some(0)),
            (TemplateKind::Count, &f.count, "count", Some(1), Some(1)),
            (TemplateKind::Merge, &f.merge, "merge", Some(0), Some(1)),
        ];
        for (kind, cmd, label, inputs, outputs) in templates {
            check_template(kind, cmd, &cfg.params, inputs, outputs)
                .map_err(|e| config_error(format!("fanout '{name}' {label}: {e}")))?;
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> dependent. A fan-out is a single node here; its
    // internal checkpoint -> batches -> reduce chain cannot introduce cycles.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.stage.keys().chain(cfg.fanout.keys()) {
        graph.add_node(name.as_str());
    }

    for (name, stage) in &cfg.stage {
        for dep in &stage.after {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }
    for (name, fanout) in &cfg.fanout {
        for dep in &fanout.after {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(CountdagError::DagCycle(format!(
            "cycle detected in stage DAG involving '{}'",
            cycle.node_id()
        ))),
    }
}

fn resolve_resource_classes(
    raw: &BTreeMap<String, ResourceConfig>,
) -> Result<BTreeMap<StageClass, ResourceConfig>> {
    raw.iter()
        .map(|(name, rc)| {
            let class = name
                .parse::<StageClass>()
                .map_err(|e| config_error(format!("[resources.{name}]: {e}")))?;
            Ok((class, rc.clone()))
        })
        .collect()
}

fn validate_resources(resources: &BTreeMap<StageClass, ResourceConfig>) -> Result<()> {
    let policy = ResourcePolicy::from_overrides(resources);

    for (class, p) in policy.iter() {
        let b = p.base;
        if b.cpus == 0 || b.memory_gb == 0 || b.wall_time_h == 0 {
            return Err(config_error(format!(
                "[resources.{class}]: cpus, memory_gb and wall_time_h must all be >= 1"
            )));
        }
        if let Escalation::Step { memory_gb: 0, .. } = p.escalation {
            return Err(config_error(format!(
                "[resources.{class}]: step_memory_gb must be >= 1 so retries ask for more memory"
            )));
        }
        if !b.fits_within(&p.ceiling) {
            return Err(config_error(format!(
                "[resources.{class}]: base request ({b}) exceeds the ceiling ({})",
                p.ceiling
            )));
        }
    }
    Ok(())
}
