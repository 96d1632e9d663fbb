// src/config/model.rs

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::types::{FailurePolicy, StageClass};

/// Read-only mapping from option name to value, supplied at run start and
/// substituted into command templates through `{params.<key>}`.
pub type Params = BTreeMap<String, ParamValue>;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// install_root = "/opt/kmer-tools"
/// max_attempts = 3
///
/// [params]
/// kmer_size = 25
///
/// [stage.prepare]
/// tool = "prep"
/// args = ["{input}", "{output}"]
/// inputs = ["reads.fa"]
/// outputs = ["prepared.fa"]
///
/// [fanout.kmers]
/// after = ["prepare"]
/// input = "prepared.fa"
/// probe = { tool = "counter", args = ["plan", "{input}", "{scratch}"] }
/// count = { tool = "counter", args = ["count", "{unit}", "{input}", "{output}"] }
/// merge = { tool = "counter", args = ["merge", "{output}", "{parts}"] }
/// reduce = { output = "kmers.txt", threshold = 1 }
/// ```
///
/// All sections are optional and have reasonable defaults, but validation
/// requires at least one stage or fan-out.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub params: Params,

    /// Per-class overrides from `[resources.<class>]`, keyed by class name.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceConfig>,

    /// Static stages from `[stage.<name>]`.
    #[serde(default)]
    pub stage: BTreeMap<String, StageConfig>,

    /// Checkpoint-driven fan-outs from `[fanout.<name>]`.
    #[serde(default)]
    pub fanout: BTreeMap<String, FanoutConfig>,
}

/// Validated configuration.
///
/// Only constructible through `TryFrom<RawConfigFile>` (see
/// `config::validate`), so holders can rely on the DAG being acyclic and
/// every reference being resolvable.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub params: Params,
    pub resources: BTreeMap<StageClass, ResourceConfig>,
    pub stage: BTreeMap<String, StageConfig>,
    pub fanout: BTreeMap<String, FanoutConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        params: Params,
        resources: BTreeMap<StageClass, ResourceConfig>,
        stage: BTreeMap<String, StageConfig>,
        fanout: BTreeMap<String, FanoutConfig>,
    ) -> Self {
        Self {
            config,
            params,
            resources,
            stage,
            fanout,
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Installation root of the external tools; commands run from `<root>/bin`.
    #[serde(default = "default_install_root")]
    pub install_root: String,

    /// Root directory for all stage working directories and artifacts.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    /// Retry ceiling: the maximum number of attempts per stage.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Total CPUs that may be in flight at once.
    #[serde(default = "default_cpu_budget")]
    pub cpu_budget: u32,

    /// Total memory (GB) that may be in flight at once.
    #[serde(default = "default_memory_budget_gb")]
    pub memory_budget_gb: u32,

    #[serde(default)]
    pub on_failure: FailurePolicy,
}

fn default_install_root() -> String {
    ".".to_string()
}

fn default_work_dir() -> String {
    "work".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_cpu_budget() -> u32 {
    8
}

fn default_memory_budget_gb() -> u32 {
    32
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            install_root: default_install_root(),
            work_dir: default_work_dir(),
            max_attempts: default_max_attempts(),
            cpu_budget: default_cpu_budget(),
            memory_budget_gb: default_memory_budget_gb(),
            on_failure: FailurePolicy::default(),
        }
    }
}

/// A single parameter value. TOML scalars are accepted as-is and rendered
/// with their natural textual form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

/// How a class's request grows from one attempt to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationKind {
    Double,
    Step,
    Fixed,
}

/// `[resources.<class>]` section. Unset fields keep the built-in default for
/// that class.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub cpus: Option<u32>,
    #[serde(default)]
    pub memory_gb: Option<u32>,
    #[serde(default)]
    pub wall_time_h: Option<u32>,
    #[serde(default)]
    pub escalation: Option<EscalationKind>,
    /// Memory added per retry when `escalation = "step"`.
    #[serde(default)]
    pub step_memory_gb: Option<u32>,
    /// Wall time added per retry when `escalation = "step"`.
    #[serde(default)]
    pub step_wall_time_h: Option<u32>,
    #[serde(default)]
    pub max_cpus: Option<u32>,
    #[serde(default)]
    pub max_memory_gb: Option<u32>,
    #[serde(default)]
    pub max_wall_time_h: Option<u32>,
}

/// An external tool invocation: the tool name (resolved against
/// `<install_root>/bin`) plus argument templates.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandConfig {
    pub tool: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// `[stage.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    #[serde(default)]
    pub class: StageClass,

    pub tool: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Input artifact paths, relative to the work directory unless absolute.
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Output artifact paths this stage owns.
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Stages or fan-outs that must succeed first.
    #[serde(default)]
    pub after: Vec<String>,
}

impl StageConfig {
    pub fn command(&self) -> CommandConfig {
        CommandConfig {
            tool: self.tool.clone(),
            args: self.args.clone(),
        }
    }
}

/// `[fanout.<name>]` section: a checkpoint, the batches it implies, and the
/// reducer over their outputs.
#[derive(Debug, Clone, Deserialize)]
pub struct FanoutConfig {
    /// Static stages the checkpoint waits for.
    #[serde(default)]
    pub after: Vec<String>,

    /// Shared input artifact the elementary units slice.
    pub input: String,

    /// Elementary units per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Regex run against the probe's output; capture group 1 is the unit count.
    #[serde(default = "default_count_pattern")]
    pub count_pattern: String,

    pub probe: CommandConfig,
    pub count: CommandConfig,
    pub merge: CommandConfig,
    pub reduce: ReduceConfig,
}

pub const DEFAULT_COUNT_PATTERN: &str = r"(?mi)^\s*batches\s*[:=]\s*(\d+)\s*$";

fn default_batch_size() -> usize {
    crate::plan::batch::DEFAULT_BATCH_SIZE
}

fn default_count_pattern() -> String {
    DEFAULT_COUNT_PATTERN.to_string()
}

/// Inline `reduce = { ... }` table of a fan-out.
#[derive(Debug, Clone, Deserialize)]
pub struct ReduceConfig {
    /// Final artifact path.
    pub output: String,

    /// Keep keys whose combined count is strictly greater than this.
    #[serde(default = "default_threshold")]
    pub threshold: u64,

    /// Parallel filter workers (one temporary fragment each).
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_threshold() -> u64 {
    1
}

fn default_workers() -> usize {
    4
}
