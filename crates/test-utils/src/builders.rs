#![allow(dead_code)]

use std::collections::BTreeMap;

use countdag::config::{
    CommandConfig, ConfigFile, ConfigSection, FanoutConfig, ParamValue, RawConfigFile,
    ReduceConfig, ResourceConfig, StageConfig,
};
use countdag::config::model::DEFAULT_COUNT_PATTERN;
use countdag::errors::Result;
use countdag::types::{FailurePolicy, StageClass};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                params: BTreeMap::new(),
                resources: BTreeMap::new(),
                stage: BTreeMap::new(),
                fanout: BTreeMap::new(),
            },
        }
    }

    pub fn with_stage(mut self, name: &str, stage: StageConfig) -> Self {
        self.config.stage.insert(name.to_string(), stage);
        self
    }

    pub fn with_fanout(mut self, name: &str, fanout: FanoutConfig) -> Self {
        self.config.fanout.insert(name.to_string(), fanout);
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.config.params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_resources(mut self, class: &str, resources: ResourceConfig) -> Self {
        self.config.resources.insert(class.to_string(), resources);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.config.max_attempts = n;
        self
    }

    pub fn budget(mut self, cpus: u32, memory_gb: u32) -> Self {
        self.config.config.cpu_budget = cpus;
        self.config.config.memory_budget_gb = memory_gb;
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.config.config.on_failure = policy;
        self
    }

    pub fn work_dir(mut self, dir: impl AsRef<std::path::Path>) -> Self {
        self.config.config.work_dir = dir.as_ref().to_string_lossy().into_owned();
        self
    }

    pub fn install_root(mut self, dir: impl AsRef<std::path::Path>) -> Self {
        self.config.config.install_root = dir.as_ref().to_string_lossy().into_owned();
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `StageConfig`.
pub struct StageConfigBuilder {
    stage: StageConfig,
}

impl StageConfigBuilder {
    pub fn new(tool: &str) -> Self {
        Self {
            stage: StageConfig {
                class: StageClass::Light,
                tool: tool.to_string(),
                args: vec![],
                inputs: vec![],
                outputs: vec![],
                after: vec![],
            },
        }
    }

    pub fn class(mut self, class: StageClass) -> Self {
        self.stage.class = class;
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.stage.args.push(arg.to_string());
        self
    }

    pub fn input(mut self, path: &str) -> Self {
        self.stage.inputs.push(path.to_string());
        self
    }

    pub fn output(mut self, path: &str) -> Self {
        self.stage.outputs.push(path.to_string());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.stage.after.push(dep.to_string());
        self
    }

    pub fn build(self) -> StageConfig {
        self.stage
    }
}

/// Builder for `FanoutConfig`.
///
/// Defaults to the shell-friendly tool names used by the executor tests:
/// `probe <input> <scratch>`, `count <unit> <input> <output>` and
/// `merge <output> <parts...>`.
pub struct FanoutConfigBuilder {
    fanout: FanoutConfig,
}

impl FanoutConfigBuilder {
    pub fn new(input: &str, output: &str) -> Self {
        Self {
            fanout: FanoutConfig {
                after: vec![],
                input: input.to_string(),
                batch_size: 4,
                count_pattern: DEFAULT_COUNT_PATTERN.to_string(),
                probe: command("probe", &["{input}", "{scratch}"]),
                count: command("count", &["{unit}", "{input}", "{output}"]),
                merge: command("merge", &["{output}", "{parts}"]),
                reduce: ReduceConfig {
                    output: output.to_string(),
                    threshold: 1,
                    workers: 4,
                },
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.fanout.after.push(dep.to_string());
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.fanout.batch_size = size;
        self
    }

    pub fn count_pattern(mut self, pattern: &str) -> Self {
        self.fanout.count_pattern = pattern.to_string();
        self
    }

    pub fn probe(mut self, tool: &str, args: &[&str]) -> Self {
        self.fanout.probe = command(tool, args);
        self
    }

    pub fn count(mut self, tool: &str, args: &[&str]) -> Self {
        self.fanout.count = command(tool, args);
        self
    }

    pub fn merge(mut self, tool: &str, args: &[&str]) -> Self {
        self.fanout.merge = command(tool, args);
        self
    }

    pub fn threshold(mut self, threshold: u64) -> Self {
        self.fanout.reduce.threshold = threshold;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.fanout.reduce.workers = workers;
        self
    }

    pub fn build(self) -> FanoutConfig {
        self.fanout
    }
}

pub fn command(tool: &str, args: &[&str]) -> CommandConfig {
    CommandConfig {
        tool: tool.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
    }
}
