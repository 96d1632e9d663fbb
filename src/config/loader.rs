// src/config/loader.rs

//! Reading a pipeline config and applying command-line overrides.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::cli::CliArgs;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{CountdagError, Result};

/// Read and deserialize a config file without validating it.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        CountdagError::ConfigError(format!("cannot read {}: {e}", path.display()))
    })?;
    Ok(toml::from_str(&contents)?)
}

/// Parse and validate config text.
pub fn parse_config(text: &str) -> Result<ConfigFile> {
    let raw: RawConfigFile = toml::from_str(text)?;
    ConfigFile::try_from(raw)
}

/// Read a config file and validate it (see `config::validate`).
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    ConfigFile::try_from(load_from_path(path)?)
}

/// Load the config named on the command line, then let `--work-dir` and
/// `--install-root` replace the file's values. Empty overrides are ignored.
pub fn load_for_cli(args: &CliArgs) -> Result<ConfigFile> {
    let mut cfg = load_and_validate(&args.config)?;

    if let Some(dir) = args.work_dir.as_ref().filter(|d| !d.is_empty()) {
        debug!(work_dir = %dir, "overriding work_dir from CLI");
        cfg.config.work_dir = dir.clone();
    }
    if let Some(root) = args.install_root.as_ref().filter(|r| !r.is_empty()) {
        debug!(install_root = %root, "overriding install_root from CLI");
        cfg.config.install_root = root.clone();
    }
    Ok(cfg)
}
