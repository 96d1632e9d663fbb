// src/config/mod.rs

//! Configuration loading and validation for countdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate invariants like DAG correctness and template placeholders
//!   (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_for_cli, load_from_path, parse_config};
pub use model::{
    CommandConfig, ConfigFile, ConfigSection, EscalationKind, FanoutConfig, ParamValue, Params,
    RawConfigFile, ReduceConfig, ResourceConfig, StageConfig,
};
