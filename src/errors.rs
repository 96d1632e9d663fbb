// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CountdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Stage not found: {0}")]
    StageNotFound(String),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// A stage produced output that violates its contract (missing or
    /// malformed). More resources cannot fix these, so they are never retried.
    #[error("Structural failure in stage '{stage}': {message}")]
    Structural { stage: String, message: String },

    /// The run finished with at least one stage failed for good.
    #[error("Run failed: {}", failed.join("; "))]
    RunFailed { failed: Vec<String> },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CountdagError>;
