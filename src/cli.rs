// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `countdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "countdag",
    version,
    about = "Run a counting pipeline whose fan-out is decided by a checkpoint stage.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Countdag.toml")]
    pub config: String,

    /// Override `[config].work_dir`.
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<String>,

    /// Override `[config].install_root` (tools are run from `<root>/bin`).
    #[arg(long, value_name = "DIR")]
    pub install_root: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `COUNTDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the graph, but don't execute any commands.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
