// src/logging.rs

//! Logging setup with `tracing-subscriber`'s `EnvFilter`.
//!
//! `--log-level` wins when given and applies to every target. Otherwise
//! `COUNTDAG_LOG` is read as a directive list, so a single area can be
//! turned up, e.g. `COUNTDAG_LOG=info,countdag::exec=debug`. Without either
//! the filter is `info`.
//!
//! Events go to stderr. Stage output never reaches the terminal; it is
//! captured in per-attempt log files under the work directory.

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "COUNTDAG_LOG";

const DEFAULT_DIRECTIVES: &str = "info";

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();
    let filter = build_filter(cli_level, env.as_deref())?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))
}

/// Filter for a CLI level and the raw value of [`LOG_ENV`].
///
/// A blank variable counts as unset; malformed directives are an error
/// rather than silently logging at the wrong level.
pub fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> Result<EnvFilter> {
    if let Some(level) = cli_level {
        return Ok(EnvFilter::new(directive(level)));
    }

    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid {LOG_ENV} directives `{directives}`")),
        None => Ok(EnvFilter::new(DEFAULT_DIRECTIVES)),
    }
}

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
