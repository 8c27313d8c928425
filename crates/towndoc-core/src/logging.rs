//! Structured logging setup.
//!
//! Diagnostics go to stderr so report output on stdout stays machine-readable.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{CoreError, Result};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Console,
    Json,
}

impl LogFormat {
    /// Parse a format string (defaults to Console).
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Console,
        }
    }
}

/// Build the level filter for a configured level such as `info` or a full
/// directive like `towndoc_doctor=debug,warn`.
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    let directive = if level.trim().is_empty() {
        "warn"
    } else {
        level.trim()
    };
    EnvFilter::try_new(directive)
        .map_err(|err| CoreError::Config(format!("logging.level {directive:?}: {err}")))
}

/// Install the global subscriber. Calling it twice is harmless; the first
/// subscriber stays in place.
pub fn init(cfg: &LoggingConfig) -> Result<()> {
    let filter = build_filter(&cfg.level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = match LogFormat::parse(&cfg.format) {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Console => builder.compact().try_init(),
    };
    if installed.is_err() {
        tracing::debug!("global subscriber already installed");
    }
    Ok(())
}
