//! Tracing/logging initialization.
//!
//! Filtering comes from `RUST_LOG` (default `info`). Output is JSON unless
//! `BOXTREE_LOG_FORMAT=pretty` asks for human-readable lines.

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const ENV_LOG_FORMAT: &str = "BOXTREE_LOG_FORMAT";

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log format '{0}' (expected json or pretty)")]
pub struct ParseLogFormatError(pub String);

impl FromStr for LogFormat {
    type Err = ParseLogFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(ParseLogFormatError(other.to_string())),
        }
    }
}

/// Initialize tracing/logging for the process.
///
/// An unreadable `BOXTREE_LOG_FORMAT` falls back to JSON and says so once the
/// subscriber is installed.
pub fn init() {
    let raw = std::env::var(ENV_LOG_FORMAT).ok();
    let parsed = raw.as_deref().map(LogFormat::from_str).transpose();

    match parsed {
        Ok(format) => init_with(format.unwrap_or_default()),
        Err(err) => {
            init_with(LogFormat::Json);
            tracing::warn!(error = %err, "ignoring {ENV_LOG_FORMAT}");
        }
    }
}

/// Initialize with an explicit format. Safe to call multiple times.
pub fn init_with(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_thread_names(true);

    let _ = match format {
        LogFormat::Json => builder.json().with_target(false).try_init(),
        LogFormat::Pretty => builder.with_target(true).try_init(),
    };
}
