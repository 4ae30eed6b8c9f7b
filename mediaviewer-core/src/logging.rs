//! Logging bootstrap
//!
//! `LOG_LEVEL` seeds a default filter that keeps the chattier dependencies
//! (SQL layer, request tracing, hyper) at warn; an explicit `RUST_LOG` wins
//! over all of it. `LOG_FORMAT` selects human-readable or JSON output.

use std::str::FromStr;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Output flavor for the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown log format: {s}")),
        }
    }
}

/// Filter directives derived from the configured level.
///
/// Streaming bodies make per-request layers very noisy at debug, so the
/// usual suspects are pinned to warn unless `RUST_LOG` says otherwise.
fn default_directives(level: &str) -> String {
    format!("{level},sqlx=warn,tower_http=warn,hyper=warn")
}

/// Install the global tracing subscriber from configuration.
///
/// An unknown level or format fails startup rather than silently logging
/// nothing.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let format = config
        .format
        .parse::<LogFormat>()
        .map_err(|e| anyhow::anyhow!(e))?;
    let level = config
        .level
        .parse::<tracing::Level>()
        .map_err(|_| anyhow::anyhow!("Invalid log level: {}", config.level))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(default_directives(&level.to_string().to_ascii_lowercase()))
    });

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).init(),
    }

    Ok(())
}
