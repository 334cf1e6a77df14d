use anyhow::{anyhow, Context, Result};
use std::fs::{self, OpenOptions};
use std::path::Path;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Filter used when `RUST_LOG` is unset or invalid
const DEFAULT_FILTER: &str = "info";

/// Initialize telemetry logging
///
/// With telemetry enabled, logs are appended to `log_path` (`~` expanded);
/// otherwise they go to stdout. `RUST_LOG` overrides the default level.
///
/// # Errors
/// Returns error if the log file cannot be opened or a global subscriber is already set
pub fn init(enabled: bool, log_path: &str) -> Result<()> {
    if !enabled {
        // Basic stdout logging only
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(false)
            .try_init()
            .map_err(|e| anyhow!("failed to install log subscriber: {e}"))?;
        return Ok(());
    }

    let expanded_path = Config::expand_path(log_path)?;
    let file = open_log_file(&expanded_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(file)
        .with_target(false)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))?;

    tracing::info!(path = %expanded_path.display(), "telemetry initialized");

    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn open_log_file(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create log directory")?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("failed to open log file")
}
