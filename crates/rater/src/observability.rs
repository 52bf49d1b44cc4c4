//! Structured logging setup

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{EstimatorError, Result};
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber
///
/// Logs go to stderr so stdout stays free for the run summary. `RUST_LOG`
/// takes precedence over the configured level. Fails if a global subscriber
/// is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init(),
    };

    installed.map_err(|e| EstimatorError::Configuration {
        message: format!("Failed to initialize logging: {}", e),
        key: Some("logging".to_string()),
    })
}
