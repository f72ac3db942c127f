//! Process-wide tracing setup.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::{fmt, prelude::*};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Builds the filter: `RUST_LOG` when set, otherwise the configured level.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(&config.level),
    }
    .map_err(|e| ConfigError::Logging(format!("invalid log filter: {}", e)))
}

/// Installs the global subscriber and routes `log` records into it.
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = build_filter(config)?;
    let json_layer = config
        .json
        .then(|| fmt::layer().json().with_current_span(true));
    let text_layer = (!config.json).then(|| fmt::layer().with_target(true));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| ConfigError::Logging(e.to_string()))
}
