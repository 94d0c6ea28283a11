//! Logging setup.
//!
//! Installs a `tracing` subscriber and bridges the `log` macros used by the
//! store and watcher into it.

use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LogSettings};
use crate::error::ConfigError;

/// Builds the filter: `RUST_LOG` when set and valid, otherwise the configured default.
pub fn env_filter(settings: &LogSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.default_directive))
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(settings: &LogSettings) -> Result<(), ConfigError> {
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match settings.format {
        LogFormat::Text => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
    };

    let subscriber = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter(settings));

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| ConfigError::Logging(e.to_string()))?;

    Ok(())
}
