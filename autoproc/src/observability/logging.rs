//! Global `tracing` subscriber setup.

use crate::config::{LogFormat, PipelineConfig};
use crate::errors::ConfigError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Builds the level filter for a run.
///
/// `RUST_LOG` wins over the configured directive when it is set.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the configured directive does not parse.
pub fn log_filter(directive: &str) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(directive).map_err(|e| ConfigError::invalid("log_filter", e.to_string()))
}

/// Installs the global subscriber described by the configuration.
///
/// Returns `false` when a subscriber was already installed, which is the
/// normal case in tests and when an embedding application set up its own.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the log filter is malformed.
pub fn init_logging(config: &PipelineConfig) -> Result<bool, ConfigError> {
    let filter = log_filter(&config.log_filter)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.log_format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
    };
    Ok(installed.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_config_error() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let err = log_filter("autoproc=[[").unwrap_err();
        assert!(err.to_string().contains("log_filter"));
    }

    #[test]
    fn test_second_init_is_not_an_error() {
        let config = PipelineConfig::default();
        let _ = init_logging(&config).unwrap();
        assert!(!init_logging(&config.clone()).unwrap());
    }

    #[test]
    fn test_json_format_accepted() {
        let mut config = PipelineConfig::default();
        config.log_format = LogFormat::Json;
        config.log_filter = "autoproc=debug,warn".to_string();
        assert!(init_logging(&config).is_ok());
    }
}
