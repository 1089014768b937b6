//! Controller configuration.

use crate::errors::ConfigError;
use crate::policies::DEFAULT_ANOMALOUS_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Configuration for a [`crate::pipeline::PipelineController`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory under which stage working directories are allocated.
    #[serde(default = "default_base_directory")]
    pub base_directory: PathBuf,
    /// Minimum number of images a request must span.
    #[serde(default = "default_min_images")]
    pub min_images: u64,
    /// Overall CC(1/2) value at or above which anomalous signal is present.
    #[serde(default = "default_anomalous_threshold")]
    pub anomalous_threshold: f64,
    /// Program name recorded with tracked attempts.
    #[serde(default = "default_program_name")]
    pub program_name: String,
    /// Command line recorded with tracked attempts.
    #[serde(default)]
    pub command_line: String,
    /// Per-stage timeout in seconds for command stages.
    #[serde(default)]
    pub stage_timeout_seconds: Option<f64>,
    /// Base URL of the tracking service.
    #[serde(default)]
    pub tracking_url: Option<String>,
    /// Timeout for tracking-service requests in seconds.
    #[serde(default = "default_tracking_timeout")]
    pub tracking_timeout_seconds: f64,
    /// Log filter directive, e.g. `autoproc=debug`.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_base_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_min_images() -> u64 {
    8
}

fn default_anomalous_threshold() -> f64 {
    DEFAULT_ANOMALOUS_THRESHOLD
}

fn default_program_name() -> String {
    "autoproc".to_string()
}

fn default_tracking_timeout() -> f64 {
    10.0
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_directory: default_base_directory(),
            min_images: default_min_images(),
            anomalous_threshold: default_anomalous_threshold(),
            program_name: default_program_name(),
            command_line: String::new(),
            stage_timeout_seconds: None,
            tracking_url: None,
            tracking_timeout_seconds: default_tracking_timeout(),
            log_filter: default_log_filter(),
            log_format: LogFormat::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed or fails
    /// validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if parsing or validation fails.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_images == 0 {
            return Err(ConfigError::invalid("min_images", "must be at least 1"));
        }
        if !self.anomalous_threshold.is_finite() || self.anomalous_threshold < 0.0 {
            return Err(ConfigError::invalid(
                "anomalous_threshold",
                format!("must be a non-negative number, got {}", self.anomalous_threshold),
            ));
        }
        if let Some(seconds) = self.stage_timeout_seconds {
            if positive_duration(seconds).is_none() {
                return Err(ConfigError::invalid(
                    "stage_timeout_seconds",
                    format!("must be a positive number of seconds, got {seconds}"),
                ));
            }
        }
        if positive_duration(self.tracking_timeout_seconds).is_none() {
            return Err(ConfigError::invalid(
                "tracking_timeout_seconds",
                format!("must be a positive number of seconds, got {}", self.tracking_timeout_seconds),
            ));
        }
        if self.program_name.trim().is_empty() {
            return Err(ConfigError::invalid("program_name", "must not be empty"));
        }
        Ok(())
    }

    /// Sets the base directory.
    #[must_use]
    pub fn with_base_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_directory = path.into();
        self
    }

    /// Sets the minimum image count.
    #[must_use]
    pub fn with_min_images(mut self, min_images: u64) -> Self {
        self.min_images = min_images;
        self
    }

    /// Sets the anomalous-signal threshold.
    #[must_use]
    pub fn with_anomalous_threshold(mut self, threshold: f64) -> Self {
        self.anomalous_threshold = threshold;
        self
    }

    /// Sets the program name.
    #[must_use]
    pub fn with_program_name(mut self, name: impl Into<String>) -> Self {
        self.program_name = name.into();
        self
    }

    /// Sets the recorded command line.
    #[must_use]
    pub fn with_command_line(mut self, command_line: impl Into<String>) -> Self {
        self.command_line = command_line.into();
        self
    }

    /// Sets the stage timeout.
    #[must_use]
    pub fn with_stage_timeout(mut self, seconds: f64) -> Self {
        self.stage_timeout_seconds = Some(seconds);
        self
    }

    /// Sets the tracking service URL.
    #[must_use]
    pub fn with_tracking_url(mut self, url: impl Into<String>) -> Self {
        self.tracking_url = Some(url.into());
        self
    }

    /// Gets the stage timeout as a Duration.
    ///
    /// Values that are not a positive, representable number of seconds mean
    /// "no timeout"; [`validate`](Self::validate) rejects them.
    #[must_use]
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_seconds.and_then(positive_duration)
    }

    /// Gets the tracking timeout as a Duration.
    ///
    /// Falls back to the default when the configured value is unusable.
    #[must_use]
    pub fn tracking_timeout(&self) -> Duration {
        positive_duration(self.tracking_timeout_seconds)
            .unwrap_or_else(|| Duration::from_secs_f64(default_tracking_timeout()))
    }
}

fn positive_duration(seconds: f64) -> Option<Duration> {
    if seconds > 0.0 {
        Duration::try_from_secs_f64(seconds).ok()
    } else {
        None
    }
}
