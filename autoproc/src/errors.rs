//! Error types for the autoproc pipeline.
//!
//! The taxonomy follows the four failure classes the controller
//! distinguishes: precondition, policy, stage and tracking failures. Tracking
//! failures never escape the [`StatusReporter`](crate::tracking::StatusReporter);
//! the remaining classes terminate the run and end up in the final report.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request was rejected before any stage was started.
    #[error("{0}")]
    Precondition(#[from] PreconditionError),

    /// A policy could not produce a value for the active branch.
    #[error("Policy failure at '{stage}': {source}")]
    Policy {
        /// The pipeline step that applied the policy.
        stage: String,
        /// The underlying policy error.
        #[source]
        source: PolicyError,
    },

    /// A stage reported failure.
    #[error("Stage '{stage}' failed: {reason}")]
    Stage {
        /// The stage name.
        stage: String,
        /// Reason reported by the stage runner.
        reason: String,
    },

    /// No runner is registered for a stage the graph needs.
    #[error("No runner registered for stage '{0}'")]
    MissingRunner(String),

    /// A working directory could not be claimed.
    #[error("Workspace error at {}: {source}", path.display())]
    Workspace {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration was invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A stage task panicked or could not be joined.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Creates a stage failure.
    #[must_use]
    pub fn stage(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Creates a policy failure attributed to a pipeline step.
    #[must_use]
    pub fn policy(stage: impl Into<String>, source: PolicyError) -> Self {
        Self::Policy {
            stage: stage.into(),
            source,
        }
    }

    /// Returns the failure class used in reports.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Precondition(_) => FailureKind::Precondition,
            Self::Policy { .. } => FailureKind::Policy,
            Self::Stage { .. } => FailureKind::Stage,
            _ => FailureKind::Internal,
        }
    }

    /// Returns the name of the stage the error is attributed to, if any.
    #[must_use]
    pub fn stage_name(&self) -> Option<&str> {
        match self {
            Self::Stage { stage, .. } | Self::Policy { stage, .. } | Self::MissingRunner(stage) => {
                Some(stage.as_str())
            }
            _ => None,
        }
    }
}

/// Coarse failure class recorded in the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Request validation failed.
    Precondition,
    /// A policy produced no value.
    Policy,
    /// A stage failed.
    Stage,
    /// Anything else (IO, join errors, configuration).
    Internal,
}

/// Errors raised while validating a [`PipelineRequest`](crate::pipeline::PipelineRequest).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PreconditionError {
    /// The image range is too short to process.
    #[error("There are fewer than {minimum} images ({found}), aborting")]
    InsufficientImages {
        /// Number of images in the requested range.
        found: u64,
        /// The configured minimum.
        minimum: u64,
    },

    /// The image range is inverted.
    #[error("Invalid image range: {start}..={end}")]
    InvalidImageRange {
        /// First image number.
        start: u32,
        /// Last image number.
        end: u32,
    },

    /// A required request field is absent.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// The master file name does not follow the `<template>_master.h5` pattern.
    #[error("File template not found: {0}")]
    InvalidMasterFile(String),

    /// The unit cell string could not be parsed.
    #[error("Invalid unit cell '{0}': expected six numbers")]
    InvalidUnitCell(String),

    /// The space group could not be parsed.
    #[error("Invalid space group: {0}")]
    InvalidSpaceGroup(String),
}

/// Errors raised by the pure decision policies.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    /// No resolution shell is flagged for inclusion.
    #[error(
        "no shell meets the correlation-coefficient threshold, typically >=0.30 \
         ({shells} shells inspected)"
    )]
    NoQualifyingShell {
        /// Number of shells that were inspected.
        shells: usize,
    },

    /// The stage result carried no completeness table.
    #[error("stage '{0}' produced no completeness entries")]
    MissingCompleteness(String),
}

/// Errors returned by tracking-service implementations.
///
/// These are logged and swallowed by the status reporter.
#[derive(Debug, Clone, Error)]
pub enum TrackingError {
    /// The service could not be reached.
    #[error("Tracking service unavailable: {0}")]
    Unavailable(String),

    /// The service rejected the request.
    #[error("Tracking service rejected request ({status}): {message}")]
    Rejected {
        /// Status code or category.
        status: u16,
        /// Message from the service.
        message: String,
    },

    /// The response could not be interpreted.
    #[error("Invalid tracking response: {0}")]
    InvalidResponse(String),
}

impl TrackingError {
    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        match self {
            Self::Unavailable(reason) => {
                map.insert("type".to_string(), serde_json::json!("TrackingUnavailable"));
                map.insert("reason".to_string(), serde_json::json!(reason));
            }
            Self::Rejected { status, message } => {
                map.insert("type".to_string(), serde_json::json!("TrackingRejected"));
                map.insert("status".to_string(), serde_json::json!(status));
                map.insert("reason".to_string(), serde_json::json!(message));
            }
            Self::InvalidResponse(reason) => {
                map.insert("type".to_string(), serde_json::json!("TrackingInvalidResponse"));
                map.insert("reason".to_string(), serde_json::json!(reason));
            }
        }
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        /// The configuration path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A configuration value is out of range.
    #[error("Invalid config value for '{field}': {message}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_carries_stage_name() {
        let err = PipelineError::stage("integration", "XDS exited with status 1");

        assert_eq!(err.stage_name(), Some("integration"));
        assert_eq!(err.kind(), FailureKind::Stage);
        assert!(err.to_string().contains("XDS exited with status 1"));
    }

    #[test]
    fn test_policy_error_is_attributed() {
        let err = PipelineError::policy(
            "resolution_cutoff",
            PolicyError::NoQualifyingShell { shells: 10 },
        );

        assert_eq!(err.stage_name(), Some("resolution_cutoff"));
        assert_eq!(err.kind(), FailureKind::Policy);
        assert!(err.to_string().contains("0.30"));
    }

    #[test]
    fn test_precondition_has_no_stage() {
        let err: PipelineError = PreconditionError::InsufficientImages {
            found: 6,
            minimum: 8,
        }
        .into();

        assert_eq!(err.stage_name(), None);
        assert_eq!(err.kind(), FailureKind::Precondition);
        assert!(err.to_string().contains("fewer than 8 images"));
    }

    #[test]
    fn test_tracking_error_to_dict() {
        let err = TrackingError::Rejected {
            status: 503,
            message: "busy".to_string(),
        };
        let dict = err.to_dict();

        assert_eq!(dict.get("type").unwrap(), "TrackingRejected");
        assert_eq!(dict.get("status").unwrap(), 503);
    }

    #[test]
    fn test_failure_kind_serialize() {
        let json = serde_json::to_string(&FailureKind::Precondition).unwrap();
        assert_eq!(json, r#""precondition""#);
    }
}
