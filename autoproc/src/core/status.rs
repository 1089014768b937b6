//! Tracking and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a stage transition as reported to the tracking service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingStatus {
    /// The stage group was started.
    Launched,
    /// The stage group finished successfully.
    Successful,
    /// The stage group failed.
    Failed,
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Launched => write!(f, "Launched"),
            Self::Successful => write!(f, "Successful"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Terminal status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run has not reached a terminal state.
    #[default]
    Running,
    /// Every stage on the active path succeeded.
    Success,
    /// The run stopped at the first unrecoverable failure.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl RunStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}
