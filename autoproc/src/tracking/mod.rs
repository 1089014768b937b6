//! Tracking-service boundary and the best-effort status reporter.
//!
//! A tracking service issues one [`TrackingHandle`] per processing attempt
//! (one per branch) and receives stage transitions for it. Nothing in this
//! module is allowed to fail a pipeline run: the [`StatusReporter`] logs and
//! swallows every service error.

#[cfg(feature = "http-tracking")]
mod http;
mod reporter;
mod services;

#[cfg(feature = "http-tracking")]
pub use http::HttpTrackingService;
pub use reporter::StatusReporter;
pub use services::{
    CollectingTrackingService, LoggingTrackingService, NoOpTrackingService, TrackingCall,
};

use crate::core::{Branch, TrackingStatus};
use crate::errors::TrackingError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifiers for one tracked processing attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingHandle {
    /// Branch this attempt covers.
    pub branch: Branch,
    /// Integration identifier issued by the service.
    pub integration_id: String,
    /// Program identifier issued by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
}

impl TrackingHandle {
    /// Creates a handle.
    #[must_use]
    pub fn new(branch: Branch, integration_id: impl Into<String>) -> Self {
        Self {
            branch,
            integration_id: integration_id.into(),
            program_id: None,
        }
    }

    /// Sets the program identifier.
    #[must_use]
    pub fn with_program_id(mut self, program_id: impl Into<String>) -> Self {
        self.program_id = Some(program_id.into());
        self
    }
}

/// Parameters for opening a tracked processing attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRequest {
    /// Dataset identifier.
    pub dataset_id: String,
    /// Command line recorded with the attempt.
    pub command_line: String,
    /// Program name recorded with the attempt.
    pub program_name: String,
    /// Whether the attempt covers the anomalous branch.
    pub anomalous: bool,
    /// When processing started.
    pub start_time: DateTime<Utc>,
    /// Free-text comment for the initial status.
    pub comment: String,
}

impl TrackingRequest {
    /// Branch covered by the attempt.
    #[must_use]
    pub fn branch(&self) -> Branch {
        if self.anomalous {
            Branch::Anomalous
        } else {
            Branch::NonAnomalous
        }
    }
}

/// A stage transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Tracking step name (e.g. `Indexing`).
    pub stage: String,
    /// New status.
    pub status: TrackingStatus,
    /// Free-text comment.
    pub comment: String,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    /// Creates an event stamped now.
    #[must_use]
    pub fn now(stage: impl Into<String>, status: TrackingStatus, comment: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            status,
            comment: comment.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Final record sent when a processing attempt is abandoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Dataset identifier.
    pub dataset_id: String,
    /// Command line recorded with the attempt.
    pub command_line: String,
    /// Program name recorded with the attempt.
    pub program_name: String,
    /// When processing started.
    pub start_time: DateTime<Utc>,
    /// When processing stopped.
    pub end_time: DateTime<Utc>,
    /// Where and why processing stopped.
    pub reason: String,
}

/// External status-tracking collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackingService: Send + Sync {
    /// Opens a tracked processing attempt.
    async fn begin_tracking(&self, request: &TrackingRequest) -> Result<TrackingHandle, TrackingError>;

    /// Records a stage transition.
    async fn report_status(&self, handle: &TrackingHandle, event: &StatusEvent) -> Result<(), TrackingError>;

    /// Marks an attempt as failed.
    async fn mark_failed(&self, handle: &TrackingHandle, record: &FailureRecord) -> Result<(), TrackingError>;
}
