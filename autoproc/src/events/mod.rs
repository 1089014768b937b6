//! Structured pipeline events for local observability.
//!
//! Events are emitted to an [`EventSink`] injected into the controller; there
//! is no process-wide sink. External status tracking is a separate concern
//! handled by [`crate::tracking`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One event emitted by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Event type, e.g. `group.started`.
    pub event_type: String,
    /// Run the event belongs to.
    pub run_id: Uuid,
    /// Event payload.
    pub data: serde_json::Value,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    /// Creates an event stamped now.
    #[must_use]
    pub fn new(event_type: impl Into<String>, run_id: Uuid, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            run_id,
            data,
            timestamp: Utc::now(),
        }
    }
}
