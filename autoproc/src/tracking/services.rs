//! In-process tracking service implementations.

use super::{FailureRecord, StatusEvent, TrackingHandle, TrackingRequest, TrackingService};
use crate::errors::TrackingError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// A tracking service that issues local handles and records nothing.
///
/// Used when a run is offline.
#[derive(Debug, Default)]
pub struct NoOpTrackingService {
    next_id: AtomicU64,
}

impl NoOpTrackingService {
    /// Creates a new no-op service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackingService for NoOpTrackingService {
    async fn begin_tracking(&self, request: &TrackingRequest) -> Result<TrackingHandle, TrackingError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(TrackingHandle::new(request.branch(), format!("local-{id}")))
    }

    async fn report_status(&self, _handle: &TrackingHandle, _event: &StatusEvent) -> Result<(), TrackingError> {
        Ok(())
    }

    async fn mark_failed(&self, _handle: &TrackingHandle, _record: &FailureRecord) -> Result<(), TrackingError> {
        Ok(())
    }
}

/// A tracking service that writes every call to the tracing log.
#[derive(Debug, Default)]
pub struct LoggingTrackingService {
    next_id: AtomicU64,
}

impl LoggingTrackingService {
    /// Creates a new logging service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackingService for LoggingTrackingService {
    async fn begin_tracking(&self, request: &TrackingRequest) -> Result<TrackingHandle, TrackingError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = TrackingHandle::new(request.branch(), id.to_string());
        info!(
            dataset_id = %request.dataset_id,
            branch = %handle.branch,
            integration_id = %handle.integration_id,
            program = %request.program_name,
            "Tracking: begin"
        );
        Ok(handle)
    }

    async fn report_status(&self, handle: &TrackingHandle, event: &StatusEvent) -> Result<(), TrackingError> {
        info!(
            integration_id = %handle.integration_id,
            step = %event.stage,
            status = %event.status,
            comment = %event.comment,
            "Tracking: status"
        );
        Ok(())
    }

    async fn mark_failed(&self, handle: &TrackingHandle, record: &FailureRecord) -> Result<(), TrackingError> {
        warn!(
            integration_id = %handle.integration_id,
            reason = %record.reason,
            "Tracking: failed"
        );
        Ok(())
    }
}

/// One recorded call on a [`CollectingTrackingService`].
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingCall {
    /// `begin_tracking` was called.
    Begin(TrackingRequest),
    /// `report_status` was called.
    Status(TrackingHandle, StatusEvent),
    /// `mark_failed` was called.
    Failed(TrackingHandle, FailureRecord),
}

/// A collecting tracking service for tests and dry runs.
///
/// Calls are recorded even when failure injection makes them return an
/// error.
#[derive(Debug, Default)]
pub struct CollectingTrackingService {
    calls: RwLock<Vec<TrackingCall>>,
    next_id: AtomicU64,
    fail_begin: bool,
    fail_report: bool,
}

impl CollectingTrackingService {
    /// Creates a new collecting service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `begin_tracking` call fail.
    #[must_use]
    pub fn failing_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    /// Makes every `report_status` and `mark_failed` call fail.
    #[must_use]
    pub fn failing_reports(mut self) -> Self {
        self.fail_report = true;
        self
    }

    /// Returns all recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<TrackingCall> {
        self.calls.read().clone()
    }

    /// Returns the number of recorded calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.read().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.read().is_empty()
    }

    /// Returns the recorded status events.
    #[must_use]
    pub fn status_events(&self) -> Vec<(TrackingHandle, StatusEvent)> {
        self.calls
            .read()
            .iter()
            .filter_map(|c| match c {
                TrackingCall::Status(h, e) => Some((h.clone(), e.clone())),
                _ => None,
            })
            .collect()
    }

    /// Returns the handles that were marked failed.
    #[must_use]
    pub fn failed_handles(&self) -> Vec<TrackingHandle> {
        self.calls
            .read()
            .iter()
            .filter_map(|c| match c {
                TrackingCall::Failed(h, _) => Some(h.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the begin requests.
    #[must_use]
    pub fn begin_requests(&self) -> Vec<TrackingRequest> {
        self.calls
            .read()
            .iter()
            .filter_map(|c| match c {
                TrackingCall::Begin(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    fn report_result(&self) -> Result<(), TrackingError> {
        if self.fail_report {
            Err(TrackingError::Unavailable("injected report failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TrackingService for CollectingTrackingService {
    async fn begin_tracking(&self, request: &TrackingRequest) -> Result<TrackingHandle, TrackingError> {
        self.calls.write().push(TrackingCall::Begin(request.clone()));
        if self.fail_begin {
            return Err(TrackingError::Unavailable("injected begin failure".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(TrackingHandle::new(request.branch(), format!("int-{id}")).with_program_id(format!("prog-{id}")))
    }

    async fn report_status(&self, handle: &TrackingHandle, event: &StatusEvent) -> Result<(), TrackingError> {
        self.calls
            .write()
            .push(TrackingCall::Status(handle.clone(), event.clone()));
        self.report_result()
    }

    async fn mark_failed(&self, handle: &TrackingHandle, record: &FailureRecord) -> Result<(), TrackingError> {
        self.calls
            .write()
            .push(TrackingCall::Failed(handle.clone(), record.clone()));
        self.report_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Branch, TrackingStatus};
    use chrono::Utc;

    fn request(anomalous: bool) -> TrackingRequest {
        TrackingRequest {
            dataset_id: "42".to_string(),
            command_line: String::new(),
            program_name: "autoproc".to_string(),
            anomalous,
            start_time: Utc::now(),
            comment: String::new(),
        }
    }

    #[tokio::test]
    async fn test_noop_issues_distinct_handles() {
        let service = NoOpTrackingService::new();
        let a = service.begin_tracking(&request(true)).await.unwrap();
        let b = service.begin_tracking(&request(false)).await.unwrap();

        assert_ne!(a.integration_id, b.integration_id);
        assert_eq!(a.branch, Branch::Anomalous);
        assert_eq!(b.branch, Branch::NonAnomalous);
    }

    #[tokio::test]
    async fn test_logging_service_accepts_everything() {
        let service = LoggingTrackingService::new();
        let handle = service.begin_tracking(&request(false)).await.unwrap();
        let event = StatusEvent::now("Indexing", TrackingStatus::Launched, "XDS started");

        assert!(service.report_status(&handle, &event).await.is_ok());
    }

    #[tokio::test]
    async fn test_collecting_service_records_calls() {
        let service = CollectingTrackingService::new();
        assert!(service.is_empty());

        let handle = service.begin_tracking(&request(true)).await.unwrap();
        let event = StatusEvent::now("Integration", TrackingStatus::Successful, "done");
        service.report_status(&handle, &event).await.unwrap();

        assert_eq!(service.len(), 2);
        assert_eq!(service.begin_requests().len(), 1);
        assert_eq!(service.status_events()[0].1.stage, "Integration");
    }

    #[tokio::test]
    async fn test_collecting_service_failure_injection() {
        let service = CollectingTrackingService::new().failing_begin().failing_reports();

        assert!(service.begin_tracking(&request(true)).await.is_err());
        let handle = TrackingHandle::new(Branch::Anomalous, "1");
        let event = StatusEvent::now("Indexing", TrackingStatus::Launched, "");
        assert!(service.report_status(&handle, &event).await.is_err());
        assert_eq!(service.len(), 2);
    }
}
