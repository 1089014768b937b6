//! Best-effort forwarding of stage transitions.

use super::{FailureRecord, StatusEvent, TrackingHandle, TrackingRequest, TrackingService};
use crate::core::TrackingStatus;
use crate::errors::TrackingError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Forwards stage transitions to a tracking service without ever failing.
///
/// Loss of status visibility must not abort data processing, so every
/// service error is logged and dropped here. Each service call is bounded by
/// a timeout, so a stalled service delays a run by at most that long per call.
#[derive(Clone)]
pub struct StatusReporter {
    service: Arc<dyn TrackingService>,
    timeout: Duration,
}

impl StatusReporter {
    /// Creates a reporter over a tracking service.
    #[must_use]
    pub fn new(service: Arc<dyn TrackingService>) -> Self {
        Self {
            service,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Sets the per-call time limit.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, TrackingError>>,
    ) -> Result<T, TrackingError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(TrackingError::Unavailable(format!(
                    "no answer within {:.1} s",
                    self.timeout.as_secs_f64()
                )))
            })
    }

    /// Opens a tracked attempt; `None` if the service refused.
    ///
    /// Reporting for a branch without a handle silently becomes a no-op.
    pub async fn begin(&self, request: &TrackingRequest) -> Option<TrackingHandle> {
        match self.bounded(self.service.begin_tracking(request)).await {
            Ok(handle) => {
                debug!(
                    branch = %handle.branch,
                    integration_id = %handle.integration_id,
                    "Tracking handle created"
                );
                Some(handle)
            }
            Err(e) => {
                error!(
                    branch = %request.branch(),
                    error = %e,
                    "Could not create tracking handle; status reporting disabled for branch"
                );
                None
            }
        }
    }

    /// Sends the same transition to every handle.
    pub async fn report(
        &self,
        handles: &[TrackingHandle],
        stage: &str,
        status: TrackingStatus,
        comment: &str,
    ) {
        let event = StatusEvent::now(stage, status, comment);
        for handle in handles {
            if let Err(e) = self.bounded(self.service.report_status(handle, &event)).await {
                warn!(
                    integration_id = %handle.integration_id,
                    stage = %stage,
                    status = %status,
                    error = %e,
                    "Could not report status"
                );
            }
        }
    }

    /// Sends a terminal failure to every handle.
    pub async fn mark_failed(&self, handles: &[TrackingHandle], record: &FailureRecord) {
        for handle in handles {
            if let Err(e) = self.bounded(self.service.mark_failed(handle, record)).await {
                warn!(
                    integration_id = %handle.integration_id,
                    error = %e,
                    "Could not mark tracking handle as failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Branch;
    use crate::errors::TrackingError;
    use crate::tracking::MockTrackingService;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Instant;

    /// A service that never answers.
    struct StalledService;

    #[async_trait]
    impl TrackingService for StalledService {
        async fn begin_tracking(&self, _request: &TrackingRequest) -> Result<TrackingHandle, TrackingError> {
            std::future::pending().await
        }

        async fn report_status(&self, _handle: &TrackingHandle, _event: &StatusEvent) -> Result<(), TrackingError> {
            std::future::pending().await
        }

        async fn mark_failed(&self, _handle: &TrackingHandle, _record: &FailureRecord) -> Result<(), TrackingError> {
            std::future::pending().await
        }
    }

    fn request(anomalous: bool) -> TrackingRequest {
        TrackingRequest {
            dataset_id: "1234".to_string(),
            command_line: "autoproc --dataset 1234".to_string(),
            program_name: "autoproc".to_string(),
            anomalous,
            start_time: Utc::now(),
            comment: "Creating integration ID".to_string(),
        }
    }

    #[tokio::test]
    async fn test_begin_failure_yields_none() {
        let mut service = MockTrackingService::new();
        service
            .expect_begin_tracking()
            .times(1)
            .returning(|_| Err(TrackingError::Unavailable("down".to_string())));

        let reporter = StatusReporter::new(Arc::new(service));
        assert!(reporter.begin(&request(true)).await.is_none());
    }

    #[tokio::test]
    async fn test_report_goes_to_every_handle() {
        let mut service = MockTrackingService::new();
        service
            .expect_report_status()
            .withf(|_, event| event.stage == "Indexing" && event.status == TrackingStatus::Launched)
            .times(2)
            .returning(|_, _| Ok(()));

        let reporter = StatusReporter::new(Arc::new(service));
        let handles = vec![
            TrackingHandle::new(Branch::Anomalous, "11"),
            TrackingHandle::new(Branch::NonAnomalous, "12"),
        ];
        reporter
            .report(&handles, "Indexing", TrackingStatus::Launched, "XDS started")
            .await;
    }

    #[tokio::test]
    async fn test_report_errors_are_swallowed() {
        let mut service = MockTrackingService::new();
        service
            .expect_report_status()
            .times(2)
            .returning(|_, _| Err(TrackingError::Rejected {
                status: 500,
                message: "boom".to_string(),
            }));

        let reporter = StatusReporter::new(Arc::new(service));
        let handles = vec![
            TrackingHandle::new(Branch::Anomalous, "11"),
            TrackingHandle::new(Branch::NonAnomalous, "12"),
        ];
        // Both handles are attempted even though the first one fails.
        reporter
            .report(&handles, "Scaling", TrackingStatus::Failed, "aimless failed")
            .await;
    }

    #[tokio::test]
    async fn test_no_handles_means_no_calls() {
        let service = MockTrackingService::new();
        let reporter = StatusReporter::new(Arc::new(service));
        reporter
            .report(&[], "Indexing", TrackingStatus::Launched, "")
            .await;
    }

    #[tokio::test]
    async fn test_stalled_service_is_abandoned_after_timeout() {
        let reporter = StatusReporter::new(Arc::new(StalledService)).with_timeout(Duration::from_millis(50));
        let handles = vec![
            TrackingHandle::new(Branch::Anomalous, "11"),
            TrackingHandle::new(Branch::NonAnomalous, "12"),
        ];
        let record = FailureRecord {
            dataset_id: "1234".to_string(),
            command_line: String::new(),
            program_name: "autoproc".to_string(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            reason: "scaling failed".to_string(),
        };
        let started = Instant::now();

        assert!(reporter.begin(&request(false)).await.is_none());
        reporter
            .report(&handles, "Scaling", TrackingStatus::Launched, "")
            .await;
        reporter.mark_failed(&handles, &record).await;

        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
