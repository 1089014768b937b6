//! Test assertions for processing reports.

use crate::core::RunStatus;
use crate::errors::FailureKind;
use crate::pipeline::ProcessingReport;

/// Asserts that the run succeeded.
pub fn assert_report_succeeded(report: &ProcessingReport) {
    assert_eq!(
        report.status,
        RunStatus::Success,
        "Expected success, got failure: {:?}",
        report.failure
    );
}

/// Asserts that the run failed with the given class at the given stage.
pub fn assert_report_failed_at(report: &ProcessingReport, kind: FailureKind, stage: Option<&str>) {
    assert_eq!(report.status, RunStatus::Failed, "Expected failure, run succeeded");
    let failure = report
        .failure
        .as_ref()
        .unwrap_or_else(|| panic!("Failed report carries no failure summary"));
    assert_eq!(failure.kind, kind, "Unexpected failure kind: {failure:?}");
    assert_eq!(failure.stage.as_deref(), stage, "Unexpected failed stage: {failure:?}");
}
