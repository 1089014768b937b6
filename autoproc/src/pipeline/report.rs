//! The aggregated output of a run.

use crate::core::{Branch, RunStatus};
use crate::errors::{FailureKind, PipelineError};
use crate::policies::SignalAssessment;
use crate::stages::Artifacts;
use crate::tracking::TrackingHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Where and why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    /// Failure class.
    pub kind: FailureKind,
    /// Stage or policy step the failure is attributed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Human readable reason.
    pub reason: String,
}

impl From<&PipelineError> for FailureSummary {
    fn from(err: &PipelineError) -> Self {
        let reason = match err {
            PipelineError::Stage { reason, .. } => reason.clone(),
            PipelineError::Policy { source, .. } => source.to_string(),
            other => other.to_string(),
        };
        Self {
            kind: err.kind(),
            stage: err.stage_name().map(str::to_string),
            reason,
        }
    }
}

/// Final outputs of one processing branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchReport {
    /// The branch.
    pub branch: Branch,
    /// Resolution cutoff recomputed from the branch's refinement.
    pub resolution_cutoff: f64,
    /// Artifacts of the integration-refinement rerun.
    pub refine: Artifacts,
    /// Artifacts of scaling.
    pub scaling: Artifacts,
    /// Artifacts of the merge statistics.
    pub scale_merge: Artifacts,
    /// Artifacts of truncation.
    #[serde(default)]
    pub truncate: Artifacts,
    /// Artifacts of uniqueness filtering.
    #[serde(default)]
    pub uniqueify: Artifacts,
    /// Tracking handle of the branch, if one was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<TrackingHandle>,
}

/// Aggregated result of a pipeline run.
///
/// Always carries a terminal status; on failure it names the stage and
/// reason. Serializes to JSON for the caller to archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Dataset identifier.
    pub dataset_id: String,
    /// Terminal status.
    pub status: RunStatus,
    /// Failure details when `status` is failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,
    /// Prefix for result files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_prefix: Option<String>,
    /// Cutoff computed from the first integration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_resolution_cutoff: Option<f64>,
    /// Per-branch outputs of the final pass.
    #[serde(default)]
    pub branches: Vec<BranchReport>,
    /// Whether the anomalous signal check passed.
    pub high_anomalous_signal: bool,
    /// The signal check as evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomalous_signal: Option<SignalAssessment>,
    /// Whether refinement and scaling were re-run anomalously.
    pub second_pass: bool,
    /// Twinning detected downstream.
    pub has_twinning: bool,
    /// Pseudo-translation detected downstream.
    pub has_pseudotranslation: bool,
    /// Artifacts of the twinning analysis.
    #[serde(default)]
    pub twinning: Artifacts,
    /// Every tracking handle created during the run.
    #[serde(default)]
    pub tracking_handles: Vec<TrackingHandle>,
    /// Elapsed seconds per step, keyed by step name.
    #[serde(default)]
    pub timings: BTreeMap<String, f64>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended.
    pub ended_at: DateTime<Utc>,
}

impl ProcessingReport {
    /// Returns true if the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// Outputs of one branch.
    #[must_use]
    pub fn branch(&self, branch: Branch) -> Option<&BranchReport> {
        self.branches.iter().find(|b| b.branch == branch)
    }

    /// Stage the failure is attributed to.
    #[must_use]
    pub fn failed_stage(&self) -> Option<&str> {
        self.failure.as_ref().and_then(|f| f.stage.as_deref())
    }

    /// Total elapsed seconds.
    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Serializes to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Serialization`] if serialization fails.
    pub fn to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{PolicyError, PreconditionError};

    #[test]
    fn test_failure_summary_from_stage_error() {
        let err = PipelineError::stage("integration", "XDS exited with status 1");
        let summary = FailureSummary::from(&err);

        assert_eq!(summary.kind, FailureKind::Stage);
        assert_eq!(summary.stage.as_deref(), Some("integration"));
        assert_eq!(summary.reason, "XDS exited with status 1");
    }

    #[test]
    fn test_failure_summary_from_policy_error() {
        let err = PipelineError::policy("resolution_cutoff", PolicyError::NoQualifyingShell { shells: 3 });
        let summary = FailureSummary::from(&err);

        assert_eq!(summary.kind, FailureKind::Policy);
        assert!(summary.reason.starts_with("no shell meets"));
    }

    #[test]
    fn test_failure_summary_from_precondition() {
        let err: PipelineError = PreconditionError::MissingField("dataset_id").into();
        let summary = FailureSummary::from(&err);

        assert_eq!(summary.kind, FailureKind::Precondition);
        assert_eq!(summary.stage, None);
    }

    #[test]
    fn test_report_json_shape() {
        let now = Utc::now();
        let report = ProcessingReport {
            run_id: Uuid::new_v4(),
            dataset_id: "42".to_string(),
            status: RunStatus::Failed,
            failure: Some(FailureSummary {
                kind: FailureKind::Stage,
                stage: Some("indexing".to_string()),
                reason: "no spots".to_string(),
            }),
            result_prefix: None,
            initial_resolution_cutoff: None,
            branches: Vec::new(),
            high_anomalous_signal: false,
            anomalous_signal: None,
            second_pass: false,
            has_twinning: false,
            has_pseudotranslation: false,
            twinning: Artifacts::new(),
            tracking_handles: Vec::new(),
            timings: BTreeMap::new(),
            started_at: now,
            ended_at: now,
        };

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["failure"]["kind"], "stage");
        assert_eq!(json["failure"]["stage"], "indexing");
        assert!(json.get("result_prefix").is_none());
        assert_eq!(report.failed_stage(), Some("indexing"));
        assert!(!report.is_success());
    }
}
