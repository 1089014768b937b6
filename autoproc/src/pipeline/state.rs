//! Controller-owned run state.

use super::report::{BranchReport, FailureSummary, ProcessingReport};
use crate::core::{Branch, RunStatus};
use crate::errors::PipelineError;
use crate::policies::SignalAssessment;
use crate::stages::{keys, Artifacts, StageKind, StageResult};
use crate::tracking::TrackingHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Mutable record of one run.
///
/// Written only by the controller, and only after a group has been joined.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineState {
    /// Run identifier.
    pub run_id: Uuid,
    /// Dataset identifier.
    pub dataset_id: String,
    /// Step currently executing.
    pub current_stage: Option<String>,
    /// Every joined stage result, keyed by stage name.
    pub results: BTreeMap<String, StageResult>,
    /// Resolution cutoffs, keyed by the stage they were computed from.
    pub resolution_cutoffs: BTreeMap<String, f64>,
    /// Branches of the pass whose results are final.
    pub active_branches: Vec<Branch>,
    /// Outcome of the anomalous-signal check.
    pub anomalous_signal: Option<SignalAssessment>,
    /// Whether the anomalous second pass ran.
    pub second_pass: bool,
    /// Tracking handles created so far.
    pub handles: Vec<TrackingHandle>,
    /// Prefix for result files.
    pub result_prefix: Option<String>,
    /// Elapsed seconds per step.
    pub timings: BTreeMap<String, f64>,
    /// Terminal status.
    pub status: RunStatus,
    /// Failure details.
    pub failure: Option<FailureSummary>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
}

impl PipelineState {
    /// Creates the state for a new run.
    #[must_use]
    pub fn new(run_id: Uuid, dataset_id: impl Into<String>) -> Self {
        Self {
            run_id,
            dataset_id: dataset_id.into(),
            current_stage: None,
            results: BTreeMap::new(),
            resolution_cutoffs: BTreeMap::new(),
            active_branches: Vec::new(),
            anomalous_signal: None,
            second_pass: false,
            handles: Vec::new(),
            result_prefix: None,
            timings: BTreeMap::new(),
            status: RunStatus::Running,
            failure: None,
            started_at: Utc::now(),
        }
    }

    /// Stores a joined result, replacing any earlier one of the same name.
    pub fn record(&mut self, result: StageResult) {
        self.results.insert(result.stage.clone(), result);
    }

    /// Looks up a result by kind and branch.
    #[must_use]
    pub fn result(&self, kind: StageKind, branch: Option<Branch>) -> Option<&StageResult> {
        self.results.get(&kind.stage_name(branch))
    }

    /// Tracking handle of a branch.
    #[must_use]
    pub fn handle(&self, branch: Branch) -> Option<&TrackingHandle> {
        self.handles.iter().rev().find(|h| h.branch == branch)
    }

    /// Records the terminal failure.
    pub fn fail(&mut self, err: &PipelineError) {
        self.status = RunStatus::Failed;
        self.failure = Some(FailureSummary::from(err));
    }

    /// Records terminal success.
    pub fn succeed(&mut self) {
        self.status = RunStatus::Success;
        self.current_stage = None;
    }

    fn artifacts(&self, kind: StageKind, branch: Option<Branch>) -> Artifacts {
        self.result(kind, branch)
            .map(|r| r.artifacts.clone())
            .unwrap_or_default()
    }

    fn branch_report(&self, branch: Branch) -> Option<BranchReport> {
        let refine_stage = StageKind::RefineCorrect.stage_name(Some(branch));
        let resolution_cutoff = *self.resolution_cutoffs.get(&refine_stage)?;
        Some(BranchReport {
            branch,
            resolution_cutoff,
            refine: self.artifacts(StageKind::RefineCorrect, Some(branch)),
            scaling: self.artifacts(StageKind::Scaling, Some(branch)),
            scale_merge: self.artifacts(StageKind::ScaleMerge, Some(branch)),
            truncate: self.artifacts(StageKind::Truncate, Some(branch)),
            uniqueify: self.artifacts(StageKind::Uniqueify, Some(branch)),
            tracking: self.handle(branch).cloned(),
        })
    }

    /// Builds the final report.
    #[must_use]
    pub fn to_report(&self) -> ProcessingReport {
        let twinning = self.result(StageKind::Twinning, None);
        ProcessingReport {
            run_id: self.run_id,
            dataset_id: self.dataset_id.clone(),
            status: self.status,
            failure: self.failure.clone(),
            result_prefix: self.result_prefix.clone(),
            initial_resolution_cutoff: self
                .resolution_cutoffs
                .get(StageKind::Integration.name())
                .copied(),
            branches: self
                .active_branches
                .iter()
                .filter_map(|&b| self.branch_report(b))
                .collect(),
            high_anomalous_signal: self.anomalous_signal.is_some_and(|s| s.is_present()),
            anomalous_signal: self.anomalous_signal,
            second_pass: self.second_pass,
            has_twinning: twinning.is_some_and(|r| r.artifact_flag(keys::HAS_TWINNING)),
            has_pseudotranslation: twinning
                .is_some_and(|r| r.artifact_flag(keys::HAS_PSEUDOTRANSLATION)),
            twinning: twinning.map(|r| r.artifacts.clone()).unwrap_or_default(),
            tracking_handles: self.handles.clone(),
            timings: self.timings.clone(),
            started_at: self.started_at,
            ended_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_replaces_same_stage() {
        let mut state = PipelineState::new(Uuid::new_v4(), "1");
        state.record(
            StageResult::succeeded("scaling_anom", Utc::now(), Artifacts::new())
                .with_artifact(keys::MERGED_MTZ, serde_json::json!("/first.mtz")),
        );
        state.record(
            StageResult::succeeded("scaling_anom", Utc::now(), Artifacts::new())
                .with_artifact(keys::MERGED_MTZ, serde_json::json!("/second.mtz")),
        );

        let result = state.result(StageKind::Scaling, Some(Branch::Anomalous)).unwrap();
        assert_eq!(result.artifact_str(keys::MERGED_MTZ), Some("/second.mtz"));
        assert_eq!(state.results.len(), 1);
    }

    #[test]
    fn test_report_includes_only_active_branches_with_cutoffs() {
        let mut state = PipelineState::new(Uuid::new_v4(), "1");
        state.active_branches = vec![Branch::Anomalous, Branch::NonAnomalous];
        state
            .resolution_cutoffs
            .insert("refine_correct_anom".to_string(), 1.9);
        state.succeed();

        let report = state.to_report();
        assert!(report.is_success());
        assert_eq!(report.branches.len(), 1);
        assert_eq!(report.branches[0].branch, Branch::Anomalous);
        assert!((report.branches[0].resolution_cutoff - 1.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_report_surfaces_twinning_flags() {
        let mut state = PipelineState::new(Uuid::new_v4(), "1");
        state.record(
            StageResult::succeeded("twinning", Utc::now(), Artifacts::new())
                .with_artifact(keys::HAS_TWINNING, serde_json::json!(true)),
        );

        let report = state.to_report();
        assert!(report.has_twinning);
        assert!(!report.has_pseudotranslation);
    }

    #[test]
    fn test_fail_records_summary() {
        let mut state = PipelineState::new(Uuid::new_v4(), "1");
        state.fail(&PipelineError::stage("integration", "boom"));

        let report = state.to_report();
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.failed_stage(), Some("integration"));
    }
}
