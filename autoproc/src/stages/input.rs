//! Stage kinds and the structured input handed to a runner.

use crate::core::Branch;
use crate::pipeline::PipelineRequest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::Artifacts;

/// The closed set of stages in the processing graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Spot finding and indexing; produces a cell/orientation estimate.
    Indexing,
    /// Integration of reflection intensities.
    Integration,
    /// Merging-law estimation (space group and cell determination).
    MergingLaw,
    /// Integration-refinement rerun with the merging-law parameters.
    RefineCorrect,
    /// Scaling and merging with statistics.
    Scaling,
    /// Merge statistics computed alongside scaling.
    ScaleMerge,
    /// Twinning and pseudo-translation analysis.
    Twinning,
    /// Intensity truncation.
    Truncate,
    /// Uniqueness filtering.
    Uniqueify,
}

impl StageKind {
    /// Every stage kind, in graph order.
    pub const ALL: [Self; 9] = [
        Self::Indexing,
        Self::Integration,
        Self::MergingLaw,
        Self::RefineCorrect,
        Self::Scaling,
        Self::ScaleMerge,
        Self::Twinning,
        Self::Truncate,
        Self::Uniqueify,
    ];

    /// Canonical snake-case name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Indexing => "indexing",
            Self::Integration => "integration",
            Self::MergingLaw => "merging_law",
            Self::RefineCorrect => "refine_correct",
            Self::Scaling => "scaling",
            Self::ScaleMerge => "scale_merge",
            Self::Twinning => "twinning",
            Self::Truncate => "truncate",
            Self::Uniqueify => "uniqueify",
        }
    }

    /// Stage name for a run of this kind, qualified by branch when given.
    #[must_use]
    pub fn stage_name(self, branch: Option<Branch>) -> String {
        match branch {
            Some(branch) => format!("{}_{}", self.name(), branch.suffix()),
            None => self.name().to_string(),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structured input assembled by the controller for one stage.
#[derive(Debug, Clone)]
pub struct StageInput {
    /// What to run.
    pub kind: StageKind,
    /// Branch the stage belongs to, if branch-specific.
    pub branch: Option<Branch>,
    /// Working directory claimed for this stage.
    pub working_directory: PathBuf,
    /// The originating request.
    pub request: Arc<PipelineRequest>,
    /// Parameters derived from earlier stage results and policy outputs.
    pub params: Artifacts,
}

impl StageInput {
    /// Creates a stage input with no parameters.
    #[must_use]
    pub fn new(
        kind: StageKind,
        branch: Option<Branch>,
        working_directory: impl Into<PathBuf>,
        request: Arc<PipelineRequest>,
    ) -> Self {
        Self {
            kind,
            branch,
            working_directory: working_directory.into(),
            request,
            params: BTreeMap::new(),
        }
    }

    /// Copies every artifact of an earlier stage into the parameters.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: &Artifacts) -> Self {
        self.params
            .extend(artifacts.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Sets a single parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Stage name (kind plus branch suffix).
    #[must_use]
    pub fn stage_name(&self) -> String {
        self.kind.stage_name(self.branch)
    }

    /// Working directory.
    #[must_use]
    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Returns a parameter value.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }

    /// Returns a numeric parameter.
    #[must_use]
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.param(key).and_then(serde_json::Value::as_f64)
    }

    /// Returns a string parameter.
    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(serde_json::Value::as_str)
    }

    /// Whether the stage runs with the anomalous treatment.
    #[must_use]
    pub fn is_anomalous(&self) -> bool {
        self.branch.is_some_and(Branch::is_anomalous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_request;

    #[test]
    fn test_stage_names() {
        assert_eq!(StageKind::Indexing.stage_name(None), "indexing");
        assert_eq!(
            StageKind::Scaling.stage_name(Some(Branch::Anomalous)),
            "scaling_anom"
        );
        assert_eq!(
            StageKind::RefineCorrect.stage_name(Some(Branch::NonAnomalous)),
            "refine_correct_noanom"
        );
    }

    #[test]
    fn test_stage_input_params() {
        let mut artifacts = Artifacts::new();
        artifacts.insert("xds_ascii_hkl".to_string(), serde_json::json!("/w/XDS_ASCII.HKL"));

        let input = StageInput::new(
            StageKind::Scaling,
            Some(Branch::Anomalous),
            "/w/scaling_anom_0",
            Arc::new(sample_request(1, 20)),
        )
        .with_artifacts(&artifacts)
        .with_param("resolution_cutoff", serde_json::json!(1.8));

        assert_eq!(input.stage_name(), "scaling_anom");
        assert!(input.is_anomalous());
        assert_eq!(input.param_f64("resolution_cutoff"), Some(1.8));
        assert_eq!(input.param_str("xds_ascii_hkl"), Some("/w/XDS_ASCII.HKL"));
    }
}
