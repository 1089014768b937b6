//! Requests, logs and a fully scripted stage catalog.

use std::collections::HashMap;
use std::sync::Arc;

use super::mocks::ScriptedStage;
use crate::pipeline::{PipelineRequest, StageCatalog};
use crate::stages::{keys, StageKind, StageRunner};

/// An online, non-anomalous request over images `start..=end`.
#[must_use]
pub fn sample_request(start: u32, end: u32) -> PipelineRequest {
    PipelineRequest::new("1234", "/data/visit/lyso_1_master.h5", start, end).with_online(true)
}

/// A scaling log whose anomalous correlation table has the given Overall value.
#[must_use]
pub fn scaling_log_with_overall(value: f64) -> String {
    format!(
        "<B><FONT COLOR=\"#FF0000\"><!--SUMMARY_BEGIN-->\n\
         $TABLE:  Correlations CC(1/2) within dataset, XDSdataset:\n\
         $GRAPHS: CC(1/2) v resolution:N:1,2,3:\n\
         $$\n\
         N  1/d^2   Dmid  CCanom  Nanom  RCRanom  CC1/2  NCC\n\
         $$\n\
         1  0.0215  6.82  0.512  1402  1.81  0.998  1562\n\
         2  0.0645  3.94  0.204  2411  1.22  0.995  2690\n\
         Overall  4025  0.996  {value}  3813  1.35\n\
         $$\n\
         <!--SUMMARY_END--></FONT></B>\n"
    )
}

/// A completeness table artifact from `(resolution, include)` pairs.
#[must_use]
pub fn completeness_table(shells: &[(f64, bool)]) -> serde_json::Value {
    serde_json::Value::Array(
        shells
            .iter()
            .map(|&(res, include)| {
                serde_json::json!({
                    "res": res,
                    "include_res_based_on_cc": include,
                    "cc_half": if include { 45.0 } else { 99.0 },
                    "i_over_sigma": if include { 1.2 } else { 25.0 },
                })
            })
            .collect(),
    )
}

/// One scripted runner per stage kind, wired into a [`StageCatalog`].
///
/// [`ScriptedPipeline::passing`] produces artifacts that drive the controller
/// through a complete run: integration yields a 2.0 Å cutoff, each refinement
/// 1.9 Å, and scaling reports the given anomalous correlation.
#[derive(Debug, Clone)]
pub struct ScriptedPipeline {
    stages: HashMap<StageKind, Arc<ScriptedStage>>,
}

impl ScriptedPipeline {
    /// Every stage succeeds; scaling logs `overall_signal`.
    #[must_use]
    pub fn passing(overall_signal: f64) -> Self {
        let cell = serde_json::json!([78.1, 78.1, 37.2, 90.0, 90.0, 90.0]);
        let stages = [
            ScriptedStage::new("indexing")
                .with_artifact(keys::UNIT_CELL, cell.clone())
                .with_artifact(keys::SPACE_GROUP_NUMBER, serde_json::json!(96)),
            ScriptedStage::new("integration")
                .with_artifact(keys::XDS_ASCII_HKL, serde_json::json!("/w/integration_0/XDS_ASCII.HKL"))
                .with_artifact(
                    keys::COMPLETENESS_ENTRIES,
                    completeness_table(&[(3.0, false), (2.5, true), (2.0, true)]),
                ),
            ScriptedStage::new("merging_law")
                .with_artifact(keys::UNIT_CELL, cell)
                .with_artifact(keys::SPACE_GROUP_NUMBER, serde_json::json!(96)),
            ScriptedStage::new("refine_correct")
                .with_artifact(keys::XDS_ASCII_HKL, serde_json::json!("/w/refine/XDS_ASCII.HKL"))
                .with_artifact(
                    keys::COMPLETENESS_ENTRIES,
                    completeness_table(&[(2.2, true), (1.9, true), (1.7, false)]),
                ),
            ScriptedStage::new("scaling")
                .with_artifact(
                    keys::SCALING_LOG_TEXT,
                    serde_json::json!(scaling_log_with_overall(overall_signal)),
                )
                .with_artifact(keys::MERGED_MTZ, serde_json::json!("/w/scaling/merged.mtz"))
                .with_artifact(keys::UNMERGED_MTZ, serde_json::json!("/w/scaling/unmerged.mtz")),
            ScriptedStage::new("scale_merge")
                .with_artifact("merged_hkl", serde_json::json!("/w/scale_merge/merged.HKL")),
            ScriptedStage::new("twinning")
                .with_artifact(keys::HAS_TWINNING, serde_json::json!(false))
                .with_artifact(keys::HAS_PSEUDOTRANSLATION, serde_json::json!(false)),
            ScriptedStage::new("truncate")
                .with_artifact("truncated_mtz", serde_json::json!("/w/truncate/truncate.mtz")),
            ScriptedStage::new("uniqueify")
                .with_artifact("unique_mtz", serde_json::json!("/w/uniqueify/truncate_unique.mtz")),
        ];

        Self {
            stages: StageKind::ALL
                .into_iter()
                .zip(stages.into_iter().map(Arc::new))
                .collect(),
        }
    }

    /// Replaces the runner for one kind.
    #[must_use]
    pub fn with_stage(mut self, kind: StageKind, stage: ScriptedStage) -> Self {
        self.stages.insert(kind, Arc::new(stage));
        self
    }

    /// The runner for a kind.
    #[must_use]
    pub fn stage(&self, kind: StageKind) -> Option<Arc<ScriptedStage>> {
        self.stages.get(&kind).cloned()
    }

    /// Number of calls made to the runner for a kind.
    #[must_use]
    pub fn calls(&self, kind: StageKind) -> usize {
        self.stages.get(&kind).map_or(0, |s| s.call_count())
    }

    /// Stage names run for a kind, in call order.
    #[must_use]
    pub fn stage_names(&self, kind: StageKind) -> Vec<String> {
        self.stages
            .get(&kind)
            .map(|s| s.stage_names())
            .unwrap_or_default()
    }

    /// Total calls across all runners.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.stages.values().map(|s| s.call_count()).sum()
    }

    /// A catalog backed by these runners.
    #[must_use]
    pub fn catalog(&self) -> StageCatalog {
        self.stages
            .iter()
            .fold(StageCatalog::new(), |catalog, (&kind, stage)| {
                catalog.with_runner(kind, Arc::clone(stage) as Arc<dyn StageRunner>)
            })
    }
}
