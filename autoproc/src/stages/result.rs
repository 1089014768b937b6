//! Stage result returned by every runner.

use crate::errors::PolicyError;
use crate::policies::CompletenessEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::keys;

/// Named output artifacts of a stage (paths and scalar values).
pub type Artifacts = BTreeMap<String, serde_json::Value>;

/// Structured reason attached to a failed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    /// Human readable reason.
    pub reason: String,
    /// Exit code of the external process, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Output of one stage.
///
/// Immutable after creation; the controller owns it once the stage has been
/// joined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name (e.g. `scaling_anom`).
    pub stage: String,
    /// Whether the stage succeeded.
    pub success: bool,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// When the stage ended.
    pub ended_at: DateTime<Utc>,
    /// Output artifacts.
    #[serde(default)]
    pub artifacts: Artifacts,
    /// Failure reason if the stage failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
}

impl StageResult {
    /// Creates a successful result ending now.
    #[must_use]
    pub fn succeeded(stage: impl Into<String>, started_at: DateTime<Utc>, artifacts: Artifacts) -> Self {
        Self {
            stage: stage.into(),
            success: true,
            started_at,
            ended_at: Utc::now(),
            artifacts,
            failure: None,
        }
    }

    /// Creates a failed result ending now.
    #[must_use]
    pub fn failed(stage: impl Into<String>, started_at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            success: false,
            started_at,
            ended_at: Utc::now(),
            artifacts: Artifacts::new(),
            failure: Some(StageFailure {
                reason: reason.into(),
                exit_code: None,
            }),
        }
    }

    /// Attaches an exit code to a failed result.
    #[must_use]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        if let Some(failure) = self.failure.as_mut() {
            failure.exit_code = Some(code);
        }
        self
    }

    /// Adds an artifact.
    #[must_use]
    pub fn with_artifact(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.artifacts.insert(key.into(), value);
        self
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Elapsed wall time in seconds.
    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Failure reason, or a generic message when the runner gave none.
    #[must_use]
    pub fn failure_reason(&self) -> String {
        self.failure
            .as_ref()
            .map_or_else(|| "stage reported failure".to_string(), |f| f.reason.clone())
    }

    /// Returns an artifact value.
    #[must_use]
    pub fn artifact(&self, key: &str) -> Option<&serde_json::Value> {
        self.artifacts.get(key)
    }

    /// Returns a string artifact.
    #[must_use]
    pub fn artifact_str(&self, key: &str) -> Option<&str> {
        self.artifact(key).and_then(serde_json::Value::as_str)
    }

    /// Returns a path artifact.
    #[must_use]
    pub fn artifact_path(&self, key: &str) -> Option<PathBuf> {
        self.artifact_str(key).map(PathBuf::from)
    }

    /// Returns a boolean artifact, treating absence as false.
    #[must_use]
    pub fn artifact_flag(&self, key: &str) -> bool {
        self.artifact(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Decodes the per-shell completeness table.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::MissingCompleteness`] if the artifact is absent
    /// or malformed.
    pub fn completeness_entries(&self) -> Result<Vec<CompletenessEntry>, PolicyError> {
        self.artifact(keys::COMPLETENESS_ENTRIES)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .ok_or_else(|| PolicyError::MissingCompleteness(self.stage.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_result_succeeded() {
        let mut artifacts = Artifacts::new();
        artifacts.insert("xds_ascii_hkl".to_string(), serde_json::json!("/tmp/XDS_ASCII.HKL"));

        let result = StageResult::succeeded("integration", Utc::now(), artifacts);

        assert!(result.is_success());
        assert!(result.failure.is_none());
        assert_eq!(
            result.artifact_path("xds_ascii_hkl"),
            Some(PathBuf::from("/tmp/XDS_ASCII.HKL"))
        );
    }

    #[test]
    fn test_stage_result_failed_with_exit_code() {
        let result = StageResult::failed("indexing", Utc::now(), "XDS exited with status 2")
            .with_exit_code(2);

        assert!(!result.is_success());
        assert_eq!(result.failure_reason(), "XDS exited with status 2");
        assert_eq!(result.failure.unwrap().exit_code, Some(2));
    }

    #[test]
    fn test_stage_result_duration() {
        let started = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let result = StageResult::succeeded("test", started, Artifacts::new());

        assert!(result.elapsed_secs() >= 0.01);
    }

    #[test]
    fn test_completeness_entries_decode() {
        let result = StageResult::succeeded("integration", Utc::now(), Artifacts::new())
            .with_artifact(
                keys::COMPLETENESS_ENTRIES,
                serde_json::json!([
                    {"res": 3.0, "include_res_based_on_cc": false, "cc_half": 99.1, "i_over_sigma": 30.0},
                    {"res": 2.0, "include_res_based_on_cc": true, "cc_half": 45.0, "i_over_sigma": 1.1}
                ]),
            );

        let entries = result.completeness_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[1].include_res_based_on_cc);
    }

    #[test]
    fn test_completeness_entries_missing() {
        let result = StageResult::succeeded("integration", Utc::now(), Artifacts::new());
        assert_eq!(
            result.completeness_entries(),
            Err(PolicyError::MissingCompleteness("integration".to_string()))
        );
    }

    #[test]
    fn test_artifact_flag_defaults_false() {
        let result = StageResult::succeeded("twinning", Utc::now(), Artifacts::new())
            .with_artifact("has_twinning", serde_json::json!(true));

        assert!(result.artifact_flag("has_twinning"));
        assert!(!result.artifact_flag("has_pseudotranslation"));
    }
}
