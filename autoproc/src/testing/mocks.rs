//! Scripted stage runners for testing.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::time::Duration;

use crate::core::Branch;
use crate::stages::{Artifacts, StageInput, StageResult, StageRunner};

/// A stage runner that records its inputs and returns a scripted result.
///
/// Results are named after the input's stage name, so one runner can serve
/// both branches of a stage kind.
#[derive(Debug)]
pub struct ScriptedStage {
    name: String,
    artifacts: Artifacts,
    failure: Option<String>,
    failing_branch: Option<Branch>,
    delay: Option<Duration>,
    panics: bool,
    inputs: Mutex<Vec<StageInput>>,
}

impl ScriptedStage {
    /// Creates a runner that succeeds with no artifacts.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artifacts: Artifacts::new(),
            failure: None,
            failing_branch: None,
            delay: None,
            panics: false,
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Adds an artifact to every successful result.
    #[must_use]
    pub fn with_artifact(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.artifacts.insert(key.into(), value);
        self
    }

    /// Sleeps before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails every call with the given reason.
    #[must_use]
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    /// Restricts [`failing`](Self::failing) to inputs of one branch.
    #[must_use]
    pub fn only_for(mut self, branch: Branch) -> Self {
        self.failing_branch = Some(branch);
        self
    }

    /// Panics inside the stage task.
    #[must_use]
    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    /// Number of times the stage ran.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inputs.lock().len()
    }

    /// Inputs of every call, in call order.
    #[must_use]
    pub fn inputs(&self) -> Vec<StageInput> {
        self.inputs.lock().clone()
    }

    /// Stage names of every call, in call order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<String> {
        self.inputs.lock().iter().map(StageInput::stage_name).collect()
    }

    fn fails_for(&self, input: &StageInput) -> Option<&str> {
        let reason = self.failure.as_deref()?;
        match self.failing_branch {
            Some(branch) if input.branch != Some(branch) => None,
            _ => Some(reason),
        }
    }
}

#[async_trait]
impl StageRunner for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StageInput) -> StageResult {
        let started = Utc::now();
        self.inputs.lock().push(input.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        assert!(!self.panics, "scripted panic in {}", input.stage_name());

        match self.fails_for(input) {
            Some(reason) => StageResult::failed(input.stage_name(), started, reason).with_exit_code(1),
            None => StageResult::succeeded(input.stage_name(), started, self.artifacts.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageKind;
    use crate::testing::sample_request;
    use std::sync::Arc;

    fn input(branch: Branch) -> StageInput {
        StageInput::new(
            StageKind::RefineCorrect,
            Some(branch),
            "/tmp/w",
            Arc::new(sample_request(1, 20)),
        )
    }

    #[tokio::test]
    async fn test_branch_restricted_failure() {
        let stage = ScriptedStage::new("refine").failing("boom").only_for(Branch::Anomalous);

        assert!(!stage.execute(&input(Branch::Anomalous)).await.is_success());
        assert!(stage.execute(&input(Branch::NonAnomalous)).await.is_success());
        assert_eq!(
            stage.stage_names(),
            vec!["refine_correct_anom", "refine_correct_noanom"]
        );
    }
}
