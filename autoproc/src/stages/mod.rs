//! Stage runner trait and implementations.
//!
//! A stage runner executes one external processing step. The controller only
//! sees the [`StageResult`] contract; how a runner builds its command line or
//! parses its tool's logs is its own business.

mod command;
mod input;
pub mod keys;
mod result;

pub use command::{CommandStage, ExpectedOutput};
pub use input::{StageInput, StageKind};
pub use result::{Artifacts, StageFailure, StageResult};

use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for stage runners.
///
/// Implementations must report failure through [`StageResult::success`]
/// rather than panicking: a non-zero exit, a timeout or missing output are
/// ordinary failures.
#[async_trait]
pub trait StageRunner: Send + Sync + Debug {
    /// Returns the name of the runner.
    fn name(&self) -> &str;

    /// Executes the stage.
    ///
    /// # Arguments
    ///
    /// * `input` - Parameters assembled by the controller
    async fn execute(&self, input: &StageInput) -> StageResult;
}

/// A simple function-based runner.
pub struct FnStage<F>
where
    F: Fn(&StageInput) -> StageResult + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageInput) -> StageResult + Send + Sync,
{
    /// Creates a new function-based runner.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageInput) -> StageResult + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> StageRunner for FnStage<F>
where
    F: Fn(&StageInput) -> StageResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StageInput) -> StageResult {
        (self.func)(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_request;
    use chrono::Utc;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("indexing", |input: &StageInput| {
            StageResult::succeeded(input.stage_name(), Utc::now(), Artifacts::new())
                .with_artifact("unit_cell", serde_json::json!([78.0, 78.0, 37.0, 90.0, 90.0, 90.0]))
        });

        assert_eq!(stage.name(), "indexing");

        let input = StageInput::new(
            StageKind::Indexing,
            None,
            "/tmp/indexing_0",
            Arc::new(sample_request(1, 20)),
        );
        let result = stage.execute(&input).await;
        assert!(result.is_success());
        assert_eq!(result.stage, "indexing");
    }
}
