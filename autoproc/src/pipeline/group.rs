//! Fan-out and join of concurrently running stages.

use crate::stages::{StageInput, StageResult, StageRunner};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// A spawned unit of work: the stage names it covers and its task.
struct GroupTask {
    stages: Vec<String>,
    handle: JoinHandle<Vec<StageResult>>,
}

/// A set of stages started together and joined at one barrier.
///
/// Every task is spawned onto the runtime as soon as it is added. [`join`]
/// waits for all of them, successful or not; a failing task never cancels
/// its siblings.
///
/// [`join`]: StageGroup::join
pub struct StageGroup {
    name: String,
    started: Instant,
    tasks: Vec<GroupTask>,
}

impl StageGroup {
    /// Creates an empty group.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started: Instant::now(),
            tasks: Vec::new(),
        }
    }

    /// Returns the group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of spawned tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if nothing was spawned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Starts one stage.
    pub fn spawn(&mut self, runner: Arc<dyn StageRunner>, input: StageInput) {
        let stage = input.stage_name();
        debug!(group = %self.name, stage = %stage, runner = %runner.name(), "Spawning stage");
        let handle = tokio::spawn(async move { vec![runner.execute(&input).await] });
        self.tasks.push(GroupTask {
            stages: vec![stage],
            handle,
        });
    }

    /// Starts two stages that run back to back inside one task.
    ///
    /// The second stage receives the first one's artifacts and only runs if
    /// the first succeeded.
    pub fn spawn_chain(
        &mut self,
        first: (Arc<dyn StageRunner>, StageInput),
        then: (Arc<dyn StageRunner>, StageInput),
    ) {
        let stages = vec![first.1.stage_name(), then.1.stage_name()];
        debug!(group = %self.name, stages = ?stages, "Spawning stage chain");
        let handle = tokio::spawn(async move {
            let (runner, input) = first;
            let head = runner.execute(&input).await;
            if !head.is_success() {
                return vec![head];
            }
            let (runner, input) = then;
            let input = input.with_artifacts(&head.artifacts);
            let tail = runner.execute(&input).await;
            vec![head, tail]
        });
        self.tasks.push(GroupTask { stages, handle });
    }

    /// Waits for every task and collects their results in spawn order.
    ///
    /// A task that panicked is reported as a failed result for the first
    /// stage it covered.
    pub async fn join(self) -> GroupOutcome {
        let (names, handles): (Vec<_>, Vec<_>) = self
            .tasks
            .into_iter()
            .map(|t| (t.stages, t.handle))
            .unzip();

        let joined = join_all(handles).await;
        let mut results = Vec::new();
        for (stages, outcome) in names.into_iter().zip(joined) {
            match outcome {
                Ok(mut stage_results) => results.append(&mut stage_results),
                Err(join_error) => {
                    let stage = stages.into_iter().next().unwrap_or_default();
                    error!(group = %self.name, stage = %stage, error = %join_error, "Stage task aborted");
                    results.push(StageResult::failed(
                        stage,
                        Utc::now(),
                        format!("stage task aborted: {join_error}"),
                    ));
                }
            }
        }

        GroupOutcome {
            name: self.name,
            results,
            elapsed: self.started.elapsed(),
        }
    }
}

impl std::fmt::Debug for StageGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageGroup")
            .field("name", &self.name)
            .field("task_count", &self.tasks.len())
            .finish()
    }
}

/// Joined results of a [`StageGroup`].
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    /// Group name.
    pub name: String,
    /// One result per executed stage, in spawn order.
    pub results: Vec<StageResult>,
    /// Wall time from group creation to join.
    pub elapsed: Duration,
}

impl GroupOutcome {
    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.results.iter().all(StageResult::is_success)
    }

    /// First failed result in spawn order.
    #[must_use]
    pub fn first_failure(&self) -> Option<&StageResult> {
        self.results.iter().find(|r| !r.is_success())
    }

    /// Looks up a result by stage name.
    #[must_use]
    pub fn result(&self, stage: &str) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage == stage)
    }

    /// Elapsed seconds.
    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}
