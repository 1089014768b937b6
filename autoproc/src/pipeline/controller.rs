//! The stage-group state machine driving one reduction run.

use super::catalog::StageCatalog;
use super::group::{GroupOutcome, StageGroup};
use super::report::ProcessingReport;
use super::request::{PipelineRequest, ValidatedRequest};
use super::state::PipelineState;
use crate::config::PipelineConfig;
use crate::core::{Branch, TrackingStatus};
use crate::errors::PipelineError;
use crate::events::{EventSink, PipelineEvent};
use crate::policies::{AnomalousSignalPolicy, ResolutionCutoffPolicy, SignalAssessment};
use crate::stages::{keys, Artifacts, StageInput, StageKind, StageResult};
use crate::tracking::{FailureRecord, StatusReporter, TrackingRequest, TrackingService};
use crate::workspace::WorkspaceAllocator;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Step names reported to the tracking service.
mod step {
    pub const INDEXING: &str = "Indexing";
    pub const INTEGRATION: &str = "Integration";
    pub const RESOLUTION_CUTOFF: &str = "Resolution cutoff";
    pub const MERGING_LAW: &str = "Merging law";
    pub const REFINEMENT: &str = "Integration refinement";
    pub const SCALING: &str = "Scaling";
    pub const DOWNSTREAM: &str = "Downstream analysis";
}

const TRACKING_COMMENT: &str = "Creating integration ID";

/// Per-run values shared by every step.
struct RunContext {
    run_id: Uuid,
    request: Arc<PipelineRequest>,
    validated: ValidatedRequest,
    workspace: WorkspaceAllocator,
}

/// What one branch pass hands to the steps after it.
struct BranchOutput {
    branch: Branch,
    cutoff: f64,
    scaling: StageResult,
}

/// Sequences the stage groups of a reduction run.
///
/// Groups run strictly in order; stages inside a group run concurrently and
/// are joined before the next step. A stage or policy failure stops the run,
/// tells the tracking service and ends up in the returned report. Tracking
/// problems are logged and never change the outcome.
///
/// # Example
///
/// ```rust,ignore
/// let controller = PipelineController::new(
///     PipelineConfig::default().with_base_directory("/data/proc"),
///     catalog,
///     Arc::new(NoOpTrackingService::new()),
///     Arc::new(LoggingEventSink::default()),
/// );
/// let report = controller.run(request).await;
/// ```
pub struct PipelineController {
    config: PipelineConfig,
    catalog: StageCatalog,
    reporter: StatusReporter,
    events: Arc<dyn EventSink>,
    resolution_policy: ResolutionCutoffPolicy,
    signal_policy: AnomalousSignalPolicy,
}

impl PipelineController {
    /// Creates a controller from its collaborators.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        catalog: StageCatalog,
        tracking: Arc<dyn TrackingService>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let signal_policy = AnomalousSignalPolicy::new(config.anomalous_threshold);
        let reporter = StatusReporter::new(tracking).with_timeout(config.tracking_timeout());
        Self {
            config,
            catalog,
            reporter,
            events,
            resolution_policy: ResolutionCutoffPolicy::new(),
            signal_policy,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the whole graph for one request.
    ///
    /// Never returns an error: every failure is recorded in the report.
    pub async fn run(&self, request: PipelineRequest) -> ProcessingReport {
        let run_id = Uuid::new_v4();
        let mut state = PipelineState::new(run_id, &request.dataset_id);
        info!(
            run_id = %run_id,
            dataset_id = %request.dataset_id,
            anomalous = request.anomalous,
            images = request.image_count(),
            "Starting data reduction"
        );
        self.emit(
            "pipeline.started",
            run_id,
            json!({
                "dataset_id": request.dataset_id,
                "anomalous": request.anomalous,
                "image_start": request.image_start,
                "image_end": request.image_end,
            }),
        );

        let ctx = match self.prepare(run_id, request) {
            Ok(ctx) => ctx,
            Err(err) => {
                error!(run_id = %run_id, error = %err, "Run rejected before any stage");
                state.fail(&err);
                self.emit_failure(run_id, &state);
                return state.to_report();
            }
        };
        state.result_prefix = Some(ctx.validated.result_prefix.clone());

        if ctx.request.online {
            for branch in Branch::initial(ctx.request.anomalous) {
                self.open_tracking(&ctx, &mut state, branch).await;
            }
        } else {
            debug!(run_id = %run_id, "Offline run; tracking disabled");
        }

        match self.execute(&ctx, &mut state).await {
            Ok(()) => {
                state.succeed();
                info!(
                    run_id = %run_id,
                    second_pass = state.second_pass,
                    prefix = %ctx.validated.result_prefix,
                    "Data reduction finished"
                );
                self.emit(
                    "pipeline.completed",
                    run_id,
                    json!({
                        "second_pass": state.second_pass,
                        "branches": state.active_branches,
                    }),
                );
            }
            Err(err) => {
                error!(
                    run_id = %run_id,
                    stage = ?err.stage_name(),
                    error = %err,
                    "Data reduction failed"
                );
                state.fail(&err);
                let record = FailureRecord {
                    dataset_id: ctx.request.dataset_id.clone(),
                    command_line: self.config.command_line.clone(),
                    program_name: self.config.program_name.clone(),
                    start_time: state.started_at,
                    end_time: Utc::now(),
                    reason: err.to_string(),
                };
                self.reporter.mark_failed(&state.handles, &record).await;
                self.emit_failure(run_id, &state);
            }
        }

        state.to_report()
    }

    fn prepare(&self, run_id: Uuid, request: PipelineRequest) -> Result<RunContext, PipelineError> {
        let validated = request.validate(self.config.min_images)?;
        self.config.validate()?;
        self.catalog.validate()?;
        let workspace = WorkspaceAllocator::new(&self.config.base_directory)?;
        Ok(RunContext {
            run_id,
            request: Arc::new(request),
            validated,
            workspace,
        })
    }

    async fn execute(&self, ctx: &RunContext, state: &mut PipelineState) -> Result<(), PipelineError> {
        let input = self.request_input(ctx, StageKind::Indexing)?;
        let indexing = self.run_single(ctx, state, step::INDEXING, input).await?;

        let input = self
            .request_input(ctx, StageKind::Integration)?
            .with_artifacts(&indexing.artifacts);
        let integration = self.run_single(ctx, state, step::INTEGRATION, input).await?;

        let cutoff = self.resolution_cutoff(ctx, state, None, &integration).await?;

        let input = self
            .input(ctx, StageKind::MergingLaw, None)?
            .with_artifacts(&integration.artifacts)
            .with_param(keys::RESOLUTION_CUTOFF, json!(cutoff));
        let merging = self.run_single(ctx, state, step::MERGING_LAW, input).await?;

        let branches = Branch::initial(ctx.request.anomalous);
        let mut pass = self
            .branch_pass(ctx, state, &branches, &integration, &merging, cutoff)
            .await?;
        state.active_branches = branches;

        let assessment = self.evaluate_signal(ctx, &pass).await;
        state.anomalous_signal = Some(assessment);

        if !ctx.request.anomalous && assessment.is_present() {
            info!(
                run_id = %ctx.run_id,
                value = ?assessment.value,
                threshold = assessment.threshold,
                "Re-running refinement and scaling with anomalous treatment"
            );
            self.emit(
                "second_pass.triggered",
                ctx.run_id,
                json!({"value": assessment.value, "threshold": assessment.threshold}),
            );
            state.active_branches = vec![Branch::Anomalous];
            state.second_pass = true;
            if ctx.request.online {
                self.open_tracking(ctx, state, Branch::Anomalous).await;
            }
            pass = self
                .branch_pass(ctx, state, &[Branch::Anomalous], &integration, &merging, cutoff)
                .await?;
        }

        self.downstream(ctx, state, &pass).await
    }

    /// Runs refinement, per-branch cutoffs and scaling for the given branches.
    async fn branch_pass(
        &self,
        ctx: &RunContext,
        state: &mut PipelineState,
        branches: &[Branch],
        integration: &StageResult,
        merging: &StageResult,
        cutoff: f64,
    ) -> Result<Vec<BranchOutput>, PipelineError> {
        let inputs = branches
            .iter()
            .map(|&branch| {
                self.branch_input(
                    ctx,
                    StageKind::RefineCorrect,
                    branch,
                    &[&integration.artifacts, &merging.artifacts],
                    cutoff,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let refined = self.run_group(ctx, state, step::REFINEMENT, inputs).await?;

        let mut cutoffs = Vec::with_capacity(branches.len());
        for (&branch, refine) in branches.iter().zip(&refined) {
            cutoffs.push(self.resolution_cutoff(ctx, state, Some(branch), refine).await?);
        }

        let mut inputs = Vec::with_capacity(branches.len() * 2);
        for ((&branch, refine), &branch_cutoff) in branches.iter().zip(&refined).zip(&cutoffs) {
            for kind in [StageKind::Scaling, StageKind::ScaleMerge] {
                inputs.push(self.branch_input(ctx, kind, branch, &[&refine.artifacts], branch_cutoff)?);
            }
        }
        let scaled = self.run_group(ctx, state, step::SCALING, inputs).await?;

        branches
            .iter()
            .zip(cutoffs)
            .map(|(&branch, cutoff)| {
                let name = StageKind::Scaling.stage_name(Some(branch));
                let scaling = scaled
                    .iter()
                    .find(|r| r.stage == name)
                    .cloned()
                    .ok_or_else(|| PipelineError::Internal(format!("no result for stage '{name}'")))?;
                Ok::<_, PipelineError>(BranchOutput {
                    branch,
                    cutoff,
                    scaling,
                })
            })
            .collect()
    }

    /// Twinning check plus truncation and uniqueness filtering per branch.
    async fn downstream(
        &self,
        ctx: &RunContext,
        state: &mut PipelineState,
        pass: &[BranchOutput],
    ) -> Result<(), PipelineError> {
        let source = preferred_output(pass)
            .ok_or_else(|| PipelineError::Internal("no scaling output to analyse".to_string()))?;
        let twinning_runner = self.catalog.get(StageKind::Twinning)?;
        let truncate_runner = self.catalog.get(StageKind::Truncate)?;
        let uniqueify_runner = self.catalog.get(StageKind::Uniqueify)?;

        let twinning = self
            .input(ctx, StageKind::Twinning, None)?
            .with_artifacts(&source.scaling.artifacts)
            .with_param(keys::ANOMALOUS, json!(source.branch.is_anomalous()));
        let mut chains = Vec::with_capacity(pass.len());
        for output in pass {
            let truncate = self.branch_input(
                ctx,
                StageKind::Truncate,
                output.branch,
                &[&output.scaling.artifacts],
                output.cutoff,
            )?;
            let uniqueify = self.branch_input(ctx, StageKind::Uniqueify, output.branch, &[], output.cutoff)?;
            chains.push((truncate, uniqueify));
        }

        let mut names = vec![twinning.stage_name()];
        for (truncate, uniqueify) in &chains {
            names.push(truncate.stage_name());
            names.push(uniqueify.stage_name());
        }
        self.begin_step(ctx, state, step::DOWNSTREAM, &names).await;

        let mut group = StageGroup::new(step::DOWNSTREAM);
        group.spawn(twinning_runner, twinning);
        for (truncate, uniqueify) in chains {
            group.spawn_chain(
                (Arc::clone(&truncate_runner), truncate),
                (Arc::clone(&uniqueify_runner), uniqueify),
            );
        }
        self.finish_group(ctx, state, group.join().await).await?;

        if let Some(result) = state.result(StageKind::Twinning, None) {
            if result.artifact_flag(keys::HAS_TWINNING) {
                warn!(run_id = %ctx.run_id, "Twinning detected");
            }
            if result.artifact_flag(keys::HAS_PSEUDOTRANSLATION) {
                warn!(run_id = %ctx.run_id, "Pseudo-translation detected");
            }
        }
        Ok(())
    }

    /// Applies the resolution policy to a stage's completeness table.
    async fn resolution_cutoff(
        &self,
        ctx: &RunContext,
        state: &mut PipelineState,
        branch: Option<Branch>,
        source: &StageResult,
    ) -> Result<f64, PipelineError> {
        self.reporter
            .report(
                &state.handles,
                step::RESOLUTION_CUTOFF,
                TrackingStatus::Launched,
                &format!("Resolution cutoff from {}", source.stage),
            )
            .await;
        let computed = source
            .completeness_entries()
            .and_then(|entries| self.resolution_policy.cutoff(&entries));

        match computed {
            Ok(cutoff) => {
                info!(
                    run_id = %ctx.run_id,
                    stage = %source.stage,
                    cutoff,
                    "Resolution cutoff"
                );
                state.resolution_cutoffs.insert(source.stage.clone(), cutoff);
                self.reporter
                    .report(
                        &state.handles,
                        step::RESOLUTION_CUTOFF,
                        TrackingStatus::Successful,
                        &format!("Resolution cutoff {cutoff:.2} Å"),
                    )
                    .await;
                Ok(cutoff)
            }
            Err(err) => {
                let policy_step = match branch {
                    Some(b) => format!("resolution_cutoff_{}", b.suffix()),
                    None => "resolution_cutoff".to_string(),
                };
                error!(
                    run_id = %ctx.run_id,
                    stage = %source.stage,
                    error = %err,
                    "Resolution cutoff failed"
                );
                state.current_stage = Some(policy_step.clone());
                self.reporter
                    .report(
                        &state.handles,
                        step::RESOLUTION_CUTOFF,
                        TrackingStatus::Failed,
                        &err.to_string(),
                    )
                    .await;
                Err(PipelineError::policy(policy_step, err))
            }
        }
    }

    async fn evaluate_signal(&self, ctx: &RunContext, pass: &[BranchOutput]) -> SignalAssessment {
        let log = match preferred_output(pass) {
            Some(output) => scaling_log(&output.scaling).await,
            None => None,
        };
        let assessment = self.signal_policy.evaluate(log.as_deref());
        if assessment.is_present() {
            info!(
                run_id = %ctx.run_id,
                value = ?assessment.value,
                threshold = assessment.threshold,
                "Significant anomalous signal for this dataset"
            );
        } else {
            info!(
                run_id = %ctx.run_id,
                value = ?assessment.value,
                threshold = assessment.threshold,
                "Insufficient anomalous signal for this dataset"
            );
        }
        assessment
    }

    async fn run_single(
        &self,
        ctx: &RunContext,
        state: &mut PipelineState,
        step_name: &str,
        input: StageInput,
    ) -> Result<StageResult, PipelineError> {
        self.run_group(ctx, state, step_name, vec![input])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Internal(format!("step '{step_name}' produced no result")))
    }

    async fn run_group(
        &self,
        ctx: &RunContext,
        state: &mut PipelineState,
        step_name: &str,
        inputs: Vec<StageInput>,
    ) -> Result<Vec<StageResult>, PipelineError> {
        let runners = inputs
            .iter()
            .map(|input| self.catalog.get(input.kind))
            .collect::<Result<Vec<_>, _>>()?;
        let names: Vec<String> = inputs.iter().map(StageInput::stage_name).collect();
        self.begin_step(ctx, state, step_name, &names).await;

        let mut group = StageGroup::new(step_name);
        for (runner, input) in runners.into_iter().zip(inputs) {
            group.spawn(runner, input);
        }
        self.finish_group(ctx, state, group.join().await).await
    }

    async fn begin_step(&self, ctx: &RunContext, state: &mut PipelineState, step_name: &str, stages: &[String]) {
        state.current_stage = Some(step_name.to_string());
        info!(run_id = %ctx.run_id, step = %step_name, stages = ?stages, "Starting step");
        self.reporter
            .report(
                &state.handles,
                step_name,
                TrackingStatus::Launched,
                &format!("{step_name} started"),
            )
            .await;
        self.emit(
            "group.started",
            ctx.run_id,
            json!({"group": step_name, "stages": stages}),
        );
    }

    /// Records a joined group and turns its first failure into an error.
    async fn finish_group(
        &self,
        ctx: &RunContext,
        state: &mut PipelineState,
        outcome: GroupOutcome,
    ) -> Result<Vec<StageResult>, PipelineError> {
        let elapsed = outcome.elapsed_secs();
        *state.timings.entry(outcome.name.clone()).or_insert(0.0) += elapsed;

        for result in &outcome.results {
            if result.is_success() {
                debug!(
                    run_id = %ctx.run_id,
                    stage = %result.stage,
                    elapsed_secs = result.elapsed_secs(),
                    "Stage completed"
                );
                self.emit(
                    "stage.completed",
                    ctx.run_id,
                    json!({
                        "group": outcome.name,
                        "stage": result.stage,
                        "elapsed_secs": result.elapsed_secs(),
                    }),
                );
            } else {
                warn!(
                    run_id = %ctx.run_id,
                    stage = %result.stage,
                    reason = %result.failure_reason(),
                    "Stage failed"
                );
                self.emit(
                    "stage.failed",
                    ctx.run_id,
                    json!({
                        "group": outcome.name,
                        "stage": result.stage,
                        "reason": result.failure_reason(),
                        "exit_code": result.failure.as_ref().and_then(|f| f.exit_code),
                    }),
                );
            }
            state.record(result.clone());
        }

        let success = outcome.is_success();
        self.emit(
            "group.completed",
            ctx.run_id,
            json!({"group": outcome.name, "success": success, "elapsed_secs": elapsed}),
        );

        if let Some(failed) = outcome.first_failure() {
            let reason = failed.failure_reason();
            self.reporter
                .report(
                    &state.handles,
                    &outcome.name,
                    TrackingStatus::Failed,
                    &format!("{} failed after {elapsed:.1} s: {reason}", failed.stage),
                )
                .await;
            return Err(PipelineError::stage(failed.stage.clone(), reason));
        }

        self.reporter
            .report(
                &state.handles,
                &outcome.name,
                TrackingStatus::Successful,
                &format!("{} finished in {elapsed:.1} s", outcome.name),
            )
            .await;
        Ok(outcome.results)
    }

    fn input(&self, ctx: &RunContext, kind: StageKind, branch: Option<Branch>) -> Result<StageInput, PipelineError> {
        let directory = ctx.workspace.allocate(&kind.stage_name(branch))?;
        Ok(StageInput::new(kind, branch, directory, Arc::clone(&ctx.request)))
    }

    /// Input for a stage that works from the request itself.
    fn request_input(&self, ctx: &RunContext, kind: StageKind) -> Result<StageInput, PipelineError> {
        let mut input = self
            .input(ctx, kind, None)?
            .with_param(keys::IMAGE_START, json!(ctx.request.image_start))
            .with_param(keys::IMAGE_END, json!(ctx.request.image_end))
            .with_param(keys::FILE_TEMPLATE, json!(ctx.validated.file_template));
        if let Some(space_group) = &ctx.validated.space_group {
            input = input.with_param(keys::SPACE_GROUP, serde_json::to_value(space_group)?);
        }
        if let Some(cell) = &ctx.validated.unit_cell {
            input = input.with_param(keys::UNIT_CELL, json!(cell.to_array()));
        }
        Ok(input)
    }

    /// Input for a branch stage; branch parameters win over upstream artifacts.
    fn branch_input(
        &self,
        ctx: &RunContext,
        kind: StageKind,
        branch: Branch,
        sources: &[&Artifacts],
        cutoff: f64,
    ) -> Result<StageInput, PipelineError> {
        let input = sources
            .iter()
            .fold(self.input(ctx, kind, Some(branch))?, |input, artifacts| {
                input.with_artifacts(artifacts)
            });
        Ok(input
            .with_param(keys::RESOLUTION_CUTOFF, json!(cutoff))
            .with_param(keys::ANOMALOUS, json!(branch.is_anomalous())))
    }

    async fn open_tracking(&self, ctx: &RunContext, state: &mut PipelineState, branch: Branch) {
        let request = self.tracking_request(ctx, branch, state.started_at);
        if let Some(handle) = self.reporter.begin(&request).await {
            state.handles.push(handle);
        }
    }

    fn tracking_request(&self, ctx: &RunContext, branch: Branch, start_time: DateTime<Utc>) -> TrackingRequest {
        TrackingRequest {
            dataset_id: ctx.request.dataset_id.clone(),
            command_line: self.config.command_line.clone(),
            program_name: self.config.program_name.clone(),
            anomalous: branch.is_anomalous(),
            start_time,
            comment: TRACKING_COMMENT.to_string(),
        }
    }

    fn emit(&self, event_type: &str, run_id: Uuid, data: serde_json::Value) {
        self.events.emit(&PipelineEvent::new(event_type, run_id, data));
    }

    fn emit_failure(&self, run_id: Uuid, state: &PipelineState) {
        self.emit(
            "pipeline.failed",
            run_id,
            json!({
                "stage": state.failure.as_ref().and_then(|f| f.stage.clone()),
                "reason": state.failure.as_ref().map(|f| f.reason.clone()),
            }),
        );
    }
}

impl std::fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineController")
            .field("config", &self.config)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

/// Anomalous branch output when present, otherwise the first one.
fn preferred_output(pass: &[BranchOutput]) -> Option<&BranchOutput> {
    pass.iter()
        .find(|o| o.branch.is_anomalous())
        .or_else(|| pass.first())
}

/// Scaling log text, inline or read from the logged path.
async fn scaling_log(result: &StageResult) -> Option<String> {
    if let Some(text) = result.artifact_str(keys::SCALING_LOG_TEXT) {
        return Some(text.to_string());
    }
    let path = result.artifact_path(keys::SCALING_LOG)?;
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Could not read scaling log; treating anomalous signal as absent"
            );
            None
        }
    }
}
