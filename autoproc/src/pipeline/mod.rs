//! Pipeline sequencing and execution.
//!
//! This module provides:
//! - The processing request and its validation
//! - The stage catalog (one runner per stage kind)
//! - Stage groups with a single join barrier
//! - The controller state machine and its final report

mod catalog;
mod controller;
mod group;
mod report;
mod request;
mod state;

pub use catalog::StageCatalog;
pub use controller::PipelineController;
pub use group::{GroupOutcome, StageGroup};
pub use report::{BranchReport, FailureSummary, ProcessingReport};
pub use request::{file_template, result_prefix, PipelineRequest, ValidatedRequest};
pub use state::PipelineState;
