//! Testing utilities for autoproc pipelines.
//!
//! This module provides:
//! - Scripted stage runners with call recording
//! - Request, log and completeness-table fixtures
//! - Report assertions

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_report_failed_at, assert_report_succeeded};
pub use fixtures::{completeness_table, sample_request, scaling_log_with_overall, ScriptedPipeline};
pub use mocks::ScriptedStage;
