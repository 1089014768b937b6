//! Pure decision policies applied between stage groups.
//!
//! Neither policy performs IO; both are plain functions of a stage's
//! structured output.

mod anomalous;
mod resolution;

pub use anomalous::{
    overall_correlation, AnomalousSignalPolicy, SignalAssessment, DEFAULT_ANOMALOUS_THRESHOLD,
};
pub use resolution::{CompletenessEntry, ResolutionCutoffPolicy};
