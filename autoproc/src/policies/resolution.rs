//! Resolution cutoff from per-shell correlation statistics.

use crate::errors::PolicyError;
use serde::{Deserialize, Serialize};

/// One resolution-shell record from an integration or scaling table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletenessEntry {
    /// Shell resolution limit in Å.
    #[serde(alias = "res")]
    pub resolution: f64,
    /// Whether the shell passes the CC(1/2) significance test.
    pub include_res_based_on_cc: bool,
    /// CC(1/2) in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc_half: Option<f64>,
    /// Mean I/σ(I).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i_over_sigma: Option<f64>,
    /// Completeness in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completeness: Option<f64>,
}

impl CompletenessEntry {
    /// Creates an entry with only the fields the policy looks at.
    #[must_use]
    pub fn new(resolution: f64, include_res_based_on_cc: bool) -> Self {
        Self {
            resolution,
            include_res_based_on_cc,
            cc_half: None,
            i_over_sigma: None,
            completeness: None,
        }
    }

    /// Sets the shell statistics.
    #[must_use]
    pub fn with_stats(mut self, cc_half: f64, i_over_sigma: f64) -> Self {
        self.cc_half = Some(cc_half);
        self.i_over_sigma = Some(i_over_sigma);
        self
    }
}

/// Chooses the resolution limit for the next stage.
///
/// The cutoff is the highest resolution (smallest value in Å) among shells
/// flagged for inclusion. There is no numeric fallback: a table without a
/// qualifying shell is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolutionCutoffPolicy;

impl ResolutionCutoffPolicy {
    /// Creates the policy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Computes the cutoff.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::NoQualifyingShell`] if no finite, flagged
    /// shell exists.
    pub fn cutoff(&self, entries: &[CompletenessEntry]) -> Result<f64, PolicyError> {
        entries
            .iter()
            .filter(|e| e.include_res_based_on_cc && e.resolution.is_finite())
            .map(|e| e.resolution)
            .reduce(f64::min)
            .ok_or(PolicyError::NoQualifyingShell {
                shells: entries.len(),
            })
    }
}
