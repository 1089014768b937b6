//! Anomalous / non-anomalous processing branches.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Treatment of Friedel pairs for one processing branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    /// Friedel pairs kept separate.
    Anomalous,
    /// Friedel pairs merged.
    NonAnomalous,
}

impl Branch {
    /// Returns true for the anomalous treatment.
    #[must_use]
    pub fn is_anomalous(self) -> bool {
        matches!(self, Self::Anomalous)
    }

    /// Working-directory and file-name suffix for the branch.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Anomalous => "anom",
            Self::NonAnomalous => "noanom",
        }
    }

    /// Branches processed in the first pass for a request.
    ///
    /// Requesting anomalous processing runs both treatments side by side;
    /// otherwise only the non-anomalous branch runs and the anomalous one is
    /// left to the signal check.
    #[must_use]
    pub fn initial(anomalous_requested: bool) -> Vec<Self> {
        if anomalous_requested {
            vec![Self::Anomalous, Self::NonAnomalous]
        } else {
            vec![Self::NonAnomalous]
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}
