//! Anomalous-signal detection from the scaling log.

use serde::{Deserialize, Serialize};

/// Default threshold on the overall anomalous correlation ratio.
pub const DEFAULT_ANOMALOUS_THRESHOLD: f64 = 1.0;

const TABLE_PREFIX: &str = "$TABLE:";
const TABLE_TITLE: &str = "Correlations CC(1/2) within dataset";
const OVERALL_ROW: &str = "Overall";
/// Zero-based column of the statistic in the Overall row.
const VALUE_COLUMN: usize = 3;

/// Outcome of an anomalous-signal evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalAssessment {
    /// Whether the signal justifies anomalous processing.
    pub present: bool,
    /// The parsed statistic, if one was found.
    pub value: Option<f64>,
    /// The threshold that was applied.
    pub threshold: f64,
}

impl SignalAssessment {
    /// Returns true if sufficient signal was found.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.present
    }
}

/// Decides whether a dataset carries a usable anomalous signal.
///
/// Scans the scaling log for the `$TABLE: Correlations CC(1/2) within
/// dataset` block and reads the fourth column of its `Overall` row. A value at
/// or above the threshold counts as signal. A missing table, a missing or
/// short `Overall` row and unparsable numbers all count as no signal rather
/// than as errors. When the log holds several tables the last readable one
/// wins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalousSignalPolicy {
    threshold: f64,
}

impl Default for AnomalousSignalPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ANOMALOUS_THRESHOLD)
    }
}

impl AnomalousSignalPolicy {
    /// Creates a policy with the given inclusive threshold.
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Returns the threshold.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Evaluates a scaling log; `None` means no log was available.
    #[must_use]
    pub fn evaluate(&self, log: Option<&str>) -> SignalAssessment {
        let value = log.and_then(overall_correlation);
        SignalAssessment {
            present: value.is_some_and(|v| v >= self.threshold),
            value,
            threshold: self.threshold,
        }
    }
}

/// Extracts the Overall anomalous correlation from a scaling log.
#[must_use]
pub fn overall_correlation(log: &str) -> Option<f64> {
    let mut found = None;
    let mut lines = log.lines();
    while let Some(line) = lines.next() {
        if !(line.contains(TABLE_PREFIX) && line.contains(TABLE_TITLE)) {
            continue;
        }
        let Some(row) = lines.by_ref().find(|l| l.contains(OVERALL_ROW)) else {
            break;
        };
        if let Some(value) = row
            .split_whitespace()
            .nth(VALUE_COLUMN)
            .and_then(|t| t.parse::<f64>().ok())
            .filter(|v| v.is_finite())
        {
            found = Some(value);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scaling_log_with_overall;

    #[test]
    fn test_signal_above_threshold_is_present() {
        let log = scaling_log_with_overall(1.42);
        let assessment = AnomalousSignalPolicy::default().evaluate(Some(&log));

        assert!(assessment.is_present());
        assert_eq!(assessment.value, Some(1.42));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let log = scaling_log_with_overall(1.0);
        assert!(AnomalousSignalPolicy::new(1.0).evaluate(Some(&log)).is_present());
    }

    #[test]
    fn test_signal_below_threshold_is_absent() {
        let log = scaling_log_with_overall(0.87);
        let assessment = AnomalousSignalPolicy::default().evaluate(Some(&log));

        assert!(!assessment.is_present());
        assert_eq!(assessment.value, Some(0.87));
    }

    #[test]
    fn test_missing_table_is_absent() {
        let assessment = AnomalousSignalPolicy::default()
            .evaluate(Some("Summary data for Project: XDSproject\nOverall  1.0  2.0  3.0\n"));

        assert!(!assessment.is_present());
        assert_eq!(assessment.value, None);
    }

    #[test]
    fn test_no_log_is_absent() {
        assert!(!AnomalousSignalPolicy::default().evaluate(None).is_present());
    }

    #[test]
    fn test_unparsable_overall_row_is_absent() {
        let log = "$TABLE:  Correlations CC(1/2) within dataset, XDSdataset:\n\
                   $GRAPHS ...\n\
                   Overall  0.99  0.52  n/a\n";
        assert!(!AnomalousSignalPolicy::new(0.1).evaluate(Some(log)).is_present());
    }

    #[test]
    fn test_table_without_overall_row_is_absent() {
        let log = "$TABLE:  Correlations CC(1/2) within dataset, XDSdataset:\n  1  0.99  0.5  1.2\n";
        assert_eq!(overall_correlation(log), None);
    }

    #[test]
    fn test_last_table_wins() {
        let log = format!("{}\n{}", scaling_log_with_overall(0.5), scaling_log_with_overall(1.3));
        assert_eq!(overall_correlation(&log), Some(1.3));
    }
}
