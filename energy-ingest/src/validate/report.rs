use energy_domain::DateWindow;
use serde::Serialize;

use super::{Check, QualitySection};
use crate::merge::MergeSummary;

/// A fetch that ended without data after the retry policy gave up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailure {
    pub city: String,
    pub source: String,
    pub error: String,
}

/// Persisted once per run. Carries no wall-clock fields beyond `run_id`, so two
/// runs over the same data differ only in that id.
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub run_id: String,
    pub mode: String,
    pub window: DateWindow,
    pub weather: QualitySection,
    pub energy: QualitySection,
    pub merge: Check<MergeSummary>,
    pub failed_fetches: Vec<FetchFailure>,
}

impl QualityReport {
    pub fn has_findings(&self) -> bool {
        let section = |s: &QualitySection| {
            s.missing_values.is_failed()
                || s.outliers.is_failed()
                || s.freshness.is_failed()
                || s.freshness.ok().is_some_and(|f| f.is_stale)
                || s.outliers.ok().is_some_and(|o| o.values().any(|n| *n > 0))
        };
        section(&self.weather) || section(&self.energy) || self.merge.is_failed() || !self.failed_fetches.is_empty()
    }
}
