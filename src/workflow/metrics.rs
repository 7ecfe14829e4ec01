//! Outcome tallies for a finished batch.

use crate::models::{GenerationResult, ItemFailure};

/// Aggregated counts for one batch run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchMetrics {
    /// Items that produced a real record.
    pub succeeded: usize,
    /// Sentinels caused by unparseable or non-object responses.
    pub invalid_json: usize,
    /// Sentinels caused by responses missing declared fields.
    pub missing_fields: usize,
    /// Sentinels caused by failed service calls.
    pub service_errors: usize,
    /// Sentinels for item tasks that died.
    pub aborted: usize,
}

impl BatchMetrics {
    pub fn from_results(results: &[GenerationResult]) -> Self {
        let mut metrics = Self::default();
        for result in results {
            metrics.record(result);
        }
        metrics
    }

    pub fn record(&mut self, result: &GenerationResult) {
        match result.failure() {
            None => self.succeeded += 1,
            Some(ItemFailure::InvalidJson) => self.invalid_json += 1,
            Some(ItemFailure::MissingFields) => self.missing_fields += 1,
            Some(ItemFailure::Service) => self.service_errors += 1,
            Some(ItemFailure::Aborted) => self.aborted += 1,
        }
    }

    pub fn sentinels(&self) -> usize {
        self.invalid_json + self.missing_fields + self.service_errors + self.aborted
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.sentinels()
    }
}
