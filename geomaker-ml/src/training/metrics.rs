//! Per-epoch training metrics.

use crate::error::MlError;
use serde::{Deserialize, Serialize};

/// Metrics recorded for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub valid_loss: f64,
    pub train_acc: f64,
    pub valid_acc: f64,
}

/// Append-only time series of epoch metrics owned by the active run.
///
/// Epochs are strictly increasing integers starting at 1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsSeries {
    records: Vec<EpochMetrics>,
}

impl MetricsSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the record for the next epoch.
    pub fn record(&mut self, metrics: EpochMetrics) -> Result<(), MlError> {
        let expected = self.records.len() + 1;
        if metrics.epoch != expected {
            return Err(MlError::training(format!(
                "Out-of-order epoch {} (expected {})",
                metrics.epoch, expected
            )));
        }
        self.records.push(metrics);
        Ok(())
    }

    pub fn all(&self) -> &[EpochMetrics] {
        &self.records
    }

    /// The most recent `n` records, oldest first.
    pub fn recent(&self, n: usize) -> &[EpochMetrics] {
        let start = self.records.len().saturating_sub(n);
        &self.records[start..]
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.records.last()
    }

    /// The epoch with the lowest validation loss (earliest on ties).
    pub fn best(&self) -> Option<&EpochMetrics> {
        self.records
            .iter()
            .fold(None, |best: Option<&EpochMetrics>, m| match best {
                Some(b) if b.valid_loss <= m.valid_loss => Some(b),
                _ => Some(m),
            })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
