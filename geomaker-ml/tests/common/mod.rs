//! Shared fixtures for the integration tests.

use geomaker_ml::{EpochMetrics, MetricSource};

/// Metric source that replays a validation-loss script and then repeats
/// its last value.
pub struct ScriptedMetrics {
    valid_losses: Vec<f64>,
}

impl ScriptedMetrics {
    pub fn new(valid_losses: Vec<f64>) -> Self {
        Self { valid_losses }
    }

    /// `improving` strictly decreasing losses followed by a plateau.
    #[allow(dead_code)]
    pub fn improving_then_flat(improving: usize) -> Self {
        Self::new((0..improving.max(1)).map(|i| 1.0 - 0.1 * i as f64).collect())
    }
}

impl MetricSource for ScriptedMetrics {
    fn next_metrics(&mut self, epoch: usize) -> EpochMetrics {
        let valid_loss = self
            .valid_losses
            .get(epoch.saturating_sub(1))
            .or(self.valid_losses.last())
            .copied()
            .unwrap_or(1.0);
        EpochMetrics {
            epoch,
            train_loss: (valid_loss - 0.1).max(0.0),
            valid_loss,
            train_acc: 0.6,
            valid_acc: 0.55,
        }
    }
}
