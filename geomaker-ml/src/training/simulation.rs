//! Synthetic metric sources.
//!
//! Only the trend is contractual: losses fall in expectation with bounded
//! noise, accuracies rise in expectation and saturate below 1.0.

use super::metrics::EpochMetrics;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Upper bound of the uniform noise added to losses.
pub const LOSS_NOISE: f64 = 0.2;
/// Upper bound of the uniform noise added to accuracies.
pub const ACC_NOISE: f64 = 0.1;
/// Validation loss sits this much above training loss before noise.
pub const VALID_LOSS_OFFSET: f64 = 0.1;
pub const MAX_TRAIN_ACC: f64 = 0.95;
pub const MAX_VALID_ACC: f64 = 0.90;

/// Produces the metrics of each simulated epoch.
pub trait MetricSource: Send {
    fn next_metrics(&mut self, epoch: usize) -> EpochMetrics;
}

/// Noise-free loss baseline for `epoch` (>= 1).
pub fn loss_baseline(epoch: usize) -> f64 {
    1.0 / ((epoch + 1) as f64).log10()
}

/// Noise-free accuracy increment for `epoch` (>= 1).
pub fn acc_baseline(epoch: usize) -> f64 {
    (epoch.max(1) as f64).ln() * 0.1
}

/// Default simulation driven by a seedable RNG.
#[derive(Debug, Clone)]
pub struct SimulatedMetrics {
    rng: StdRng,
}

impl SimulatedMetrics {
    /// Seeded when `seed` is set, entropy-seeded otherwise.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

impl MetricSource for SimulatedMetrics {
    fn next_metrics(&mut self, epoch: usize) -> EpochMetrics {
        let loss = loss_baseline(epoch);
        let acc = acc_baseline(epoch);
        EpochMetrics {
            epoch,
            train_loss: loss + self.rng.gen_range(0.0..LOSS_NOISE),
            valid_loss: loss + VALID_LOSS_OFFSET + self.rng.gen_range(0.0..LOSS_NOISE),
            train_acc: (0.5 + acc + self.rng.gen_range(0.0..ACC_NOISE)).min(MAX_TRAIN_ACC),
            valid_acc: (0.45 + acc + self.rng.gen_range(0.0..ACC_NOISE)).min(MAX_VALID_ACC),
        }
    }
}

/// Replays a fixed validation-loss script; repeats the last value once exhausted.
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct ScriptedMetrics {
    valid_losses: Vec<f64>,
}

#[cfg(test)]
impl ScriptedMetrics {
    pub(crate) fn new(valid_losses: Vec<f64>) -> Self {
        Self { valid_losses }
    }

    /// `improving` strictly decreasing losses followed by a flat plateau.
    pub(crate) fn improving_then_flat(improving: usize) -> Self {
        let losses = (0..improving.max(1))
            .map(|i| 1.0 - 0.1 * i as f64)
            .collect();
        Self::new(losses)
    }
}

#[cfg(test)]
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
            train_loss: (valid_loss - VALID_LOSS_OFFSET).max(0.0),
            valid_loss,
            train_acc: (0.5 + acc_baseline(epoch)).min(MAX_TRAIN_ACC),
            valid_acc: (0.45 + acc_baseline(epoch)).min(MAX_VALID_ACC),
        }
    }
}
