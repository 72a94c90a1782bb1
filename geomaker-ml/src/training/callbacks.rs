//! Early stopping on validation loss.

use serde::{Deserialize, Serialize};

/// Outcome of feeding one validation loss to the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// New best validation loss.
    Improved { best: f64 },
    /// No improvement; `streak` consecutive epochs without one.
    NotImproved { best: f64, streak: usize },
}

/// Tracks the best validation loss and the epochs since it last improved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarlyStoppingTracker {
    best_valid_loss: Option<f64>,
    epochs_without_improvement: usize,
}

impl EarlyStoppingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a validation loss. Only a strictly lower loss counts as improvement.
    pub fn observe(&mut self, valid_loss: f64) -> Observation {
        match self.best_valid_loss {
            Some(best) if valid_loss >= best => {
                self.epochs_without_improvement += 1;
                Observation::NotImproved {
                    best,
                    streak: self.epochs_without_improvement,
                }
            }
            _ => {
                self.best_valid_loss = Some(valid_loss);
                self.epochs_without_improvement = 0;
                Observation::Improved { best: valid_loss }
            }
        }
    }

    pub fn should_stop(&self, patience: usize) -> bool {
        self.epochs_without_improvement >= patience
    }

    pub fn best_valid_loss(&self) -> Option<f64> {
        self.best_valid_loss
    }

    pub fn epochs_without_improvement(&self) -> usize {
        self.epochs_without_improvement
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_observation_improves() {
        let mut tracker = EarlyStoppingTracker::new();
        assert_eq!(tracker.observe(1.2), Observation::Improved { best: 1.2 });
        assert_eq!(tracker.epochs_without_improvement(), 0);
    }

    #[test]
    fn test_equal_loss_is_not_improvement() {
        let mut tracker = EarlyStoppingTracker::new();
        tracker.observe(0.8);
        assert_eq!(
            tracker.observe(0.8),
            Observation::NotImproved {
                best: 0.8,
                streak: 1
            }
        );
    }

    #[test]
    fn test_patience_and_reset() {
        let mut tracker = EarlyStoppingTracker::new();
        tracker.observe(0.8);
        tracker.observe(0.9);
        assert!(!tracker.should_stop(2));
        tracker.observe(0.85);
        assert!(tracker.should_stop(2));

        tracker.observe(0.5);
        assert!(!tracker.should_stop(2));
        assert_eq!(tracker.best_valid_loss(), Some(0.5));

        tracker.reset();
        assert_eq!(tracker.best_valid_loss(), None);
    }
}
