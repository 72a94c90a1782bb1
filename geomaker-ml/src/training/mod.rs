//! Simulated training: scheduler state machine, metrics series, early stopping.

pub mod callbacks;
pub mod metrics;
pub mod scheduler;
pub mod simulation;

pub use callbacks::{EarlyStoppingTracker, Observation};
pub use metrics::{EpochMetrics, MetricsSeries};
pub use scheduler::{RunStatus, TickOutcome, TrainingLog, TrainingProgress, TrainingScheduler};
pub use simulation::{MetricSource, SimulatedMetrics};
