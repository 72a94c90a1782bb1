//! Discrete-tick training state machine.
//!
//! `Idle -> Running -> {Completed | EarlyStopped}`; the next `begin` resets
//! to `Running`. Each run gets a new `run_id`, and a tick carrying any other
//! id is rejected without touching state.

use super::callbacks::{EarlyStoppingTracker, Observation};
use super::metrics::{EpochMetrics, MetricsSeries};
use super::simulation::MetricSource;
use crate::classes::EffectiveClasses;
use crate::export::config_entries;
use geomaker_core::RunConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Lifecycle of the simulated training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    EarlyStopped,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::EarlyStopped)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "idle"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::EarlyStopped => write!(f, "early stopped"),
        }
    }
}

/// Progress of the current run. `current_epoch` only increases within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingProgress {
    pub current_epoch: usize,
    pub total_epochs: usize,
    pub status_message: String,
}

/// Human-readable log lines of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingLog {
    lines: Vec<String>,
}

impl TrainingLog {
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The tick belonged to a cancelled or finished run; nothing changed.
    Stale,
    /// Epoch recorded, run keeps going.
    Continue(EpochMetrics),
    /// Epoch recorded and the run reached a terminal state.
    Finished {
        status: RunStatus,
        metrics: EpochMetrics,
    },
}

/// Scheduler state for the session's single training run.
#[derive(Debug, Clone)]
pub struct TrainingScheduler {
    run_id: u64,
    status: RunStatus,
    config: Option<RunConfig>,
    classes: Option<EffectiveClasses>,
    progress: Option<TrainingProgress>,
    metrics: MetricsSeries,
    early_stopping: EarlyStoppingTracker,
    log: TrainingLog,
}

impl Default for TrainingScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingScheduler {
    pub fn new() -> Self {
        Self {
            run_id: 0,
            status: RunStatus::Idle,
            config: None,
            classes: None,
            progress: None,
            metrics: MetricsSeries::new(),
            early_stopping: EarlyStoppingTracker::new(),
            log: TrainingLog::default(),
        }
    }

    /// Start a new run with an already validated effective configuration.
    ///
    /// Any active run is superseded: its id becomes stale before the
    /// metrics, tracker and log are reset.
    pub fn begin(&mut self, config: RunConfig, classes: EffectiveClasses) -> u64 {
        self.run_id += 1;
        self.status = RunStatus::Running;
        self.metrics.clear();
        self.early_stopping.reset();

        self.log.clear();
        self.log.push("INFO: Starting model training process...");
        self.log.push("INFO: Applied configuration parameters:");
        for entry in config_entries(&config, classes.count) {
            self.log
                .push(format!("INFO:  - {}: {}", entry.parameter, entry.value));
        }
        self.log
            .push(format!("INFO:  - Class Names: {}", classes.names.join(", ")));
        self.log.push("INFO: ---");

        self.progress = Some(TrainingProgress {
            current_epoch: 0,
            total_epochs: config.epochs,
            status_message: "INFO: Initializing training environment...".to_string(),
        });
        info!(
            run_id = self.run_id,
            model = config.model_name.as_str(),
            epochs = config.epochs,
            patience = config.patience,
            classes = classes.count,
            "Training run started"
        );
        self.config = Some(config);
        self.classes = Some(classes);
        self.run_id
    }

    /// Advance the run identified by `run_id` by one epoch.
    pub fn tick(&mut self, run_id: u64, source: &mut dyn MetricSource) -> TickOutcome {
        if run_id != self.run_id || self.status != RunStatus::Running {
            debug!(run_id, current = self.run_id, status = %self.status, "Ignoring stale tick");
            return TickOutcome::Stale;
        }
        let Some(config) = self.config.as_ref() else {
            return TickOutcome::Stale;
        };
        let (total, patience) = (config.epochs, config.patience);

        let epoch = self.metrics.len() + 1;
        let mut metrics = source.next_metrics(epoch);
        metrics.epoch = epoch;
        if let Err(e) = self.metrics.record(metrics) {
            warn!(error = %e, "Dropping tick");
            return TickOutcome::Stale;
        }

        self.log.push(format!(
            "DEBUG: Epoch {}: Train Loss: {:.4}, Train Acc: {:.4}, Valid Loss: {:.4}, Valid Acc: {:.4}",
            epoch, metrics.train_loss, metrics.train_acc, metrics.valid_loss, metrics.valid_acc
        ));
        match self.early_stopping.observe(metrics.valid_loss) {
            Observation::Improved { best } => self.log.push(format!(
                "INFO: Epoch {}: New best validation loss: {:.4}.",
                epoch, best
            )),
            Observation::NotImproved { best, streak } => self.log.push(format!(
                "INFO: Epoch {}: Validation loss ({:.4}) did not improve. Best: {:.4}. No improvement for {} epochs.",
                epoch, metrics.valid_loss, best, streak
            )),
        }
        debug!(run_id, epoch, valid_loss = metrics.valid_loss, "Epoch recorded");

        let terminal = if epoch >= total {
            Some((
                RunStatus::Completed,
                "INFO: Training complete (all epochs finished)!".to_string(),
            ))
        } else if self.early_stopping.should_stop(patience) {
            Some((
                RunStatus::EarlyStopped,
                format!(
                    "INFO: Training stopped early at epoch {}. Patience ({}) reached.",
                    epoch, patience
                ),
            ))
        } else {
            None
        };

        match terminal {
            Some((status, message)) => {
                self.status = status;
                self.set_progress(epoch, total, message.clone());
                self.log.push("INFO: ---");
                self.log.push(message);
                self.log.push("INFO: Generating final results...");
                info!(run_id, epoch, status = %status, "Training run finished");
                TickOutcome::Finished { status, metrics }
            }
            None => {
                self.set_progress(
                    epoch,
                    total,
                    format!("INFO: Epoch {}/{} in progress...", epoch, total),
                );
                TickOutcome::Continue(metrics)
            }
        }
    }

    /// Stop the active run, keeping its partial metrics. Returns false when idle.
    pub fn cancel(&mut self) -> bool {
        if self.status != RunStatus::Running {
            return false;
        }
        self.status = RunStatus::Idle;
        let epoch = self.metrics.len();
        let message = format!("INFO: Training cancelled at epoch {}.", epoch);
        if let Some(progress) = self.progress.as_mut() {
            progress.status_message = message.clone();
        }
        self.log.push(message);
        info!(run_id = self.run_id, epoch, "Training run cancelled");
        true
    }

    /// Drop every trace of previous runs (new archive upload).
    pub fn reset(&mut self) {
        let run_id = self.run_id + 1;
        *self = Self::new();
        self.run_id = run_id;
    }

    fn set_progress(&mut self, epoch: usize, total: usize, message: String) {
        self.progress = Some(TrainingProgress {
            current_epoch: epoch,
            total_epochs: total,
            status_message: message,
        });
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Effective configuration of the current or last run.
    pub fn config(&self) -> Option<&RunConfig> {
        self.config.as_ref()
    }

    /// Effective classes of the current or last run.
    pub fn classes(&self) -> Option<&EffectiveClasses> {
        self.classes.as_ref()
    }

    pub fn progress(&self) -> Option<&TrainingProgress> {
        self.progress.as_ref()
    }

    pub fn metrics(&self) -> &MetricsSeries {
        &self.metrics
    }

    pub fn early_stopping(&self) -> &EarlyStoppingTracker {
        &self.early_stopping
    }

    pub fn log(&self) -> &TrainingLog {
        &self.log
    }
}
