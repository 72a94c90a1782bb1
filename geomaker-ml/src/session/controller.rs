//! Async owner of the session and its training timer.
//!
//! Lock order is always `active` before `session`. A tick mutates the
//! session under the write lock, so cancel + reset and a tick never
//! interleave.

use super::{RunStart, Session, UploadReport};
use crate::context::SessionContext;
use crate::error::MlError;
use crate::results::InspectionResult;
use crate::training::{MetricSource, RunStatus, SimulatedMetrics, TickOutcome};
use geomaker_core::{AppConfig, RunConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct ActiveRun {
    run_id: u64,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Drives one [`Session`]: uploads, timed training runs, inspections and reads.
pub struct SessionController {
    session: Arc<RwLock<Session>>,
    active: Mutex<Option<ActiveRun>>,
    tick_interval: Duration,
    seed: Option<u64>,
}

impl SessionController {
    pub fn new(app: &AppConfig) -> Self {
        Self {
            session: Arc::new(RwLock::new(Session::new(app))),
            active: Mutex::new(None),
            tick_interval: Duration::from_millis(app.training.tick_interval_ms.max(1)),
            seed: app.synthesis.seed,
        }
    }

    /// Stop any timer and replace the archive.
    pub async fn upload(&self, file_name: &str, bytes: &[u8]) -> Result<UploadReport, MlError> {
        let mut active = self.active.lock().await;
        stop_timer(active.take());
        let mut session = self.session.write().await;
        session.apply_archive(file_name, bytes)
    }

    /// Start a run fed by simulated metrics.
    pub async fn start(&self) -> Result<RunStart, MlError> {
        self.start_with_source(Box::new(SimulatedMetrics::new(self.seed)))
            .await
    }

    /// Start a run fed by `source`, superseding any active run.
    ///
    /// Validation happens before anything is touched; on failure the
    /// active run (if any) keeps going.
    pub async fn start_with_source(&self, source: Box<dyn MetricSource>) -> Result<RunStart, MlError> {
        let mut active = self.active.lock().await;
        let mut session = self.session.write().await;
        let prepared = session.prepare_run()?;

        if let Some(previous) = active.take() {
            debug!(run_id = previous.run_id, "Superseding active run");
            stop_timer(Some(previous));
        }
        let start = session.commit_run(prepared);
        drop(session);

        let token = CancellationToken::new();
        let handle = tokio::spawn(drive_run(
            self.session.clone(),
            start.run_id,
            source,
            self.tick_interval,
            token.clone(),
        ));
        *active = Some(ActiveRun {
            run_id: start.run_id,
            token,
            handle: Some(handle),
        });
        Ok(start)
    }

    /// Cancel the active run. Returns false when nothing was running.
    pub async fn cancel(&self) -> bool {
        let mut active = self.active.lock().await;
        stop_timer(active.take());
        self.session.write().await.cancel_run()
    }

    /// Wait until the active run's timer exits and return the final status.
    pub async fn wait_for_completion(&self) -> Result<RunStatus, MlError> {
        let handle = {
            let mut active = self.active.lock().await;
            active.as_mut().and_then(|run| run.handle.take())
        };
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| MlError::training(format!("Training task failed: {}", e)))?;
        }
        Ok(self.session.read().await.status())
    }

    /// Consistent clone of the whole session.
    pub async fn snapshot(&self) -> Session {
        self.session.read().await.clone()
    }

    /// Run `f` against the session under the read lock.
    pub async fn read<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        let session = self.session.read().await;
        f(&session)
    }

    pub async fn status(&self) -> RunStatus {
        self.session.read().await.status()
    }

    pub async fn context(&self, domain_hint: Option<&str>) -> Result<SessionContext, MlError> {
        self.session.read().await.context(domain_hint)
    }

    pub async fn update_config(&self, config: RunConfig) -> Vec<String> {
        self.session.write().await.update_config(config)
    }

    pub async fn inspect(&self, image_name: &str, bytes: &[u8]) -> Result<InspectionResult, MlError> {
        self.session.write().await.inspect_image(image_name, bytes)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(run) = self.active.get_mut().take() {
            run.token.cancel();
        }
    }
}

fn stop_timer(run: Option<ActiveRun>) {
    if let Some(run) = run {
        run.token.cancel();
        debug!(run_id = run.run_id, "Training timer stopped");
    }
}

/// Timer loop of one run. Exits on cancellation, a stale tick or a terminal state.
async fn drive_run(
    session: Arc<RwLock<Session>>,
    run_id: u64,
    mut source: Box<dyn MetricSource>,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(run_id, "Training timer cancelled");
                break;
            }
            _ = ticker.tick() => {
                let outcome = session.write().await.tick(run_id, source.as_mut());
                match outcome {
                    TickOutcome::Continue(_) => {}
                    TickOutcome::Stale => break,
                    TickOutcome::Finished { status, metrics } => {
                        info!(run_id, epoch = metrics.epoch, status = %status, "Results available");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_borrows_session_under_lock() {
        let controller = SessionController::new(&AppConfig::default());
        let (status, epochs) = controller
            .read(|s| (s.status(), s.config().epochs))
            .await;
        assert_eq!(status, RunStatus::Idle);
        assert_eq!(epochs, AppConfig::default().run.epochs);
    }

    #[tokio::test]
    async fn test_start_without_archive_leaves_no_timer() {
        let controller = SessionController::new(&AppConfig::default());
        assert!(controller.start().await.is_err());
        assert!(controller.active.lock().await.is_none());
        assert!(!controller.cancel().await);
    }
}
