//! Stale job watchdog.
//!
//! A single background task that periodically fails jobs left `running`
//! past the staleness threshold. It is the only timeout for a hung run:
//! nothing inside an executing agent is cancelled.
//!
//! The first sweep runs as soon as the task starts, so jobs orphaned by a
//! previous process are cleaned up on boot.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::events::{EventBus, LiveEvent, Stage};
use crate::job::{ErrorCode, ErrorScope, Job, JobFailure, JobId, JobState, JobUpdate};
use crate::quality::{self, QualityMetrics};
use crate::store::{JobStore, StoreError};
use crate::trace::{RecorderLimits, TraceRecorder};

pub struct StaleJobWatchdog {
    store: Arc<dyn JobStore>,
    bus: EventBus,
    threshold: Duration,
    interval: Duration,
    limits: RecorderLimits,
}

/// Running watchdog. Dropping the handle leaves the task running; call
/// [`WatchdogHandle::stop`] to end it.
pub struct WatchdogHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl WatchdogHandle {
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!("Watchdog task failed: {}", e);
        }
    }
}

impl StaleJobWatchdog {
    pub fn new(store: Arc<dyn JobStore>, bus: EventBus, threshold: Duration, interval: Duration) -> Self {
        Self {
            store,
            bus,
            threshold,
            interval,
            limits: RecorderLimits::default(),
        }
    }

    pub fn from_config(config: &Config, store: Arc<dyn JobStore>, bus: EventBus) -> Self {
        Self::new(store, bus, config.stale_threshold(), config.watchdog_interval())
            .with_limits(RecorderLimits::from_config(config))
    }

    pub fn with_limits(mut self, limits: RecorderLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn start(self) -> WatchdogHandle {
        let token = CancellationToken::new();
        let cancel = token.clone();
        tracing::info!(
            threshold_secs = self.threshold.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Starting stale job watchdog"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = self.sweep_once().await {
                    tracing::error!("Stale job sweep failed: {}", e);
                }
            }
            tracing::debug!("Stale job watchdog stopped");
        });

        WatchdogHandle { token, handle }
    }

    /// Fail every stale running job once. Returns the ids that were failed.
    ///
    /// A job that moves on between the query and the update is skipped: the
    /// compare-and-set rejects the stale transition.
    pub async fn sweep_once(&self) -> Result<Vec<JobId>, StoreError> {
        let threshold = chrono::Duration::from_std(self.threshold)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let stale = self.store.get_stale_running_jobs(Utc::now() - threshold).await?;
        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let checked = stale.len();
        let mut failed = Vec::new();
        for job in stale {
            match self.fail_stale(&job).await {
                Ok(true) => failed.push(job.id),
                Ok(false) => {}
                Err(e) => tracing::warn!(job_id = %job.id, "Could not fail stale job: {}", e),
            }
        }

        tracing::info!(checked, failed = failed.len(), "Stale job sweep finished");
        Ok(failed)
    }

    async fn fail_stale(&self, job: &Job) -> Result<bool, StoreError> {
        let Ok(transition) = job.machine().fail() else {
            return Ok(false);
        };
        let message = format!(
            "No progress for more than {} minute(s); presumed abandoned",
            self.threshold.as_secs() / 60
        );
        let report = quality::score(&QualityMetrics {
            failed: true,
            error_code: Some(ErrorCode::StaleTimeout),
            ..Default::default()
        });
        let update = JobUpdate {
            result: Some(json!({ "quality": report })),
            failure: Some(JobFailure::new(ErrorCode::StaleTimeout, message.clone())),
        };

        match self.store.transition(job.id, transition, update).await {
            Ok(_) => {}
            Err(StoreError::Conflict { actual, .. }) => {
                tracing::debug!(job_id = %job.id, %actual, "Stale candidate moved on before it was failed");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }
        tracing::warn!(job_id = %job.id, job_type = %job.job_type, "Failed stale job");

        // The job is already failed; trace trouble only costs the trace entry.
        match TraceRecorder::resume(job.id, self.store.clone(), self.bus.clone(), self.limits).await {
            Ok(recorder) => {
                recorder.report_error(
                    ErrorScope::Execution,
                    Some(ErrorCode::StaleTimeout),
                    "Stale job timed out",
                    &message,
                    true,
                );
                let report = recorder.flush().await;
                if !report.is_ok() {
                    tracing::error!(job_id = %job.id, stages = ?report.failed_stages, "Stale job trace not persisted");
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, "Could not open trace for stale job: {}", e);
                self.bus.publish(LiveEvent::Error {
                    job_id: job.id,
                    scope: ErrorScope::Execution,
                    code: Some(ErrorCode::StaleTimeout),
                    message,
                    fatal: true,
                });
            }
        }
        self.bus.publish(LiveEvent::Stage {
            job_id: job.id,
            stage: Stage::Failed,
            state: JobState::Failed,
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NewJob;
    use crate::store::InMemoryJobStore;

    async fn running_job(store: &Arc<dyn JobStore>) -> Job {
        let job = store
            .create_job(Job::new(NewJob::new("docs", json!({ "spec": "x" }))))
            .await
            .unwrap();
        let transition = job.machine().start().unwrap();
        store
            .transition(job.id, transition, JobUpdate::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn sweep_fails_only_stale_running_jobs() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let running = running_job(&store).await;
        let pending = store
            .create_job(Job::new(NewJob::new("docs", json!({ "spec": "x" }))))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let watchdog = StaleJobWatchdog::new(store.clone(), EventBus::default(), Duration::ZERO, Duration::from_secs(60));
        let failed = watchdog.sweep_once().await.unwrap();
        assert_eq!(failed, vec![running.id]);

        let job = store.get_job(running.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failure.unwrap().code, ErrorCode::StaleTimeout);
        assert_eq!(job.result.unwrap()["quality"]["score"], 0);
        assert!(!store.get_trace_events(running.id).await.unwrap().is_empty());

        let untouched = store.get_job(pending.id).await.unwrap().unwrap();
        assert_eq!(untouched.state, JobState::Pending);

        // Nothing left on the second pass.
        assert!(watchdog.sweep_once().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_trace_still_counts_the_failed_job() {
        let memory = Arc::new(InMemoryJobStore::new());
        let store: Arc<dyn JobStore> = memory.clone();
        let running = running_job(&store).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        memory.set_cursor_failure(true);

        let bus = EventBus::default();
        let mut events = bus.subscribe_job(running.id);
        let watchdog = StaleJobWatchdog::new(store.clone(), bus, Duration::ZERO, Duration::from_secs(60));
        assert_eq!(watchdog.sweep_once().await.unwrap(), vec![running.id]);

        let mut stages = Vec::new();
        while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(50), events.recv()).await {
            match event {
                LiveEvent::Error { fatal, code, .. } => {
                    assert!(fatal);
                    assert_eq!(code, Some(ErrorCode::StaleTimeout));
                }
                LiveEvent::Stage { stage, .. } => stages.push(stage),
                _ => {}
            }
        }
        assert_eq!(stages, vec![Stage::Failed]);
        let job = store.get_job(running.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
    }

    #[tokio::test]
    async fn fresh_running_jobs_survive() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let running = running_job(&store).await;

        let watchdog = StaleJobWatchdog::new(
            store.clone(),
            EventBus::default(),
            Duration::from_secs(30 * 60),
            Duration::from_secs(60),
        );
        assert!(watchdog.sweep_once().await.unwrap().is_empty());
        let job = store.get_job(running.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Running);
    }

    #[tokio::test]
    async fn start_sweeps_immediately_and_stops_cleanly() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let running = running_job(&store).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let bus = EventBus::default();
        let mut events = bus.subscribe_job(running.id);
        let handle = StaleJobWatchdog::new(store.clone(), bus, Duration::ZERO, Duration::from_secs(3600)).start();

        let mut saw_stale = false;
        while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            if let LiveEvent::Error { code: Some(ErrorCode::StaleTimeout), .. } = event {
                saw_stale = true;
                break;
            }
        }
        assert!(saw_stale);
        handle.stop().await;

        let job = store.get_job(running.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
    }
}
