//! Live event side-channel.
//!
//! A single broadcast channel carries events for every job; subscribers filter
//! by job id. Publishing never blocks and never fails the caller: with no
//! subscribers the event is simply dropped, and slow subscribers observe a
//! lag instead of back-pressuring the publisher.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::job::{ErrorCode, ErrorScope, JobId, JobState};
use crate::trace::{Artifact, TraceEvent};

/// Lifecycle phase announced on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Started,
    Planning,
    AwaitingApproval,
    Executing,
    Validating,
    Reflecting,
    Scoring,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    Trace {
        job_id: JobId,
        event: TraceEvent,
    },
    Artifact {
        job_id: JobId,
        artifact: Artifact,
    },
    Stage {
        job_id: JobId,
        stage: Stage,
        state: JobState,
    },
    Plan {
        job_id: JobId,
        markdown: String,
        requires_approval: bool,
    },
    Log {
        job_id: JobId,
        level: String,
        message: String,
    },
    Error {
        job_id: JobId,
        scope: ErrorScope,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
        message: String,
        fatal: bool,
    },
}

impl LiveEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            LiveEvent::Trace { job_id, .. }
            | LiveEvent::Artifact { job_id, .. }
            | LiveEvent::Stage { job_id, .. }
            | LiveEvent::Plan { job_id, .. }
            | LiveEvent::Log { job_id, .. }
            | LiveEvent::Error { job_id, .. } => *job_id,
        }
    }

    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            LiveEvent::Trace { .. } => "trace",
            LiveEvent::Artifact { .. } => "artifact",
            LiveEvent::Stage { .. } => "stage",
            LiveEvent::Plan { .. } => "plan",
            LiveEvent::Log { .. } => "log",
            LiveEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LiveEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Fire-and-forget publish.
    pub fn publish(&self, event: LiveEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::debug!(job_id = %e.0.job_id(), "No live subscribers, dropped {} event", e.0.event_name());
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.tx.subscribe()
    }

    /// Subscribe to events of a single job.
    pub fn subscribe_job(&self, job_id: JobId) -> JobSubscription {
        JobSubscription {
            job_id,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// A receiver that skips events of other jobs.
pub struct JobSubscription {
    job_id: JobId,
    rx: broadcast::Receiver<LiveEvent>,
}

impl JobSubscription {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Next event for this job.
    ///
    /// `Err(Lagged(n))` means `n` events (of any job) were dropped for this
    /// subscriber; receiving may continue afterwards.
    pub async fn recv(&mut self) -> Result<LiveEvent, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if event.job_id() == self.job_id {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(job_id: JobId, message: &str) -> LiveEvent {
        LiveEvent::Log {
            job_id,
            level: "info".to_string(),
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_harmless() {
        let bus = EventBus::new(4);
        bus.publish(log(JobId::new(), "nobody listening"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn job_subscription_filters_other_jobs() {
        let bus = EventBus::new(16);
        let mine = JobId::new();
        let other = JobId::new();
        let mut sub = bus.subscribe_job(mine);

        bus.publish(log(other, "not mine"));
        bus.publish(log(mine, "first"));
        bus.publish(log(mine, "second"));

        for expected in ["first", "second"] {
            match sub.recv().await.unwrap() {
                LiveEvent::Log { message, .. } => assert_eq!(message, expected),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let job = JobId::new();
        let mut sub = bus.subscribe_job(job);
        for i in 0..5 {
            bus.publish(log(job, &format!("event {i}")));
        }
        assert!(matches!(
            sub.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert!(sub.recv().await.is_ok());
    }

    #[test]
    fn serializes_with_type_tag() {
        let value = serde_json::to_value(LiveEvent::Stage {
            job_id: JobId::new(),
            stage: Stage::Executing,
            state: JobState::Running,
        })
        .unwrap();
        assert_eq!(value["type"], "stage");
        assert_eq!(value["stage"], "executing");
        assert_eq!(value["state"], "running");
    }
}
