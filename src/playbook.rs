//! Agent playbooks: ordered steps plus planning/reflection flags.
//!
//! # Invariants
//! - Steps run strictly in declaration order, one at a time
//! - The first failing step stops the run and its error is returned as-is
//! - `retryable` does not change control flow; it is reported in the
//!   `step_failed` trace detail so operators can see which failures a
//!   retry could have absorbed

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde_json::{json, Value};

use crate::agents::AgentError;
use crate::trace::TraceRecorder;

type StepAction = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, AgentError>> + Send + Sync>;

/// A named asynchronous action. The action receives the outputs of every
/// earlier step, in order.
#[derive(Clone)]
pub struct PlaybookStep {
    pub name: String,
    pub retryable: bool,
    action: StepAction,
}

impl PlaybookStep {
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, AgentError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            retryable: false,
            action: Arc::new(move |prior| Box::pin(action(prior))),
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl std::fmt::Debug for PlaybookStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybookStep")
            .field("name", &self.name)
            .field("retryable", &self.retryable)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub name: String,
    pub output: Value,
    pub duration: Duration,
}

/// Phases a playbook-driven agent runs around its steps. Agents built on a
/// playbook report these in their [`AgentDescriptor`](crate::agents::AgentDescriptor).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybookPhases {
    pub requires_planning: bool,
    pub requires_reflection: bool,
}

impl PlaybookPhases {
    /// Steps only: no planning, no reflection.
    pub const EXECUTE_ONLY: Self = Self {
        requires_planning: false,
        requires_reflection: false,
    };
}

#[derive(Debug, Clone, Default)]
pub struct Playbook {
    pub steps: Vec<PlaybookStep>,
    pub phases: PlaybookPhases,
}

impl Playbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: PlaybookStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_phases(mut self, phases: PlaybookPhases) -> Self {
        self.phases = phases;
        self
    }

    /// Run every step in order, recording `step_start` and `step_complete`
    /// (or `step_failed`) for each.
    pub async fn execute(&self, recorder: &TraceRecorder) -> Result<Vec<StepResult>, AgentError> {
        let mut results: Vec<StepResult> = Vec::with_capacity(self.steps.len());

        for (index, step) in self.steps.iter().enumerate() {
            recorder.step_start(&step.name, format!("Step {}: {}", index + 1, step.name));
            let started = Instant::now();
            let prior = results.iter().map(|r| r.output.clone()).collect();

            match (step.action)(prior).await {
                Ok(output) => {
                    let duration = started.elapsed();
                    recorder.step_complete(&step.name, format!("Completed {}", step.name), duration);
                    results.push(StepResult {
                        name: step.name.clone(),
                        output,
                        duration,
                    });
                }
                Err(error) => {
                    tracing::warn!(step = %step.name, retryable = step.retryable, "Playbook step failed: {}", error);
                    recorder.step_failed(
                        &step.name,
                        format!("Failed {}", step.name),
                        started.elapsed(),
                        &error.to_string(),
                        Some(json!({
                            "retryable": step.retryable,
                            "code": error.code(),
                            "completedSteps": index,
                        })),
                    );
                    return Err(error);
                }
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::events::EventBus;
    use crate::job::JobId;
    use crate::store::InMemoryJobStore;
    use crate::trace::{RecorderLimits, TraceCursor};

    fn recorder() -> TraceRecorder {
        TraceRecorder::new(
            JobId::new(),
            Arc::new(InMemoryJobStore::new()),
            EventBus::default(),
            RecorderLimits::default(),
            TraceCursor::default(),
        )
    }

    #[tokio::test]
    async fn steps_run_in_order_and_see_prior_outputs() {
        let playbook = Playbook::new()
            .step(PlaybookStep::new("one", |_| async { Ok::<_, AgentError>(json!(1)) }))
            .step(PlaybookStep::new("two", |prior: Vec<Value>| async move {
                Ok::<_, AgentError>(json!(prior.len() + 1))
            }))
            .step(PlaybookStep::new("three", |prior: Vec<Value>| async move {
                Ok::<_, AgentError>(json!(prior))
            }));

        let recorder = recorder();
        let results = playbook.execute(&recorder).await.unwrap();
        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
        assert_eq!(results[2].output, json!([1, 2]));
        // start + complete per step
        assert_eq!(recorder.pending_len(), 6);
    }

    #[tokio::test]
    async fn failure_propagates_immediately_even_when_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let after = calls.clone();
        let failing = calls.clone();
        let playbook = Playbook::new()
            .step(
                PlaybookStep::new("flaky", move |_| {
                    let failing = failing.clone();
                    async move {
                        failing.fetch_add(1, Ordering::SeqCst);
                        Err::<Value, _>(AgentError::InvalidInput("bad spec".to_string()))
                    }
                })
                .retryable(true),
            )
            .step(PlaybookStep::new("never", move |_| {
                let after = after.clone();
                async move {
                    after.fetch_add(100, Ordering::SeqCst);
                    Ok::<_, AgentError>(Value::Null)
                }
            }));

        let err = playbook.execute(&recorder()).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidInput(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
