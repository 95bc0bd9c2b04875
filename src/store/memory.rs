//! In-memory job store (non-persistent).
//!
//! Doubles as the reference backend in tests: insert calls are counted and
//! each flush stage can be made to fail on demand.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{JobStore, StoreError};
use crate::job::{EvidenceItem, Job, JobId, JobState, JobUpdate, Plan, Transition};
use crate::trace::{AiCallRecord, Artifact, FlushStage, TraceCursor, TraceEvent};

#[derive(Default)]
struct Tables {
    jobs: HashMap<JobId, Job>,
    /// Creation order, for revision listing
    order: Vec<JobId>,
    plans: HashMap<JobId, Plan>,
    traces: HashMap<JobId, Vec<TraceEvent>>,
    artifacts: HashMap<JobId, Vec<Artifact>>,
    ai_calls: HashMap<JobId, Vec<AiCallRecord>>,
}

impl Tables {
    fn touch(&mut self, job_id: JobId) {
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.updated_at = Utc::now().max(job.updated_at);
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    tables: Arc<RwLock<Tables>>,
    insert_calls: Arc<AtomicUsize>,
    failing: Arc<StdMutex<HashSet<FlushStage>>>,
    failing_cursor: Arc<AtomicBool>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bulk insert calls received, successful or not.
    pub fn insert_call_count(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Make inserts for one flush stage fail until switched off again.
    pub fn set_insert_failure(&self, stage: FlushStage, fail: bool) {
        let mut failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if fail {
            failing.insert(stage);
        } else {
            failing.remove(&stage);
        }
    }

    /// Make trace cursor reads fail, as when the trace tables are unreadable.
    pub fn set_cursor_failure(&self, fail: bool) {
        self.failing_cursor.store(fail, Ordering::SeqCst);
    }

    fn check_insert(&self, stage: FlushStage) -> Result<(), StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing.contains(&stage) {
            return Err(StoreError::Backend(format!(
                "injected failure for {:?} insert",
                stage
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn create_job(&self, job: Job) -> Result<Job, StoreError> {
        let mut tables = self.tables.write().await;
        tables.order.push(job.id);
        tables.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.tables.read().await.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, limit: usize, offset: usize) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self.tables.read().await.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(jobs.into_iter().skip(offset).take(limit).collect())
    }

    async fn transition(
        &self,
        id: JobId,
        transition: Transition,
        update: JobUpdate,
    ) -> Result<Job, StoreError> {
        let mut tables = self.tables.write().await;
        let job = tables.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if job.state != transition.from {
            return Err(StoreError::Conflict {
                job_id: id,
                expected: transition.from,
                actual: job.state,
            });
        }
        job.state = transition.to;
        if update.result.is_some() {
            job.result = update.result;
        }
        if update.failure.is_some() {
            job.failure = update.failure;
        }
        job.updated_at = Utc::now().max(job.updated_at);
        Ok(job.clone())
    }

    async fn get_stale_running_jobs(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        let tables = self.tables.read().await;
        let mut stale: Vec<Job> = tables
            .jobs
            .values()
            .filter(|j| j.state == JobState::Running && j.updated_at < updated_before)
            .cloned()
            .collect();
        stale.sort_by_key(|j| j.updated_at);
        Ok(stale)
    }

    async fn list_revisions(&self, parent_id: JobId) -> Result<Vec<Job>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .order
            .iter()
            .filter_map(|id| tables.jobs.get(id))
            .filter(|j| j.parent_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn save_plan(&self, plan: &Plan) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.plans.contains_key(&plan.job_id) {
            return Err(StoreError::PlanExists(plan.job_id));
        }
        tables.plans.insert(plan.job_id, plan.clone());
        tables.touch(plan.job_id);
        Ok(())
    }

    async fn get_plan(&self, job_id: JobId) -> Result<Option<Plan>, StoreError> {
        Ok(self.tables.read().await.plans.get(&job_id).cloned())
    }

    async fn update_evidence(
        &self,
        job_id: JobId,
        evidence: &[EvidenceItem],
        markdown: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let plan = tables
            .plans
            .get_mut(&job_id)
            .ok_or(StoreError::NotFound(job_id))?;
        plan.evidence = evidence.to_vec();
        plan.markdown = markdown.to_string();
        Ok(())
    }

    async fn insert_trace_events(
        &self,
        job_id: JobId,
        events: &[TraceEvent],
    ) -> Result<(), StoreError> {
        self.check_insert(FlushStage::Traces)?;
        let mut tables = self.tables.write().await;
        tables
            .traces
            .entry(job_id)
            .or_default()
            .extend_from_slice(events);
        tables.touch(job_id);
        Ok(())
    }

    async fn insert_artifacts(
        &self,
        job_id: JobId,
        artifacts: &[Artifact],
    ) -> Result<(), StoreError> {
        self.check_insert(FlushStage::Artifacts)?;
        let mut tables = self.tables.write().await;
        tables
            .artifacts
            .entry(job_id)
            .or_default()
            .extend_from_slice(artifacts);
        tables.touch(job_id);
        Ok(())
    }

    async fn insert_ai_calls(
        &self,
        job_id: JobId,
        calls: &[AiCallRecord],
    ) -> Result<(), StoreError> {
        self.check_insert(FlushStage::AiCalls)?;
        let mut tables = self.tables.write().await;
        tables
            .ai_calls
            .entry(job_id)
            .or_default()
            .extend_from_slice(calls);
        tables.touch(job_id);
        Ok(())
    }

    async fn get_trace_events(&self, job_id: JobId) -> Result<Vec<TraceEvent>, StoreError> {
        let mut events = self
            .tables
            .read()
            .await
            .traces
            .get(&job_id)
            .cloned()
            .unwrap_or_default();
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    async fn get_artifacts(&self, job_id: JobId) -> Result<Vec<Artifact>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .artifacts
            .get(&job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_ai_calls(&self, job_id: JobId) -> Result<Vec<AiCallRecord>, StoreError> {
        let mut calls = self
            .tables
            .read()
            .await
            .ai_calls
            .get(&job_id)
            .cloned()
            .unwrap_or_default();
        calls.sort_by_key(|c| c.call_index);
        Ok(calls)
    }

    async fn trace_cursor(&self, job_id: JobId) -> Result<TraceCursor, StoreError> {
        if self.failing_cursor.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected trace cursor failure".to_string()));
        }
        let tables = self.tables.read().await;
        Ok(TraceCursor {
            last_sequence: tables
                .traces
                .get(&job_id)
                .and_then(|events| events.iter().map(|e| e.sequence).max())
                .unwrap_or(0),
            last_call_index: tables
                .ai_calls
                .get(&job_id)
                .and_then(|calls| calls.iter().map(|c| c.call_index).max())
                .unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    #[tokio::test]
    async fn passes_store_conformance() {
        conformance::run_all(&InMemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn stale_query() {
        conformance::stale_query_only_returns_old_running_jobs(&InMemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn list_order() {
        conformance::list_is_newest_first(&InMemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn injected_failures_are_per_stage() {
        let store = InMemoryJobStore::new();
        let job_id = JobId::new();
        store.set_insert_failure(FlushStage::Artifacts, true);
        assert!(store.insert_artifacts(job_id, &[]).await.is_err());
        assert!(store.insert_trace_events(job_id, &[]).await.is_ok());
        store.set_insert_failure(FlushStage::Artifacts, false);
        assert!(store.insert_artifacts(job_id, &[]).await.is_ok());
        assert_eq!(store.insert_call_count(), 3);
    }
}
