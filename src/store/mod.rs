//! Job storage with pluggable backends.
//!
//! Supports:
//! - `memory`: in-memory storage (non-persistent, for tests and ephemeral runs)
//! - `sqlite`: SQLite database holding jobs, plans and the full trace
//!
//! State changes go through [`JobStore::transition`], a compare-and-set on
//! the expected current state. Two racing callers can never both advance
//! the same job.

mod memory;
mod sqlite;

pub use memory::InMemoryJobStore;
pub use sqlite::SqliteJobStore;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::job::{EvidenceItem, Job, JobId, JobState, JobUpdate, Plan, Transition};
use crate::trace::{AiCallRecord, Artifact, TraceCursor, TraceEvent};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Job {job_id} is '{actual}', expected '{expected}'")]
    Conflict {
        job_id: JobId,
        expected: JobState,
        actual: JobState,
    },

    #[error("Plan for job {0} already exists")]
    PlanExists(JobId),

    #[error("Storage failure: {0}")]
    Backend(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Job store trait, implemented by all storage backends.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    async fn create_job(&self, job: Job) -> Result<Job, StoreError>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// List jobs, ordered by updated_at descending.
    async fn list_jobs(&self, limit: usize, offset: usize) -> Result<Vec<Job>, StoreError>;

    /// Atomically move a job from `transition.from` to `transition.to`,
    /// applying `update` and refreshing `updated_at`.
    ///
    /// # Errors
    /// - `StoreError::NotFound` if the job does not exist
    /// - `StoreError::Conflict` if the job is no longer in `transition.from`
    async fn transition(
        &self,
        id: JobId,
        transition: Transition,
        update: JobUpdate,
    ) -> Result<Job, StoreError>;

    /// Jobs still `running` whose `updated_at` is older than `updated_before`.
    async fn get_stale_running_jobs(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError>;

    /// Child revisions of `parent_id` in creation order.
    async fn list_revisions(&self, parent_id: JobId) -> Result<Vec<Job>, StoreError>;

    /// Persist a job's plan. A job has at most one plan.
    async fn save_plan(&self, plan: &Plan) -> Result<(), StoreError>;

    async fn get_plan(&self, job_id: JobId) -> Result<Option<Plan>, StoreError>;

    /// Replace the evidence checklist (and its rendering); nothing else changes.
    async fn update_evidence(
        &self,
        job_id: JobId,
        evidence: &[EvidenceItem],
        markdown: &str,
    ) -> Result<(), StoreError>;

    /// Bulk insert; also refreshes the job's `updated_at`.
    async fn insert_trace_events(
        &self,
        job_id: JobId,
        events: &[TraceEvent],
    ) -> Result<(), StoreError>;

    /// Bulk insert; also refreshes the job's `updated_at`.
    async fn insert_artifacts(&self, job_id: JobId, artifacts: &[Artifact])
        -> Result<(), StoreError>;

    /// Bulk insert; also refreshes the job's `updated_at`.
    async fn insert_ai_calls(&self, job_id: JobId, calls: &[AiCallRecord])
        -> Result<(), StoreError>;

    /// Trace events in sequence order.
    async fn get_trace_events(&self, job_id: JobId) -> Result<Vec<TraceEvent>, StoreError>;

    async fn get_artifacts(&self, job_id: JobId) -> Result<Vec<Artifact>, StoreError>;

    /// AI-call rows in call-index order.
    async fn get_ai_calls(&self, job_id: JobId) -> Result<Vec<AiCallRecord>, StoreError>;

    /// Highest stored sequence number and AI-call index for a job.
    async fn trace_cursor(&self, job_id: JobId) -> Result<TraceCursor, StoreError>;
}

/// Job store type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobStoreType {
    Memory,
    #[default]
    Sqlite,
}

impl JobStoreType {
    /// Parse from environment variable value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Some(Self::Memory),
            "sqlite" | "db" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// Create a job store based on type and data directory.
pub async fn create_job_store(
    store_type: JobStoreType,
    data_dir: PathBuf,
) -> Result<Arc<dyn JobStore>, StoreError> {
    match store_type {
        JobStoreType::Memory => Ok(Arc::new(InMemoryJobStore::new())),
        JobStoreType::Sqlite => Ok(Arc::new(SqliteJobStore::new(data_dir).await?)),
    }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub(crate) fn db_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_db_time(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", s, e)))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_type_parses_env_values() {
        assert_eq!(JobStoreType::parse("memory"), Some(JobStoreType::Memory));
        assert_eq!(JobStoreType::parse(" SQLite "), Some(JobStoreType::Sqlite));
        assert_eq!(JobStoreType::parse("file"), None);
    }

    #[test]
    fn db_time_sorts_lexicographically() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(1500);
        assert!(db_time(earlier) < db_time(later));
        let parsed = parse_db_time(&db_time(earlier)).unwrap();
        assert_eq!(parsed.timestamp_millis(), earlier.timestamp_millis());
    }

    #[tokio::test]
    async fn factory_builds_memory_store() {
        let store = create_job_store(JobStoreType::Memory, PathBuf::from("/nonexistent"))
            .await
            .unwrap();
        assert!(!store.is_persistent());
    }
}
