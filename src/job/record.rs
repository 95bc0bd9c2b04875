//! The persisted job record.
//!
//! # Invariants
//! - `state` is only changed through a `Transition` accepted by `JobStateMachine`
//! - `failure.is_some() <=> state == Failed`
//! - `updated_at >= created_at`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::failure::JobFailure;
use super::state::{JobState, JobStateMachine};

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of agent work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    /// Agent kind that runs this job (e.g. "docs", "test_plan")
    #[serde(rename = "type")]
    pub job_type: String,
    pub state: JobState,
    #[serde(default)]
    pub dry_run: bool,
    /// Task-specific input, opaque to the core
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a fresh pending job.
    pub fn new(new_job: NewJob) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type: new_job.job_type,
            state: JobState::Pending,
            dry_run: new_job.dry_run,
            payload: new_job.payload,
            result: None,
            failure: None,
            parent_id: new_job.parent_id,
            revision_note: new_job.revision_note,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn machine(&self) -> JobStateMachine {
        JobStateMachine::from_state(self.state)
    }

    /// `error` field of the external job shape: `"CODE: message"`.
    pub fn error(&self) -> Option<String> {
        self.failure.as_ref().map(|f| f.summary())
    }
}

/// Submission request for a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_note: Option<String>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            ..Default::default()
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Field changes applied atomically together with a state compare-and-set.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub result: Option<Value>,
    pub failure: Option<JobFailure>,
}

impl JobUpdate {
    pub fn with_result(result: Value) -> Self {
        Self {
            result: Some(result),
            failure: None,
        }
    }

    pub fn with_failure(failure: JobFailure) -> Self {
        Self {
            result: None,
            failure: Some(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ErrorCode, JobFailure};
    use serde_json::json;

    #[test]
    fn new_job_starts_pending() {
        let job = Job::new(NewJob::new("docs", json!({"spec": "x"})).dry_run(true));
        assert_eq!(job.state, JobState::Pending);
        assert!(job.dry_run);
        assert_eq!(job.created_at, job.updated_at);
        assert!(job.error().is_none());
    }

    #[test]
    fn serializes_with_external_field_names() {
        let mut job = Job::new(NewJob::new("docs", json!({})));
        job.failure = Some(JobFailure::new(ErrorCode::StaleTimeout, "stale"));
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "docs");
        assert_eq!(value["state"], "pending");
        assert_eq!(value["dryRun"], false);
        assert_eq!(value["failure"]["code"], "STALE_TIMEOUT");
    }

    #[test]
    fn job_id_round_trips_through_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
