//! SQLite-based job store.
//!
//! All statements run on the blocking pool against a single connection.
//! Timestamps are stored as fixed-width RFC 3339 strings so range queries
//! compare lexicographically.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use super::{db_time, parse_db_time, JobStore, StoreError};
use crate::job::{
    ErrorCode, EvidenceItem, Job, JobFailure, JobId, JobState, JobUpdate, Plan, Transition,
};
use crate::trace::{AiCallRecord, Artifact, TraceCursor, TraceEvent};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY NOT NULL,
    job_type TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending',
    dry_run INTEGER NOT NULL DEFAULT 0,
    payload TEXT NOT NULL,
    result TEXT,
    error TEXT,
    error_code TEXT,
    error_message TEXT,
    parent_id TEXT,
    revision_note TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_updated_at ON jobs(updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_jobs_state_updated ON jobs(state, updated_at);
CREATE INDEX IF NOT EXISTS idx_jobs_parent ON jobs(parent_id) WHERE parent_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS plans (
    job_id TEXT PRIMARY KEY NOT NULL,
    plan_json TEXT NOT NULL,
    evidence TEXT NOT NULL,
    markdown TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS trace_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    step_id TEXT,
    title TEXT NOT NULL,
    status TEXT NOT NULL,
    duration_ms INTEGER,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (job_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_trace_job ON trace_events(job_id, sequence);

CREATE TABLE IF NOT EXISTS artifacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    artifact_type TEXT NOT NULL,
    path TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_artifacts_job ON artifacts(job_id, id);

CREATE TABLE IF NOT EXISTS ai_calls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    call_index INTEGER NOT NULL,
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    purpose TEXT NOT NULL,
    prompt_tokens INTEGER NOT NULL,
    completion_tokens INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    estimated_cost_usd REAL NOT NULL,
    success INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (job_id, call_index)
);
"#;

const JOB_COLUMNS: &str = "id, job_type, state, dry_run, payload, result, error_code, error_message,
     parent_id, revision_note, created_at, updated_at";

pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    pub async fn new(data_dir: PathBuf) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to create data dir: {}", e)))?;
        let db_path = data_dir.join("jobs.db");

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, StoreError>(conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("Task join error: {}", e)))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("Task join error: {}", e)))?
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<RawJob> {
    Ok(RawJob {
        id: row.get(0)?,
        job_type: row.get(1)?,
        state: row.get(2)?,
        dry_run: row.get(3)?,
        payload: row.get(4)?,
        result: row.get(5)?,
        error_code: row.get(6)?,
        error_message: row.get(7)?,
        parent_id: row.get(8)?,
        revision_note: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

/// Column values as stored, decoded outside the rusqlite closure so decode
/// failures surface as `StoreError::Corrupt`.
struct RawJob {
    id: String,
    job_type: String,
    state: String,
    dry_run: bool,
    payload: String,
    result: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    parent_id: Option<String>,
    revision_note: Option<String>,
    created_at: String,
    updated_at: String,
}

fn parse_id(s: &str) -> Result<JobId, StoreError> {
    s.parse()
        .map_err(|e| StoreError::Corrupt(format!("bad job id '{}': {}", s, e)))
}

impl RawJob {
    fn decode(self) -> Result<Job, StoreError> {
        let state = JobState::parse(&self.state)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown state '{}'", self.state)))?;
        let failure = match self.error_code {
            Some(code) => Some(JobFailure::new(
                ErrorCode::parse(&code).unwrap_or(ErrorCode::Internal),
                self.error_message.unwrap_or_default(),
            )),
            None => None,
        };
        Ok(Job {
            id: parse_id(&self.id)?,
            job_type: self.job_type,
            state,
            dry_run: self.dry_run,
            payload: serde_json::from_str(&self.payload)?,
            result: self.result.as_deref().map(serde_json::from_str).transpose()?,
            failure,
            parent_id: self.parent_id.as_deref().map(parse_id).transpose()?,
            revision_note: self.revision_note,
            created_at: parse_db_time(&self.created_at)?,
            updated_at: parse_db_time(&self.updated_at)?,
        })
    }
}

fn query_jobs(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Job>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let raw = stmt
        .query_map(params, job_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter().map(RawJob::decode).collect()
}

fn load_job(conn: &Connection, id: JobId) -> Result<Option<Job>, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id.to_string()],
            job_from_row,
        )
        .optional()?;
    raw.map(RawJob::decode).transpose()
}

fn touch(conn: &Connection, job_id: JobId) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE jobs SET updated_at = MAX(updated_at, ?1) WHERE id = ?2",
        params![db_time(Utc::now()), job_id.to_string()],
    )?;
    Ok(())
}

#[async_trait]
impl JobStore for SqliteJobStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn create_job(&self, job: Job) -> Result<Job, StoreError> {
        let j = job;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO jobs (id, job_type, state, dry_run, payload, result, error, error_code,
                                   error_message, parent_id, revision_note, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    j.id.to_string(),
                    j.job_type,
                    j.state.as_str(),
                    j.dry_run,
                    serde_json::to_string(&j.payload)?,
                    j.result.as_ref().map(serde_json::to_string).transpose()?,
                    j.error(),
                    j.failure.as_ref().map(|f| f.code.as_str()),
                    j.failure.as_ref().map(|f| f.message.clone()),
                    j.parent_id.map(|p| p.to_string()),
                    j.revision_note,
                    db_time(j.created_at),
                    db_time(j.updated_at),
                ],
            )?;
            // Return the stored row: timestamps are kept at millisecond precision.
            load_job(conn, j.id)?.ok_or(StoreError::NotFound(j.id))
        })
        .await
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.with_conn(move |conn| load_job(conn, id)).await
    }

    async fn list_jobs(&self, limit: usize, offset: usize) -> Result<Vec<Job>, StoreError> {
        self.with_conn(move |conn| {
            query_jobs(
                conn,
                &format!(
                    "SELECT {} FROM jobs ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2",
                    JOB_COLUMNS
                ),
                params![limit as i64, offset as i64],
            )
        })
        .await
    }

    async fn transition(
        &self,
        id: JobId,
        transition: Transition,
        update: JobUpdate,
    ) -> Result<Job, StoreError> {
        self.with_conn(move |conn| {
            let result = update.result.as_ref().map(serde_json::to_string).transpose()?;
            let failure = update.failure.as_ref();
            // Single conditional update: the state guard is the compare-and-set.
            let rows = conn.execute(
                "UPDATE jobs SET state = ?1,
                                 result = COALESCE(?2, result),
                                 error = COALESCE(?3, error),
                                 error_code = COALESCE(?4, error_code),
                                 error_message = COALESCE(?5, error_message),
                                 updated_at = MAX(updated_at, ?6)
                 WHERE id = ?7 AND state = ?8",
                params![
                    transition.to.as_str(),
                    result,
                    failure.map(|f| f.summary()),
                    failure.map(|f| f.code.as_str()),
                    failure.map(|f| f.message.clone()),
                    db_time(Utc::now()),
                    id.to_string(),
                    transition.from.as_str(),
                ],
            )?;

            let job = load_job(conn, id)?.ok_or(StoreError::NotFound(id))?;
            if rows == 0 {
                return Err(StoreError::Conflict {
                    job_id: id,
                    expected: transition.from,
                    actual: job.state,
                });
            }
            Ok(job)
        })
        .await
    }

    async fn get_stale_running_jobs(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        self.with_conn(move |conn| {
            query_jobs(
                conn,
                &format!(
                    "SELECT {} FROM jobs WHERE state = 'running' AND updated_at < ?1
                     ORDER BY updated_at ASC",
                    JOB_COLUMNS
                ),
                params![db_time(updated_before)],
            )
        })
        .await
    }

    async fn list_revisions(&self, parent_id: JobId) -> Result<Vec<Job>, StoreError> {
        self.with_conn(move |conn| {
            query_jobs(
                conn,
                &format!(
                    "SELECT {} FROM jobs WHERE parent_id = ?1 ORDER BY created_at ASC, rowid ASC",
                    JOB_COLUMNS
                ),
                params![parent_id.to_string()],
            )
        })
        .await
    }

    async fn save_plan(&self, plan: &Plan) -> Result<(), StoreError> {
        let job_id = plan.job_id;
        let plan_json = serde_json::to_string(plan)?;
        let evidence = serde_json::to_string(&plan.evidence)?;
        let markdown = plan.markdown.clone();
        self.with_conn(move |conn| {
            let rows = conn.execute(
                "INSERT OR IGNORE INTO plans (job_id, plan_json, evidence, markdown, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    job_id.to_string(),
                    plan_json,
                    evidence,
                    markdown,
                    db_time(Utc::now())
                ],
            )?;
            if rows == 0 {
                return Err(StoreError::PlanExists(job_id));
            }
            touch(conn, job_id)
        })
        .await
    }

    async fn get_plan(&self, job_id: JobId) -> Result<Option<Plan>, StoreError> {
        self.with_conn(move |conn| {
            let row: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT plan_json, evidence, markdown FROM plans WHERE job_id = ?1",
                    params![job_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let Some((plan_json, evidence, markdown)) = row else {
                return Ok(None);
            };
            let mut plan: Plan = serde_json::from_str(&plan_json)?;
            plan.evidence = serde_json::from_str(&evidence)?;
            plan.markdown = markdown;
            Ok(Some(plan))
        })
        .await
    }

    async fn update_evidence(
        &self,
        job_id: JobId,
        evidence: &[EvidenceItem],
        markdown: &str,
    ) -> Result<(), StoreError> {
        let evidence = serde_json::to_string(evidence)?;
        let markdown = markdown.to_string();
        self.with_conn(move |conn| {
            let rows = conn.execute(
                "UPDATE plans SET evidence = ?1, markdown = ?2 WHERE job_id = ?3",
                params![evidence, markdown, job_id.to_string()],
            )?;
            if rows == 0 {
                return Err(StoreError::NotFound(job_id));
            }
            Ok(())
        })
        .await
    }

    async fn insert_trace_events(
        &self,
        job_id: JobId,
        events: &[TraceEvent],
    ) -> Result<(), StoreError> {
        let rows = events
            .iter()
            .map(|e| Ok((e.clone(), serde_json::to_string(e)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO trace_events
                        (job_id, sequence, event_type, step_id, title, status, duration_ms, body, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for (event, body) in &rows {
                    stmt.execute(params![
                        job_id.to_string(),
                        event.sequence as i64,
                        event.event_type.as_str(),
                        event.step_id,
                        event.title,
                        event.status.as_str(),
                        event.duration_ms.map(|d| d as i64),
                        body,
                        db_time(event.created_at),
                    ])?;
                }
            }
            touch(&tx, job_id)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn insert_artifacts(
        &self,
        job_id: JobId,
        artifacts: &[Artifact],
    ) -> Result<(), StoreError> {
        let rows = artifacts
            .iter()
            .map(|a| Ok((a.clone(), serde_json::to_string(a)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO artifacts
                        (job_id, artifact_type, path, size_bytes, content_hash, body, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for (artifact, body) in &rows {
                    stmt.execute(params![
                        job_id.to_string(),
                        artifact.artifact_type.as_str(),
                        artifact.path,
                        artifact.size_bytes as i64,
                        artifact.content_hash,
                        body,
                        db_time(artifact.created_at),
                    ])?;
                }
            }
            touch(&tx, job_id)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn insert_ai_calls(
        &self,
        job_id: JobId,
        calls: &[AiCallRecord],
    ) -> Result<(), StoreError> {
        let calls = calls.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO ai_calls
                        (job_id, call_index, provider, model, purpose, prompt_tokens,
                         completion_tokens, duration_ms, estimated_cost_usd, success, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )?;
                for call in &calls {
                    stmt.execute(params![
                        job_id.to_string(),
                        call.call_index,
                        call.provider,
                        call.model,
                        call.purpose,
                        call.prompt_tokens as i64,
                        call.completion_tokens as i64,
                        call.duration_ms as i64,
                        call.estimated_cost_usd,
                        call.success,
                        db_time(call.created_at),
                    ])?;
                }
            }
            touch(&tx, job_id)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_trace_events(&self, job_id: JobId) -> Result<Vec<TraceEvent>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM trace_events WHERE job_id = ?1 ORDER BY sequence ASC",
            )?;
            let bodies = stmt
                .query_map(params![job_id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            bodies
                .iter()
                .map(|b| serde_json::from_str(b).map_err(StoreError::from))
                .collect()
        })
        .await
    }

    async fn get_artifacts(&self, job_id: JobId) -> Result<Vec<Artifact>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT body FROM artifacts WHERE job_id = ?1 ORDER BY id ASC")?;
            let bodies = stmt
                .query_map(params![job_id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            bodies
                .iter()
                .map(|b| serde_json::from_str(b).map_err(StoreError::from))
                .collect()
        })
        .await
    }

    async fn get_ai_calls(&self, job_id: JobId) -> Result<Vec<AiCallRecord>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT call_index, provider, model, purpose, prompt_tokens, completion_tokens,
                        duration_ms, estimated_cost_usd, success, created_at
                 FROM ai_calls WHERE job_id = ?1 ORDER BY call_index ASC",
            )?;
            let rows = stmt
                .query_map(params![job_id.to_string()], |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, f64>(7)?,
                        row.get::<_, bool>(8)?,
                        row.get::<_, String>(9)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(
                    |(
                        call_index,
                        provider,
                        model,
                        purpose,
                        prompt,
                        completion,
                        duration,
                        cost,
                        success,
                        created_at,
                    )| {
                        Ok(AiCallRecord {
                            job_id,
                            call_index,
                            provider,
                            model,
                            purpose,
                            prompt_tokens: prompt.max(0) as u64,
                            completion_tokens: completion.max(0) as u64,
                            duration_ms: duration.max(0) as u64,
                            estimated_cost_usd: cost,
                            success,
                            created_at: parse_db_time(&created_at)?,
                        })
                    },
                )
                .collect()
        })
        .await
    }

    async fn trace_cursor(&self, job_id: JobId) -> Result<TraceCursor, StoreError> {
        self.with_conn(move |conn| {
            let id = job_id.to_string();
            let last_sequence: i64 = conn.query_row(
                "SELECT COALESCE(MAX(sequence), 0) FROM trace_events WHERE job_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            let last_call_index: i64 = conn.query_row(
                "SELECT COALESCE(MAX(call_index), 0) FROM ai_calls WHERE job_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            Ok(TraceCursor {
                last_sequence: last_sequence.max(0) as u64,
                last_call_index: last_call_index.max(0) as u32,
            })
        })
        .await
    }
}
