//! Job endpoints and the per-job live stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use futures::stream::Stream;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;

use super::routes::AppState;
use super::types::{ApiError, ListQuery, RevisionRequest, SubmitJobRequest};
use crate::events::{LiveEvent, Stage};
use crate::job::{Job, JobId, NewJob, Plan};
use crate::trace::{AiCallRecord, Artifact, TraceEvent};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

type ApiResult<T> = Result<T, ApiError>;

/// Submit a job and start running it.
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state
        .orchestrator
        .submit(NewJob::new(req.job_type, req.payload).dry_run(req.dry_run))
        .await?;
    state.orchestrator.spawn_run(job.id);
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    let jobs = state
        .orchestrator
        .store()
        .list_jobs(query.limit(), query.offset())
        .await?;
    Ok(Json(jobs))
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.orchestrator.get_job(id).await?))
}

/// Approval signal. Returns once the job is running again; execution
/// continues in the background.
pub async fn approve_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state.orchestrator.resume(id).await?;
    tracing::info!(job_id = %id, "Plan approved");
    state.orchestrator.spawn_continue(job.clone());
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn create_revision(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
    Json(req): Json<RevisionRequest>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state.orchestrator.submit_revision(id, &req.note).await?;
    state.orchestrator.spawn_run(job.id);
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn list_revisions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<Vec<Job>>> {
    state.orchestrator.get_job(id).await?;
    Ok(Json(state.orchestrator.store().list_revisions(id).await?))
}

pub async fn get_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<Plan>> {
    state.orchestrator.get_job(id).await?;
    state
        .orchestrator
        .store()
        .get_plan(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Job {} has no plan", id)))
}

pub async fn get_trace(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<Vec<TraceEvent>>> {
    state.orchestrator.get_job(id).await?;
    Ok(Json(state.orchestrator.store().get_trace_events(id).await?))
}

pub async fn get_artifacts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<Vec<Artifact>>> {
    state.orchestrator.get_job(id).await?;
    Ok(Json(state.orchestrator.store().get_artifacts(id).await?))
}

pub async fn get_ai_calls(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<Vec<AiCallRecord>>> {
    state.orchestrator.get_job(id).await?;
    Ok(Json(state.orchestrator.store().get_ai_calls(id).await?))
}

fn sse_event<T: Serialize>(name: &str, data: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(data)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// Live events for one job. Starts with a snapshot of the job record and
/// ends after the job reaches a terminal stage.
pub async fn stream_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Subscribe before the snapshot so nothing in between is missed.
    let mut events = state.orchestrator.bus().subscribe_job(id);
    let snapshot = state.orchestrator.get_job(id).await?;

    let stream = async_stream::stream! {
        let finished = snapshot.state.is_terminal();
        yield Ok(sse_event("snapshot", &snapshot));
        if finished {
            return;
        }

        loop {
            match events.recv().await {
                Ok(event) => {
                    let terminal = matches!(
                        event,
                        LiveEvent::Stage { stage: Stage::Completed | Stage::Failed, .. }
                    );
                    yield Ok(sse_event(event.event_name(), &event));
                    if terminal {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    yield Ok(sse_event("error", &json!({
                        "jobId": id,
                        "message": format!("event stream lagged; {} events were dropped", skipped),
                    })));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keepalive"),
    ))
}
