//! HTTP API for agentjobs.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `POST /api/jobs` - Submit a job (it starts running immediately)
//! - `GET /api/jobs` - List jobs, most recently updated first
//! - `GET /api/jobs/{id}` - Get a job record
//! - `POST /api/jobs/{id}/approve` - Approve the plan of a waiting job
//! - `POST /api/jobs/{id}/revisions` - Request a revision of a finished job
//! - `GET /api/jobs/{id}/revisions` - List revisions in creation order
//! - `GET /api/jobs/{id}/plan` - Get the job's plan
//! - `GET /api/jobs/{id}/trace` - Persisted trace events
//! - `GET /api/jobs/{id}/artifacts` - Persisted artifacts
//! - `GET /api/jobs/{id}/ai-calls` - Persisted AI-call rows
//! - `GET /api/jobs/{id}/stream` - Live events via SSE

mod jobs;
mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
