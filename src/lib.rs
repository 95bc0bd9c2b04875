//! # agentjobs
//!
//! Self-hosted orchestrator for autonomous engineering agent jobs.
//!
//! This library provides:
//! - A guarded job lifecycle with compare-and-set persistence
//! - Agents that plan, execute, validate against skill contracts and reflect
//! - An explainable, redacted trace of every step, tool call and AI call
//! - Live job events over SSE for dashboards
//!
//! ## Architecture
//!
//! ```text
//!   POST /api/jobs ──▶ Orchestrator ──▶ Agent (docs, test_plan)
//!                          │               │
//!                          │               ├──▶ Generator (LLM)
//!                          │               └──▶ RepoTool (branch, commit, PR)
//!                          ▼
//!                     TraceRecorder ──▶ JobStore (memory | sqlite)
//!                          │
//!                          └──▶ EventBus ──▶ SSE subscribers
//! ```
//!
//! ## Job Flow
//! 1. Submit: payload validated against the agent's skill input schema
//! 2. Plan (optional): persisted, may pause for approval
//! 3. Execute, then re-validate output against its skill contract
//! 4. Reflect (optional), score quality, complete or fail
//!
//! ## Modules
//! - `job`: job record, state machine, plans, error codes
//! - `contract`: skill contracts and bounded-retry parsing
//! - `agents`: agent capability trait and built-in agents
//! - `orchestrator`: end-to-end job lifecycle
//! - `trace`: trace events, artifacts, redaction and the recorder
//! - `store`: job persistence backends
//! - `watchdog`: stale running job cleanup

pub mod agents;
pub mod api;
pub mod config;
pub mod contract;
pub mod cost;
pub mod events;
pub mod job;
pub mod llm;
pub mod orchestrator;
pub mod playbook;
pub mod quality;
pub mod store;
pub mod tools;
pub mod trace;
mod util;
pub mod watchdog;

pub use config::Config;
pub use orchestrator::{Orchestrator, OrchestratorError};
