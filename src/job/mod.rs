//! Job module - the unit of agent work and its lifecycle.
//!
//! - `state`: lifecycle state machine with guarded transitions
//! - `record`: the persisted job record and submission types
//! - `failure`: stable error codes and scopes
//! - `plan`: approval plans attached to planning agents' jobs

mod failure;
pub mod plan;
mod record;
mod state;

pub use failure::{ErrorCode, ErrorScope, JobFailure};
pub use plan::{EvidenceItem, EvidenceStatus, Plan, PlanDraft, PlanStep, Risk};
pub use record::{Job, JobId, JobUpdate, NewJob};
pub use state::{InvalidTransition, JobState, JobStateMachine, Transition, Trigger};
