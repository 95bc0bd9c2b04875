//! Job lifecycle state machine.
//!
//! # State Machine
//! ```text
//! Pending -> Running -> Completed
//!              |  ^
//!              v  |
//!        AwaitingApproval
//!
//! Pending | Running | AwaitingApproval -> Failed
//! ```
//!
//! # Invariants
//! - Exactly one current state at any time
//! - A rejected trigger leaves the state untouched
//! - `Completed` and `Failed` are terminal

use serde::{Deserialize, Serialize};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Submitted, not yet picked up
    Pending,
    /// An orchestrator run owns the job
    Running,
    /// Halted until an external approval signal arrives
    AwaitingApproval,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl JobState {
    /// # Property
    /// `is_terminal() => no trigger succeeds`
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::AwaitingApproval => "awaiting_approval",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Parse the persisted form. Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobState::Pending),
            "running" => Some(JobState::Running),
            "awaiting_approval" => Some(JobState::AwaitingApproval),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named edge of the lifecycle graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Start,
    AwaitApproval,
    Resume,
    Complete,
    Fail,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Start => "start",
            Trigger::AwaitApproval => "await_approval",
            Trigger::Resume => "resume",
            Trigger::Complete => "complete",
            Trigger::Fail => "fail",
        }
    }

    /// Target state of this trigger when fired from `from`, or `None` if the
    /// edge does not exist.
    pub fn target(&self, from: JobState) -> Option<JobState> {
        match (self, from) {
            (Trigger::Start, JobState::Pending) => Some(JobState::Running),
            (Trigger::AwaitApproval, JobState::Running) => Some(JobState::AwaitingApproval),
            (Trigger::Resume, JobState::AwaitingApproval) => Some(JobState::Running),
            (Trigger::Complete, JobState::Running) => Some(JobState::Completed),
            (Trigger::Fail, s) if !s.is_terminal() => Some(JobState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trigger fired against a state that has no outgoing edge for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid transition '{trigger}' from state '{current}'")]
pub struct InvalidTransition {
    pub trigger: Trigger,
    pub current: JobState,
}

/// An accepted edge, returned so callers can persist it as a compare-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub trigger: Trigger,
    pub from: JobState,
    pub to: JobState,
}

/// Finite-state lifecycle for one job instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStateMachine {
    state: JobState,
}

impl JobStateMachine {
    /// New machine at `Pending`.
    pub fn new() -> Self {
        Self {
            state: JobState::Pending,
        }
    }

    /// Rehydrate from a persisted state.
    pub fn from_state(state: JobState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_awaiting_approval(&self) -> bool {
        self.state == JobState::AwaitingApproval
    }

    /// Check a trigger without applying it.
    ///
    /// # Errors
    /// Returns `InvalidTransition` if the edge does not exist from the current state.
    pub fn check(&self, trigger: Trigger) -> Result<Transition, InvalidTransition> {
        trigger
            .target(self.state)
            .map(|to| Transition {
                trigger,
                from: self.state,
                to,
            })
            .ok_or(InvalidTransition {
                trigger,
                current: self.state,
            })
    }

    /// Check and apply a trigger.
    ///
    /// # Postcondition
    /// On `Err`, `self.state()` is unchanged.
    pub fn fire(&mut self, trigger: Trigger) -> Result<Transition, InvalidTransition> {
        let transition = self.check(trigger)?;
        self.state = transition.to;
        Ok(transition)
    }

    pub fn start(&mut self) -> Result<Transition, InvalidTransition> {
        self.fire(Trigger::Start)
    }

    pub fn await_approval(&mut self) -> Result<Transition, InvalidTransition> {
        self.fire(Trigger::AwaitApproval)
    }

    pub fn resume(&mut self) -> Result<Transition, InvalidTransition> {
        self.fire(Trigger::Resume)
    }

    pub fn complete(&mut self) -> Result<Transition, InvalidTransition> {
        self.fire(Trigger::Complete)
    }

    pub fn fail(&mut self) -> Result<Transition, InvalidTransition> {
        self.fire(Trigger::Fail)
    }
}

impl Default for JobStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
