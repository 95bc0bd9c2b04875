//! Stable error codes persisted on failed jobs.

use serde::{Deserialize, Serialize};

/// Machine-readable failure code. UIs key remediation hints off these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidTransition,
    StateConflict,
    ContractViolation,
    InvalidInput,
    GenerationFailed,
    PlanningFailed,
    ReflectionFailed,
    ToolUnreachable,
    ToolTimeout,
    ToolUnauthorized,
    ToolForbidden,
    ToolRateLimited,
    ToolServerError,
    ToolProtocolError,
    StaleTimeout,
    UnknownAgent,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidTransition => "INVALID_TRANSITION",
            ErrorCode::StateConflict => "STATE_CONFLICT",
            ErrorCode::ContractViolation => "CONTRACT_VIOLATION",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::GenerationFailed => "GENERATION_FAILED",
            ErrorCode::PlanningFailed => "PLANNING_FAILED",
            ErrorCode::ReflectionFailed => "REFLECTION_FAILED",
            ErrorCode::ToolUnreachable => "TOOL_UNREACHABLE",
            ErrorCode::ToolTimeout => "TOOL_TIMEOUT",
            ErrorCode::ToolUnauthorized => "TOOL_UNAUTHORIZED",
            ErrorCode::ToolForbidden => "TOOL_FORBIDDEN",
            ErrorCode::ToolRateLimited => "TOOL_RATE_LIMITED",
            ErrorCode::ToolServerError => "TOOL_SERVER_ERROR",
            ErrorCode::ToolProtocolError => "TOOL_PROTOCOL_ERROR",
            ErrorCode::StaleTimeout => "STALE_TIMEOUT",
            ErrorCode::UnknownAgent => "UNKNOWN_AGENT",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        const ALL: [ErrorCode; 17] = [
            ErrorCode::InvalidTransition,
            ErrorCode::StateConflict,
            ErrorCode::ContractViolation,
            ErrorCode::InvalidInput,
            ErrorCode::GenerationFailed,
            ErrorCode::PlanningFailed,
            ErrorCode::ReflectionFailed,
            ErrorCode::ToolUnreachable,
            ErrorCode::ToolTimeout,
            ErrorCode::ToolUnauthorized,
            ErrorCode::ToolForbidden,
            ErrorCode::ToolRateLimited,
            ErrorCode::ToolServerError,
            ErrorCode::ToolProtocolError,
            ErrorCode::StaleTimeout,
            ErrorCode::UnknownAgent,
            ErrorCode::Internal,
        ];
        ALL.into_iter().find(|code| code.as_str() == s)
    }

    /// Actionable remediation shown next to a failed job.
    pub fn remediation(&self) -> &'static str {
        match self {
            ErrorCode::InvalidTransition | ErrorCode::StateConflict => {
                "The job was advanced by another caller; reload it before retrying"
            }
            ErrorCode::ContractViolation => {
                "Model output never matched the skill contract; tighten the task description or request a revision"
            }
            ErrorCode::InvalidInput => "Fix the job payload fields reported in the error message",
            ErrorCode::GenerationFailed => "Check the model provider configuration and API key",
            ErrorCode::PlanningFailed => "Give the agent a clearer objective so a plan can be drafted",
            ErrorCode::ReflectionFailed => "Retry the job; the critique pass could not be produced",
            ErrorCode::ToolUnreachable => "Verify network access to the integration host",
            ErrorCode::ToolTimeout => "Retry later; the integration did not answer in time",
            ErrorCode::ToolUnauthorized => "Reconnect the integration; its credentials were rejected",
            ErrorCode::ToolForbidden => "Grant the integration access to the target repository",
            ErrorCode::ToolRateLimited => "Wait for the integration rate limit to reset, then retry",
            ErrorCode::ToolServerError => "The integration is failing upstream; retry later",
            ErrorCode::ToolProtocolError => "The integration returned an unexpected response; check adapter versions",
            ErrorCode::StaleTimeout => "The job stopped reporting progress; resubmit it",
            ErrorCode::UnknownAgent => "Use one of the registered agent types",
            ErrorCode::Internal => "Retry the job; report it if the failure persists",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which phase an error event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    Planning,
    Execution,
    Reflection,
    Validation,
    Tool,
    Ai,
    Unknown,
}

/// Code and message persisted on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl JobFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// One-line form stored in the job's `error` column.
    pub fn summary(&self) -> String {
        format!("{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_parse_from_their_string_form() {
        for code in [
            ErrorCode::StaleTimeout,
            ErrorCode::ContractViolation,
            ErrorCode::ToolRateLimited,
        ] {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("NOPE"), None);
    }

    #[test]
    fn serde_form_matches_string_form() {
        let json = serde_json::to_string(&ErrorCode::StaleTimeout).unwrap();
        assert_eq!(json, "\"STALE_TIMEOUT\"");
    }

    #[test]
    fn summary_includes_code() {
        let failure = JobFailure::new(ErrorCode::StaleTimeout, "no progress for 30 minutes");
        assert_eq!(failure.summary(), "STALE_TIMEOUT: no progress for 30 minutes");
    }
}
