//! Core types for the agent system.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::ContractError;
use crate::job::{ErrorCode, ErrorScope};
use crate::llm::GenerationError;
use crate::quality::AnalysisDepth;
use crate::store::StoreError;
use crate::tools::{PublishOutcome, ToolError};

/// What an agent kind can do. The orchestrator dispatches on these flags,
/// never on the concrete agent type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    /// Job `type` this agent runs
    pub kind: &'static str,
    pub description: &'static str,
    /// Skill contract the agent's output must satisfy
    pub skill: Option<&'static str>,
    pub requires_planning: bool,
    pub requires_reflection: bool,
    /// Execute through `execute_with_tools` instead of `execute`
    pub uses_tools: bool,
}

/// A contract-validated output as the agent produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractCheck {
    pub skill: String,
    pub attempts: u32,
    pub output: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutput {
    /// Task-specific result, stored under `output` in the job result
    pub result: Value,
    pub contract: Option<ContractCheck>,
    pub targets_configured: u32,
    pub targets_covered: u32,
    pub depth: AnalysisDepth,
    pub multi_pass: bool,
    pub published: Option<PublishOutcome>,
}

/// Critique produced by a reflection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub critique: String,
    #[serde(default)]
    pub issues: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Planning failed: {0}")]
    Planning(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AgentError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AgentError::Contract(ContractError::Violation(_)) => ErrorCode::ContractViolation,
            AgentError::Contract(ContractError::InvalidInput { .. }) => ErrorCode::InvalidInput,
            AgentError::Contract(ContractError::Producer { .. }) => ErrorCode::GenerationFailed,
            AgentError::Contract(_) => ErrorCode::Internal,
            AgentError::Generation(_) => ErrorCode::GenerationFailed,
            AgentError::Tool(e) => e.error_code(),
            AgentError::InvalidInput(_) => ErrorCode::InvalidInput,
            AgentError::Planning(_) => ErrorCode::PlanningFailed,
            AgentError::Store(_) => ErrorCode::Internal,
        }
    }

    pub fn scope(&self) -> ErrorScope {
        match self {
            AgentError::Contract(ContractError::Violation(_))
            | AgentError::Contract(ContractError::InvalidInput { .. })
            | AgentError::InvalidInput(_) => ErrorScope::Validation,
            AgentError::Contract(ContractError::Producer { .. }) | AgentError::Generation(_) => {
                ErrorScope::Ai
            }
            AgentError::Tool(_) => ErrorScope::Tool,
            AgentError::Planning(_) => ErrorScope::Planning,
            AgentError::Contract(_) | AgentError::Store(_) => ErrorScope::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::SkillContractViolation;
    use crate::tools::ToolErrorKind;

    #[test]
    fn codes_follow_the_underlying_failure() {
        let violation = AgentError::from(ContractError::from(SkillContractViolation {
            skill: "doc_bundle".to_string(),
            message: "files: required".to_string(),
            attempts: 2,
            retries_exhausted: true,
        }));
        assert_eq!(violation.code(), ErrorCode::ContractViolation);
        assert_eq!(violation.scope(), ErrorScope::Validation);

        let tool = AgentError::from(ToolError::new("github", "read_file", ToolErrorKind::RateLimited, "slow"));
        assert_eq!(tool.code(), ErrorCode::ToolRateLimited);
        assert_eq!(tool.scope(), ErrorScope::Tool);

        let generation = AgentError::from(GenerationError::not_configured("no key".to_string()));
        assert_eq!(generation.code(), ErrorCode::GenerationFailed);
        assert_eq!(generation.scope(), ErrorScope::Ai);
    }
}
