//! Skill contracts and the bounded facet-retry loop.
//!
//! A skill contract is a named input/output JSON Schema pair. Agent output is
//! untrusted until it validates against the output schema; generation is
//! retried at most [`MAX_FACET_ATTEMPTS`] times before the job fails with a
//! [`SkillContractViolation`].
//!
//! Input is validated eagerly and never consumes a generation attempt.

mod skills;

pub use skills::{SkillRegistry, DOC_BUNDLE, PLAN, REFLECTION, TEST_PLAN};

use std::future::Future;

use jsonschema::Validator;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound on producer calls per contract check.
pub const MAX_FACET_ATTEMPTS: u32 = 2;

/// One schema failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractIssue {
    pub message: String,
}

impl ContractIssue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Join issues into the single description carried by errors.
pub fn describe_issues(issues: &[ContractIssue]) -> String {
    issues
        .iter()
        .map(|i| i.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Generated output never conformed after the bounded retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("Skill '{skill}' output violated its contract after {attempts} attempt(s): {message}")]
pub struct SkillContractViolation {
    pub skill: String,
    /// Last validation failure, issues joined
    pub message: String,
    pub attempts: u32,
    pub retries_exhausted: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ContractError {
    #[error(transparent)]
    Violation(#[from] SkillContractViolation),

    #[error("Invalid input for skill '{skill}': {message}")]
    InvalidInput { skill: String, message: String },

    #[error("Producer for skill '{skill}' failed: {message}")]
    Producer { skill: String, message: String },

    #[error("Unknown skill: {0}")]
    UnknownSkill(String),

    #[error("Invalid schema for skill '{skill}': {message}")]
    InvalidSchema { skill: String, message: String },
}

/// Why a producer could not hand over a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateError {
    /// Output was produced but could not be parsed; counts as a failed attempt.
    Malformed(String),
    /// The producer itself broke (e.g. generation failed); aborts the loop.
    Fatal(String),
}

/// A named input/output schema pair. Stateless; built once at startup.
pub struct SkillContract {
    name: String,
    description: String,
    input_schema: Value,
    output_schema: Value,
    input: Validator,
    output: Validator,
    constraints: Vec<String>,
    failure_modes: Vec<String>,
}

impl std::fmt::Debug for SkillContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillContract")
            .field("name", &self.name)
            .field("constraints", &self.constraints)
            .field("failure_modes", &self.failure_modes)
            .finish()
    }
}

impl SkillContract {
    /// Compile a contract.
    ///
    /// # Errors
    /// Returns `ContractError::InvalidSchema` if either schema does not compile.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        output_schema: Value,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let compile = |schema: &Value| {
            jsonschema::validator_for(schema).map_err(|e| ContractError::InvalidSchema {
                skill: name.clone(),
                message: e.to_string(),
            })
        };
        let input = compile(&input_schema)?;
        let output = compile(&output_schema)?;
        Ok(Self {
            name,
            description: description.into(),
            input_schema,
            output_schema,
            input,
            output,
            constraints: Vec::new(),
            failure_modes: Vec::new(),
        })
    }

    pub fn with_constraints(mut self, constraints: &[&str]) -> Self {
        self.constraints = constraints.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_failure_modes(mut self, modes: &[&str]) -> Self {
        self.failure_modes = modes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn output_schema(&self) -> &Value {
        &self.output_schema
    }

    pub fn constraints(&self) -> &[String] {
        &self.constraints
    }

    pub fn failure_modes(&self) -> &[String] {
        &self.failure_modes
    }

    pub fn check_input(&self, input: &Value) -> Vec<ContractIssue> {
        collect_issues(&self.input, input)
    }

    pub fn check_output(&self, output: &Value) -> Vec<ContractIssue> {
        collect_issues(&self.output, output)
    }

    /// # Errors
    /// Returns `ContractError::InvalidInput` with every issue joined.
    pub fn validate_input(&self, input: &Value) -> Result<(), ContractError> {
        let issues = self.check_input(input);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ContractError::InvalidInput {
                skill: self.name.clone(),
                message: describe_issues(&issues),
            })
        }
    }

    /// Prompt text describing the output shape, appended to generation tasks.
    pub fn output_instructions(&self) -> String {
        let mut out = format!(
            "Respond with a single JSON object for skill '{}' matching this JSON Schema:\n{}",
            self.name, self.output_schema
        );
        for c in &self.constraints {
            out.push_str(&format!("\n- {}", c));
        }
        out
    }
}

fn collect_issues(validator: &Validator, instance: &Value) -> Vec<ContractIssue> {
    validator
        .iter_errors(instance)
        .map(|err| ContractIssue::new(err.to_string()))
        .collect()
}

/// A contract-conforming value plus how many attempts it took.
#[derive(Debug, Clone)]
pub struct FacetOutcome<T> {
    pub value: T,
    pub raw: Value,
    pub attempts: u32,
}

/// Call `produce(attempt)` up to [`MAX_FACET_ATTEMPTS`] times and return the
/// first candidate that conforms to `contract`'s output schema and
/// deserializes into `T`.
///
/// Attempts are numbered from 1. The contract is never mutated.
///
/// # Errors
/// - `ContractError::Violation` when no attempt conforms
/// - `ContractError::Producer` when the producer reports `CandidateError::Fatal`
pub async fn parse_with_facet_retry<T, F, Fut>(
    contract: &SkillContract,
    mut produce: F,
) -> Result<FacetOutcome<T>, ContractError>
where
    T: DeserializeOwned,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Value, CandidateError>>,
{
    let mut last_issues: Vec<ContractIssue> = Vec::new();

    for attempt in 1..=MAX_FACET_ATTEMPTS {
        let candidate = match produce(attempt).await {
            Ok(value) => value,
            Err(CandidateError::Malformed(message)) => {
                tracing::warn!(skill = contract.name(), attempt, "Unparseable candidate: {}", message);
                last_issues = vec![ContractIssue::new(message)];
                continue;
            }
            Err(CandidateError::Fatal(message)) => {
                return Err(ContractError::Producer {
                    skill: contract.name().to_string(),
                    message,
                });
            }
        };

        let issues = contract.check_output(&candidate);
        if !issues.is_empty() {
            tracing::warn!(
                skill = contract.name(),
                attempt,
                "Candidate failed contract: {}",
                describe_issues(&issues)
            );
            last_issues = issues;
            continue;
        }

        match serde_json::from_value::<T>(candidate.clone()) {
            Ok(value) => {
                return Ok(FacetOutcome {
                    value,
                    raw: candidate,
                    attempts: attempt,
                })
            }
            Err(e) => last_issues = vec![ContractIssue::new(e.to_string())],
        }
    }

    Err(SkillContractViolation {
        skill: contract.name().to_string(),
        message: describe_issues(&last_issues),
        attempts: MAX_FACET_ATTEMPTS,
        retries_exhausted: true,
    }
    .into())
}

/// Validate `input` eagerly, then run [`parse_with_facet_retry`].
///
/// Malformed input fails before the producer is ever called.
pub async fn parse_with_facet_retry_checked<T, F, Fut>(
    contract: &SkillContract,
    input: &Value,
    produce: F,
) -> Result<FacetOutcome<T>, ContractError>
where
    T: DeserializeOwned,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Value, CandidateError>>,
{
    contract.validate_input(input)?;
    parse_with_facet_retry(contract, produce).await
}

/// Parse a model reply into JSON, tolerating markdown code fences around it.
pub fn parse_candidate(content: &str) -> Result<Value, CandidateError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body)
        .map_err(|e| CandidateError::Malformed(format!("output is not valid JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Deserialize)]
    struct Summary {
        summary: String,
    }

    fn contract() -> SkillContract {
        SkillContract::new(
            "summary",
            "Summarize",
            json!({"type": "object", "required": ["text"]}),
            json!({
                "type": "object",
                "required": ["summary"],
                "properties": {"summary": {"type": "string", "minLength": 1}}
            }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn succeeds_on_second_attempt_consuming_two_attempts() {
        let contract = contract();
        let calls = AtomicU32::new(0);
        let outcome: FacetOutcome<Summary> = parse_with_facet_retry(&contract, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 1 {
                    Ok(json!({"wrong": true}))
                } else {
                    Ok(json!({"summary": "ok"}))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(outcome.value.summary, "ok");
        assert_eq!(outcome.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn always_invalid_fails_after_exactly_two_attempts() {
        let contract = contract();
        let calls = AtomicU32::new(0);
        let err = parse_with_facet_retry::<Summary, _, _>(&contract, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(json!({"summary": 42, "attempt": attempt})) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match err {
            ContractError::Violation(v) => {
                assert_eq!(v.skill, "summary");
                assert_eq!(v.attempts, 2);
                assert!(v.retries_exhausted);
                assert!(v.message.contains("42"), "last issue missing: {}", v.message);
            }
            other => panic!("expected violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_candidate_counts_as_attempt() {
        let contract = contract();
        let outcome: FacetOutcome<Summary> = parse_with_facet_retry(&contract, |attempt| async move {
            if attempt == 1 {
                parse_candidate("not json")
            } else {
                parse_candidate("```json\n{\"summary\": \"fenced\"}\n```")
            }
        })
        .await
        .unwrap();
        assert_eq!(outcome.value.summary, "fenced");
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn fatal_producer_error_stops_immediately() {
        let contract = contract();
        let calls = AtomicU32::new(0);
        let err = parse_with_facet_retry::<Summary, _, _>(&contract, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CandidateError::Fatal("provider down".to_string())) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ContractError::Producer { .. }));
    }

    #[tokio::test]
    async fn invalid_input_consumes_no_attempt() {
        let contract = contract();
        let calls = AtomicU32::new(0);
        let err = parse_with_facet_retry_checked::<Summary, _, _>(&contract, &json!({}), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(json!({"summary": "never"})) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match err {
            ContractError::InvalidInput { skill, message } => {
                assert_eq!(skill, "summary");
                assert!(message.contains("text"));
            }
            other => panic!("expected invalid input, got {other:?}"),
        }
    }

    #[test]
    fn bad_schema_is_rejected_at_construction() {
        let err = SkillContract::new("bad", "", json!({"type": 12}), json!({})).unwrap_err();
        assert!(matches!(err, ContractError::InvalidSchema { .. }));
    }
}
