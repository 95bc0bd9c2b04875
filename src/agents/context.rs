//! Agent execution context.
//!
//! Bundles the collaborators an agent may use during one job run. All model
//! access goes through the context so every call lands in the AI-call
//! accounting and the trace.

use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::AgentError;
use crate::contract::{
    parse_candidate, parse_with_facet_retry_checked, CandidateError, FacetOutcome, SkillRegistry,
};
use crate::cost::TokenUsage;
use crate::job::JobId;
use crate::llm::{Generation, GenerationRequest, Generator};
use crate::trace::recorder::AiCallInput;
use crate::trace::{TraceEntry, TraceEventType, TraceRecorder, TraceStatus};
use crate::util::truncate_chars;

/// Longest prompt excerpt kept on the `reasoning` trace event.
const ASKED_EXCERPT_CHARS: usize = 240;

#[derive(Clone)]
pub struct AgentContext {
    pub job_id: JobId,
    pub generator: Arc<dyn Generator>,
    pub recorder: Arc<TraceRecorder>,
    pub skills: Arc<SkillRegistry>,
}

impl AgentContext {
    pub fn new(
        generator: Arc<dyn Generator>,
        recorder: Arc<TraceRecorder>,
        skills: Arc<SkillRegistry>,
    ) -> Self {
        Self {
            job_id: recorder.job_id(),
            generator,
            recorder,
            skills,
        }
    }

    /// One model call, recorded as an AI-call row whether it succeeds or not.
    pub async fn generate(&self, request: GenerationRequest) -> Result<Generation, AgentError> {
        let (asked, _) = truncate_chars(&request.task, ASKED_EXCERPT_CHARS);
        self.recorder.record(
            TraceEntry::new(TraceEventType::Reasoning, format!("Asking model: {}", request.purpose))
                .asked(asked)
                .tool(self.generator.provider()),
        );

        let started = Instant::now();
        let result = self.generator.generate(&request).await;
        let (usage, duration, success) = match &result {
            Ok(generation) => (generation.usage, generation.duration, true),
            Err(_) => (TokenUsage::default(), started.elapsed(), false),
        };
        self.recorder.record_ai_call(AiCallInput {
            provider: self.generator.provider().to_string(),
            model: self.generator.model().to_string(),
            purpose: request.purpose.clone(),
            usage,
            duration,
            success,
        });

        result.map_err(|e| {
            self.recorder.error(format!("Generation failed: {}", request.purpose), &e.to_string());
            AgentError::from(e)
        })
    }

    /// Generate output for `skill` and return the first reply that satisfies
    /// its contract. `input` is validated first; a bad input never reaches
    /// the model.
    pub async fn generate_structured<T: DeserializeOwned>(
        &self,
        skill: &str,
        input: &Value,
        task: &str,
        purpose: &str,
    ) -> Result<FacetOutcome<T>, AgentError> {
        let contract = self.skills.require(skill)?;
        let context = format!("{}\n\nInput:\n{}", contract.output_instructions(), input);

        let outcome = parse_with_facet_retry_checked(&contract, input, |attempt| {
            let task = if attempt > 1 {
                format!(
                    "{}\n\nYour previous reply did not match the required schema. Reply with only the JSON object.",
                    task
                )
            } else {
                task.to_string()
            };
            let request = GenerationRequest::new(purpose, task, context.clone());
            async move {
                let generation = self
                    .generate(request)
                    .await
                    .map_err(|e| CandidateError::Fatal(e.to_string()))?;
                parse_candidate(&generation.content).map_err(|e| {
                    if let CandidateError::Malformed(message) = &e {
                        self.recorder.record(
                            TraceEntry::new(TraceEventType::AiParseError, format!("Unparseable {} reply", skill))
                                .status(TraceStatus::Warning)
                                .output(message.clone())
                                .detail(json!({ "attempt": attempt })),
                        );
                    }
                    e
                })
            }
        })
        .await?;

        self.recorder.record(
            TraceEntry::new(TraceEventType::Decision, format!("Accepted {} output", skill))
                .status(TraceStatus::Success)
                .why(format!(
                    "Matched the '{}' contract on attempt {}",
                    skill, outcome.attempts
                )),
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{ContractError, DOC_BUNDLE};
    use crate::events::EventBus;
    use crate::llm::ScriptedGenerator;
    use crate::store::InMemoryJobStore;
    use crate::trace::{RecorderLimits, TraceCursor};

    #[derive(Debug, serde::Deserialize)]
    struct Bundle {
        summary: String,
    }

    fn context(generator: Arc<ScriptedGenerator>) -> AgentContext {
        let recorder = Arc::new(TraceRecorder::new(
            JobId::new(),
            Arc::new(InMemoryJobStore::new()),
            EventBus::default(),
            RecorderLimits::default(),
            TraceCursor::default(),
        ));
        AgentContext::new(generator, recorder, Arc::new(SkillRegistry::builtin().unwrap()))
    }

    const VALID: &str = r#"{"summary":"Docs","files":[{"path":"a.md","content":"x"}],"coveredTargets":[]}"#;

    #[tokio::test]
    async fn retry_after_unparseable_reply_records_both_calls() {
        let generator = Arc::new(ScriptedGenerator::with_replies(["not json", VALID]));
        let ctx = context(generator.clone());

        let outcome: FacetOutcome<Bundle> = ctx
            .generate_structured(DOC_BUNDLE, &json!({"spec": "Document it"}), "Write docs", "execute")
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.value.summary, "Docs");
        assert_eq!(generator.requests().len(), 2);
        assert!(generator.requests()[1].task.contains("did not match"));
    }

    #[tokio::test]
    async fn invalid_input_never_calls_the_model() {
        let generator = Arc::new(ScriptedGenerator::with_replies([VALID]));
        let ctx = context(generator.clone());

        let err = ctx
            .generate_structured::<Bundle>(DOC_BUNDLE, &json!({"targets": []}), "Write docs", "execute")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Contract(ContractError::InvalidInput { .. })));
        assert!(generator.requests().is_empty());
    }

    #[tokio::test]
    async fn generation_failure_aborts_without_second_attempt() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push_error(crate::llm::GenerationError::not_configured("no key".to_string()));
        let ctx = context(generator.clone());

        let err = ctx
            .generate_structured::<Bundle>(DOC_BUNDLE, &json!({"spec": "x"}), "Write docs", "execute")
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::job::ErrorCode::GenerationFailed);
        assert_eq!(generator.requests().len(), 1);
    }
}
