//! Test-planning agent.
//!
//! Runs as a three-step playbook: validate the request, generate cases
//! against the `test_plan` contract, render them as a markdown file.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Agent, AgentContext, AgentDescriptor, AgentError, AgentOutput, ContractCheck};
use crate::contract::TEST_PLAN;
use crate::job::Job;
use crate::playbook::{Playbook, PlaybookPhases, PlaybookStep, StepResult};
use crate::quality::AnalysisDepth;
use crate::trace::recorder::ArtifactInput;
use crate::trace::ArtifactType;
use crate::util::dedup_trimmed;

pub const KIND: &str = "test_plan";

const DEFAULT_OUTPUT_PATH: &str = "TEST_PLAN.md";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub steps: Vec<String>,
    pub expected: String,
    pub priority: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPlanDoc {
    pub summary: String,
    pub cases: Vec<TestCase>,
}

impl TestPlanDoc {
    pub fn render_markdown(&self) -> String {
        let mut out = format!("# Test Plan\n\n{}\n", self.summary);
        for case in &self.cases {
            out.push_str(&format!(
                "\n## {} {} ({})\n\n",
                case.id, case.title, case.priority
            ));
            for (i, step) in case.steps.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", i + 1, step));
            }
            out.push_str(&format!("\n**Expected:** {}\n", case.expected));
        }
        out
    }

    /// Targets mentioned (case-insensitively) in some case title or step.
    fn covered(&self, targets: &[String]) -> u32 {
        let haystack: Vec<String> = self
            .cases
            .iter()
            .flat_map(|c| std::iter::once(&c.title).chain(c.steps.iter()))
            .map(|s| s.to_lowercase())
            .collect();
        targets
            .iter()
            .filter(|t| {
                let needle = t.to_lowercase();
                haystack.iter().any(|h| h.contains(&needle))
            })
            .count() as u32
    }
}

pub struct TestPlanAgent;

impl TestPlanAgent {
    const PHASES: PlaybookPhases = PlaybookPhases::EXECUTE_ONLY;

    fn playbook(ctx: &AgentContext, job: &Job) -> Playbook {
        let payload = job.payload.clone();
        let validate_ctx = ctx.clone();
        let generate_ctx = ctx.clone();
        let render_ctx = ctx.clone();

        Playbook::new()
            .with_phases(Self::PHASES)
            .step(PlaybookStep::new("validate_input", move |_| {
                let ctx = validate_ctx.clone();
                let payload = payload.clone();
                async move {
                    ctx.skills.require(TEST_PLAN)?.validate_input(&payload)?;
                    Ok::<Value, AgentError>(payload)
                }
            }))
            .step(
                PlaybookStep::new("generate_cases", move |prior: Vec<Value>| {
                    let ctx = generate_ctx.clone();
                    async move {
                        let payload = prior.into_iter().next().unwrap_or_default();
                        let spec = payload.get("spec").and_then(Value::as_str).unwrap_or_default();
                        let task = format!(
                            "Write a prioritized test plan for this feature. Each case needs concrete steps and an observable expectation.\n\n{}",
                            spec
                        );
                        let outcome = ctx
                            .generate_structured::<TestPlanDoc>(
                                TEST_PLAN,
                                &json!({ "spec": spec }),
                                &task,
                                "execute",
                            )
                            .await?;
                        Ok::<Value, AgentError>(json!({ "plan": outcome.raw, "attempts": outcome.attempts }))
                    }
                })
                .retryable(true),
            )
            .step(PlaybookStep::new("render", move |prior: Vec<Value>| {
                let ctx = render_ctx.clone();
                async move {
                    let payload = prior.first().cloned().unwrap_or_default();
                    let generated = prior.get(1).cloned().unwrap_or_default();
                    let doc: TestPlanDoc = serde_json::from_value(generated["plan"].clone())
                        .map_err(|e| AgentError::InvalidInput(format!("test plan: {}", e)))?;
                    let path = payload
                        .get("outputPath")
                        .and_then(Value::as_str)
                        .unwrap_or(DEFAULT_OUTPUT_PATH)
                        .to_string();
                    let markdown = doc.render_markdown();
                    ctx.recorder.record_artifact(ArtifactInput {
                        artifact_type: ArtifactType::FileCreated,
                        path: &path,
                        content: &markdown,
                        previous: None,
                    });
                    Ok::<Value, AgentError>(json!({ "path": path }))
                }
            }))
    }

    fn output(job: &Job, results: &[StepResult]) -> Result<AgentOutput, AgentError> {
        let generated = results
            .iter()
            .find(|r| r.name == "generate_cases")
            .map(|r| r.output.clone())
            .ok_or_else(|| AgentError::InvalidInput("test plan was not generated".to_string()))?;
        let path = results
            .iter()
            .find(|r| r.name == "render")
            .and_then(|r| r.output.get("path").cloned())
            .unwrap_or(Value::Null);

        let raw = generated["plan"].clone();
        let doc: TestPlanDoc = serde_json::from_value(raw.clone())
            .map_err(|e| AgentError::InvalidInput(format!("test plan: {}", e)))?;
        let targets = dedup_trimmed(
            job.payload
                .get("targets")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|t| t.as_str().map(str::to_string)),
        );
        let depth = job
            .payload
            .get("depth")
            .and_then(Value::as_str)
            .and_then(AnalysisDepth::parse)
            .unwrap_or_default();

        Ok(AgentOutput {
            result: json!({
                "summary": doc.summary,
                "caseCount": doc.cases.len(),
                "path": path,
            }),
            contract: Some(ContractCheck {
                skill: TEST_PLAN.to_string(),
                attempts: generated["attempts"].as_u64().unwrap_or(1) as u32,
                output: raw,
            }),
            targets_configured: targets.len() as u32,
            targets_covered: doc.covered(&targets),
            depth,
            multi_pass: false,
            published: None,
        })
    }
}

#[async_trait]
impl Agent for TestPlanAgent {
    fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor {
            kind: KIND,
            description: "Turns a feature description into a prioritized test plan",
            skill: Some(TEST_PLAN),
            requires_planning: Self::PHASES.requires_planning,
            requires_reflection: Self::PHASES.requires_reflection,
            uses_tools: false,
        }
    }

    async fn execute(&self, ctx: &AgentContext, job: &Job) -> Result<AgentOutput, AgentError> {
        let results = Self::playbook(ctx, job).execute(&ctx.recorder).await?;
        Self::output(job, &results)
    }
}
