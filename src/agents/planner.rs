//! Planner collaborator: turns an objective into a contract-validated plan.

use serde_json::{json, Value};

use super::{AgentContext, AgentError};
use crate::contract::PLAN;
use crate::job::{Job, Plan, PlanDraft};
use crate::trace::{TraceEntry, TraceEventType, TraceStatus};

#[derive(Debug, Clone, Copy, Default)]
pub struct Planner {
    /// Approval policy when the job payload does not set `requireApproval`
    require_approval_default: bool,
}

impl Planner {
    pub fn new(require_approval_default: bool) -> Self {
        Self {
            require_approval_default,
        }
    }

    /// Whether `job` asked for approval, falling back to the default policy.
    pub fn approval_requested(&self, job: &Job) -> bool {
        job.payload
            .get("requireApproval")
            .and_then(Value::as_bool)
            .unwrap_or(self.require_approval_default)
    }

    /// Draft a plan for `job`.
    ///
    /// # Postconditions
    /// - every step is recorded as a `plan_step` trace event, in order
    /// - the approval decision is recorded as a `decision` event
    pub async fn draft(
        &self,
        ctx: &AgentContext,
        job: &Job,
        objective: &str,
    ) -> Result<Plan, AgentError> {
        let task = format!(
            "Plan how to carry out this task before doing any work.\n\nObjective: {}\n\nTask input:\n{}",
            objective, job.payload
        );
        let outcome = ctx
            .generate_structured::<PlanDraft>(PLAN, &json!({ "objective": objective }), &task, "plan")
            .await?;

        let ai_usage = format!(
            "Generated by {} ({}) at temperature 0. Every model output is checked against its skill contract before it is used.",
            ctx.generator.provider(),
            ctx.generator.model()
        );
        let plan = Plan::from_draft(job.id, outcome.value, ai_usage, self.approval_requested(job));

        for step in &plan.steps {
            ctx.recorder.record(
                TraceEntry::new(TraceEventType::PlanStep, step.title.clone())
                    .step(step.id.clone())
                    .did(step.description.clone())
                    .detail(json!({ "risk": step.risk })),
            );
        }

        let why = if plan.requires_approval {
            "Approval requested by the job, the default policy, or a high-risk step"
        } else {
            "No approval requested and no high-risk step"
        };
        ctx.recorder.record(
            TraceEntry::new(
                TraceEventType::Decision,
                if plan.requires_approval {
                    "Plan requires approval"
                } else {
                    "Plan approved automatically"
                },
            )
            .status(TraceStatus::Info)
            .why(why),
        );

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::contract::SkillRegistry;
    use crate::events::EventBus;
    use crate::job::NewJob;
    use crate::llm::ScriptedGenerator;
    use crate::store::InMemoryJobStore;
    use crate::trace::{RecorderLimits, TraceCursor, TraceRecorder};

    fn plan_reply(risk: &str) -> String {
        json!({
            "objective": "Document the API",
            "scope": "docs/",
            "steps": [
                {"id": "read", "title": "Read sources", "description": "Read the code", "risk": "low"},
                {"id": "publish", "title": "Open PR", "description": "Commit docs", "risk": risk}
            ],
            "validationStrategy": "Contract check",
            "rollbackPlan": "Close the PR"
        })
        .to_string()
    }

    fn context(job: &Job, replies: Vec<String>) -> AgentContext {
        let recorder = Arc::new(TraceRecorder::new(
            job.id,
            Arc::new(InMemoryJobStore::new()),
            EventBus::default(),
            RecorderLimits::default(),
            TraceCursor::default(),
        ));
        AgentContext::new(
            Arc::new(ScriptedGenerator::with_replies(replies)),
            recorder,
            Arc::new(SkillRegistry::builtin().unwrap()),
        )
    }

    #[tokio::test]
    async fn high_risk_step_forces_approval() {
        let job = Job::new(NewJob::new("docs", json!({"spec": "x"})));
        let ctx = context(&job, vec![plan_reply("high")]);
        let plan = Planner::new(false).draft(&ctx, &job, "Document").await.unwrap();
        assert!(plan.requires_approval);
        assert_eq!(plan.steps.len(), 2);
        assert!(plan.markdown.contains("Open PR"));
    }

    #[tokio::test]
    async fn payload_flag_overrides_default_policy() {
        let job = Job::new(NewJob::new("docs", json!({"spec": "x", "requireApproval": false})));
        let ctx = context(&job, vec![plan_reply("low")]);
        let plan = Planner::new(true).draft(&ctx, &job, "Document").await.unwrap();
        assert!(!plan.requires_approval);

        let job = Job::new(NewJob::new("docs", json!({"spec": "x"})));
        assert!(Planner::new(true).approval_requested(&job));
    }
}
