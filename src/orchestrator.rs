//! Agent orchestrator - owns one job's lifecycle from start to a terminal state.
//!
//! A run moves through planning, executing, validating, reflecting and
//! scoring. Each phase is announced as a [`Stage`] event. A failure in any
//! phase fails the job with a stable [`ErrorCode`] and a fatal error event.
//!
//! State changes are compare-and-set at the store. A run that loses a race
//! (for example against the stale-job watchdog) keeps the state the winner
//! wrote and drops its own outcome.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agents::{Agent, AgentContext, AgentDescriptor, AgentError, AgentOutput, AgentRegistry, Planner};
use crate::config::Config;
use crate::contract::{describe_issues, SkillRegistry};
use crate::events::{EventBus, LiveEvent, Stage};
use crate::job::plan::{EVIDENCE_ARTIFACTS, EVIDENCE_CONTRACT, EVIDENCE_PUBLISHED, EVIDENCE_QUALITY};
use crate::job::{
    ErrorCode, ErrorScope, EvidenceStatus, InvalidTransition, Job, JobFailure, JobId, JobState,
    JobUpdate, NewJob, Plan, Transition,
};
use crate::llm::{generator_from_config, Generator};
use crate::quality::{self, QualityMetrics};
use crate::store::{JobStore, StoreError};
use crate::tools::{PublishOutcome, ToolRegistry, ToolSession};
use crate::trace::recorder::ArtifactInput;
use crate::trace::{ArtifactType, RecorderLimits, TraceEntry, TraceEventType, TraceRecorder, TraceStatus};

/// Path under which the rendered plan is recorded as a preview artifact.
const PLAN_ARTIFACT_PATH: &str = "PLAN.md";

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Unknown agent type '{0}'")]
    UnknownAgent(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job {id} is '{state}'; only finished jobs can be revised")]
    RevisionNotAllowed { id: JobId, state: JobState },

    #[error("Orchestrator setup failed: {0}")]
    Setup(String),
}

impl OrchestratorError {
    /// Machine-readable code for API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::NotFound(_) | OrchestratorError::Store(StoreError::NotFound(_)) => {
                "NOT_FOUND"
            }
            OrchestratorError::UnknownAgent(_) => ErrorCode::UnknownAgent.as_str(),
            OrchestratorError::InvalidTransition(_)
            | OrchestratorError::RevisionNotAllowed { .. } => ErrorCode::InvalidTransition.as_str(),
            OrchestratorError::Store(StoreError::Conflict { .. }) => ErrorCode::StateConflict.as_str(),
            OrchestratorError::InvalidInput(_) => ErrorCode::InvalidInput.as_str(),
            OrchestratorError::Store(_) | OrchestratorError::Setup(_) => ErrorCode::Internal.as_str(),
        }
    }
}

/// Why a run failed, as persisted on the job and announced live.
#[derive(Debug, Clone)]
struct RunFailure {
    code: ErrorCode,
    scope: ErrorScope,
    message: String,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Planning,
    Executing,
    Reflecting,
}

impl RunFailure {
    fn new(code: ErrorCode, scope: ErrorScope, message: impl Into<String>) -> Self {
        Self {
            code,
            scope,
            message: message.into(),
        }
    }

    fn internal(error: StoreError) -> Self {
        Self::new(ErrorCode::Internal, ErrorScope::Unknown, error.to_string())
    }

    /// Generation failures keep `GENERATION_FAILED` in every phase; a plan or
    /// critique that never met its contract is reported as a failure of
    /// that phase.
    fn from_agent(error: &AgentError, phase: Phase) -> Self {
        let code = error.code();
        let (code, scope) = match phase {
            Phase::Planning => (
                if code == ErrorCode::ContractViolation {
                    ErrorCode::PlanningFailed
                } else {
                    code
                },
                ErrorScope::Planning,
            ),
            Phase::Reflecting => (
                if code == ErrorCode::ContractViolation {
                    ErrorCode::ReflectionFailed
                } else {
                    code
                },
                ErrorScope::Reflection,
            ),
            Phase::Executing => (
                code,
                match error.scope() {
                    ErrorScope::Unknown => ErrorScope::Execution,
                    scope => scope,
                },
            ),
        };
        Self::new(code, scope, error.to_string())
    }
}

fn failed_update(failure: RunFailure) -> JobUpdate {
    let report = quality::score(&QualityMetrics {
        failed: true,
        error_code: Some(failure.code),
        ..Default::default()
    });
    JobUpdate {
        result: Some(json!({ "quality": report })),
        failure: Some(JobFailure::new(failure.code, failure.message)),
    }
}

/// Where a run enters the phase sequence.
enum Entry {
    Fresh,
    /// Continuing after approval, with the stored plan
    Approved(Option<Plan>),
}

enum RunOutcome {
    AwaitingApproval,
    Finished(Value),
}

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    bus: EventBus,
    agents: Arc<AgentRegistry>,
    skills: Arc<SkillRegistry>,
    generator: Arc<dyn Generator>,
    tools: Arc<ToolRegistry>,
    limits: RecorderLimits,
    flush_interval: Duration,
    planner: Planner,
}

impl Orchestrator {
    /// Orchestrator with the built-in agents and no repository tools.
    pub fn new(
        store: Arc<dyn JobStore>,
        bus: EventBus,
        generator: Arc<dyn Generator>,
        skills: Arc<SkillRegistry>,
    ) -> Self {
        Self {
            store,
            bus,
            agents: Arc::new(AgentRegistry::builtin()),
            skills,
            generator,
            tools: Arc::new(ToolRegistry::empty()),
            limits: RecorderLimits::default(),
            flush_interval: Duration::from_secs(2),
            planner: Planner::default(),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn JobStore>,
        bus: EventBus,
    ) -> Result<Self, OrchestratorError> {
        let generator =
            generator_from_config(config).map_err(|e| OrchestratorError::Setup(e.to_string()))?;
        let skills = SkillRegistry::builtin().map_err(|e| OrchestratorError::Setup(e.to_string()))?;
        Ok(Self::new(store, bus, generator, Arc::new(skills))
            .with_limits(RecorderLimits::from_config(config))
            .with_flush_interval(config.flush_interval())
            .with_planner(Planner::new(config.require_plan_approval)))
    }

    pub fn with_agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = Arc::new(agents);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn with_limits(mut self, limits: RecorderLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_planner(mut self, planner: Planner) -> Self {
        self.planner = planner;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub async fn get_job(&self, id: JobId) -> Result<Job, OrchestratorError> {
        self.store
            .get_job(id)
            .await?
            .ok_or(OrchestratorError::NotFound(id))
    }

    /// Validate and persist a new pending job. Nothing runs yet.
    ///
    /// # Errors
    /// - `UnknownAgent` if no agent handles `new_job.job_type`
    /// - `InvalidInput` if the payload fails the agent's skill input schema
    pub async fn submit(&self, new_job: NewJob) -> Result<Job, OrchestratorError> {
        let agent = self
            .agents
            .get(&new_job.job_type)
            .ok_or_else(|| OrchestratorError::UnknownAgent(new_job.job_type.clone()))?;
        if !new_job.payload.is_object() {
            return Err(OrchestratorError::InvalidInput(
                "payload must be a JSON object".to_string(),
            ));
        }
        if let Some(skill) = agent.descriptor().skill {
            let contract = self
                .skills
                .require(skill)
                .map_err(|e| OrchestratorError::Setup(e.to_string()))?;
            contract
                .validate_input(&new_job.payload)
                .map_err(|e| OrchestratorError::InvalidInput(e.to_string()))?;
        }

        let job = self.store.create_job(Job::new(new_job)).await?;
        tracing::info!(job_id = %job.id, job_type = %job.job_type, dry_run = job.dry_run, "Job submitted");
        Ok(job)
    }

    /// Submit a child revision of a finished job.
    pub async fn submit_revision(
        &self,
        parent_id: JobId,
        note: &str,
    ) -> Result<Job, OrchestratorError> {
        let parent = self.get_job(parent_id).await?;
        if !parent.state.is_terminal() {
            return Err(OrchestratorError::RevisionNotAllowed {
                id: parent_id,
                state: parent.state,
            });
        }
        let note = note.trim();
        if note.is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "revision note must not be empty".to_string(),
            ));
        }

        let mut payload = parent.payload.clone();
        if let Some(fields) = payload.as_object_mut() {
            fields.insert("revisionNote".to_string(), Value::String(note.to_string()));
        }
        let job = self
            .submit(NewJob {
                job_type: parent.job_type.clone(),
                payload,
                dry_run: parent.dry_run,
                parent_id: Some(parent_id),
                revision_note: Some(note.to_string()),
            })
            .await?;
        tracing::info!(job_id = %job.id, parent_id = %parent_id, "Revision submitted");
        Ok(job)
    }

    /// Run `id` in the background.
    pub fn spawn_run(&self, id: JobId) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run(id).await {
                tracing::error!(job_id = %id, "Job run aborted: {}", e);
            }
        })
    }

    /// Continue an approved job in the background.
    pub fn spawn_continue(&self, job: Job) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let id = job.id;
            if let Err(e) = orchestrator.continue_run(job).await {
                tracing::error!(job_id = %id, "Job continuation aborted: {}", e);
            }
        })
    }

    /// Start a pending job and drive it until it completes, fails, or stops
    /// for approval.
    ///
    /// Failures inside the run are recorded on the job and returned as
    /// `Ok(job)`; `Err` means the run never started or the store failed.
    ///
    /// # Errors
    /// - `InvalidTransition` if the job is not pending (double start)
    /// - `Store(Conflict)` if another caller started it concurrently
    pub async fn run(&self, id: JobId) -> Result<Job, OrchestratorError> {
        let job = self.get_job(id).await?;
        let transition = job.machine().start()?;
        let job = self.apply(id, transition, JobUpdate::default()).await?;
        self.stage(&job, Stage::Started);
        self.drive(job, Entry::Fresh).await
    }

    /// The approval signal: move an awaiting job back to running.
    pub async fn resume(&self, id: JobId) -> Result<Job, OrchestratorError> {
        let job = self.get_job(id).await?;
        let transition = job.machine().resume()?;
        self.apply(id, transition, JobUpdate::default()).await
    }

    /// Re-enter execution for a job resumed after approval.
    pub async fn continue_run(&self, job: Job) -> Result<Job, OrchestratorError> {
        if job.state != JobState::Running {
            return Err(StoreError::Conflict {
                job_id: job.id,
                expected: JobState::Running,
                actual: job.state,
            }
            .into());
        }
        let plan = self.store.get_plan(job.id).await?;
        self.drive(job, Entry::Approved(plan)).await
    }

    /// Resume and continue in one call.
    pub async fn approve(&self, id: JobId) -> Result<Job, OrchestratorError> {
        let job = self.resume(id).await?;
        self.continue_run(job).await
    }

    async fn drive(&self, job: Job, entry: Entry) -> Result<Job, OrchestratorError> {
        let recorder = match TraceRecorder::resume(job.id, self.store.clone(), self.bus.clone(), self.limits).await {
            Ok(recorder) => Arc::new(recorder),
            Err(e) => return self.fail_untraced(&job, &e).await,
        };
        let cancel = CancellationToken::new();
        let flusher = recorder.spawn_periodic_flush(self.flush_interval, cancel.clone());

        let outcome = match self.agents.get(&job.job_type) {
            Some(agent) => {
                let ctx = AgentContext::new(self.generator.clone(), recorder.clone(), self.skills.clone());
                self.phases(&job, agent.as_ref(), &ctx, entry).await
            }
            None => Err(RunFailure::new(
                ErrorCode::UnknownAgent,
                ErrorScope::Unknown,
                format!("No agent registered for type '{}'", job.job_type),
            )),
        };

        if let Err(failure) = &outcome {
            recorder.report_error(
                failure.scope,
                Some(failure.code),
                format!("Job failed: {}", failure.code),
                &failure.message,
                true,
            );
        }

        cancel.cancel();
        if let Err(e) = flusher.await {
            tracing::error!(job_id = %job.id, "Trace flusher task failed: {}", e);
        }
        // Retries anything the flusher's last pass re-queued.
        let report = recorder.flush().await;
        if !report.is_ok() {
            tracing::error!(job_id = %job.id, stages = ?report.failed_stages, "Trace not fully persisted");
            self.bus.publish(LiveEvent::Log {
                job_id: job.id,
                level: "error".to_string(),
                message: format!("Trace persistence incomplete: {:?}", report.failed_stages),
            });
        }

        match outcome {
            Ok(RunOutcome::AwaitingApproval) => {
                self.finish(&job, job.machine().await_approval(), JobUpdate::default(), Stage::AwaitingApproval)
                    .await
            }
            Ok(RunOutcome::Finished(result)) => {
                self.finish(&job, job.machine().complete(), JobUpdate::with_result(result), Stage::Completed)
                    .await
            }
            Err(failure) => self.finish(&job, job.machine().fail(), failed_update(failure), Stage::Failed).await,
        }
    }

    /// Fail a job whose trace could not be opened. Nothing reaches the trace,
    /// so the error goes to the log and the live feed only.
    async fn fail_untraced(&self, job: &Job, error: &StoreError) -> Result<Job, OrchestratorError> {
        tracing::error!(job_id = %job.id, "Could not open the job trace: {}", error);
        let failure = RunFailure::new(
            ErrorCode::Internal,
            ErrorScope::Unknown,
            format!("Could not open the job trace: {}", error),
        );
        self.bus.publish(LiveEvent::Error {
            job_id: job.id,
            scope: failure.scope,
            code: Some(failure.code),
            message: failure.message.clone(),
            fatal: true,
        });
        self.finish(job, job.machine().fail(), failed_update(failure), Stage::Failed).await
    }

    async fn phases(
        &self,
        job: &Job,
        agent: &dyn Agent,
        ctx: &AgentContext,
        entry: Entry,
    ) -> Result<RunOutcome, RunFailure> {
        let descriptor = agent.descriptor();
        let recorder = &ctx.recorder;

        let mut plan = match entry {
            Entry::Approved(plan) => {
                recorder.record(
                    TraceEntry::new(TraceEventType::Decision, "Plan approved")
                        .status(TraceStatus::Success)
                        .why("Approval signal received"),
                );
                plan
            }
            Entry::Fresh if descriptor.requires_planning => {
                self.stage(job, Stage::Planning);
                let plan = agent
                    .plan(ctx, job, &self.planner)
                    .await
                    .map_err(|e| RunFailure::from_agent(&e, Phase::Planning))?;
                if let Some(plan) = &plan {
                    self.store.save_plan(plan).await.map_err(RunFailure::internal)?;
                    recorder.record_artifact(ArtifactInput {
                        artifact_type: ArtifactType::FilePreview,
                        path: PLAN_ARTIFACT_PATH,
                        content: &plan.markdown,
                        previous: None,
                    });
                    self.bus.publish(LiveEvent::Plan {
                        job_id: job.id,
                        markdown: plan.markdown.clone(),
                        requires_approval: plan.requires_approval,
                    });
                }
                match plan {
                    Some(plan) if plan.requires_approval => return Ok(RunOutcome::AwaitingApproval),
                    plan => plan,
                }
            }
            Entry::Fresh => None,
        };

        self.stage(job, Stage::Executing);
        let output = if descriptor.uses_tools {
            let session = self.tool_session(job, recorder);
            agent.execute_with_tools(ctx, job, session, plan.as_ref()).await
        } else {
            agent.execute(ctx, job).await
        }
        .map_err(|e| RunFailure::from_agent(&e, Phase::Executing))?;

        self.stage(job, Stage::Validating);
        self.validate(&descriptor, &output, recorder)?;

        let reflection = if descriptor.requires_reflection {
            self.stage(job, Stage::Reflecting);
            agent
                .reflect(ctx, job, &output)
                .await
                .map_err(|e| RunFailure::from_agent(&e, Phase::Reflecting))?
        } else {
            None
        };

        self.stage(job, Stage::Scoring);
        let (files_read, files_produced) = recorder.file_counts();
        let metrics = QualityMetrics {
            failed: false,
            error_code: None,
            targets_configured: output.targets_configured,
            targets_covered: output.targets_covered,
            files_read,
            files_produced,
            depth: output.depth,
            multi_pass: output.multi_pass,
        };
        let report = quality::score(&metrics);
        recorder.record(
            TraceEntry::new(TraceEventType::Info, format!("Quality score {}/100", report.score))
                .status(TraceStatus::Success)
                .detail(json!({ "suggestions": report.suggestions })),
        );

        if let Some(plan) = plan.as_mut() {
            self.record_evidence(recorder, plan, &output, files_produced).await;
        }

        Ok(RunOutcome::Finished(json!({
            "output": output.result,
            "quality": report,
            "metrics": metrics,
            "published": output.published,
            "reflection": reflection,
            "contract": output
                .contract
                .as_ref()
                .map(|c| json!({ "skill": c.skill, "attempts": c.attempts })),
        })))
    }

    /// Re-check the agent's contract output before it is trusted.
    fn validate(
        &self,
        descriptor: &AgentDescriptor,
        output: &AgentOutput,
        recorder: &TraceRecorder,
    ) -> Result<(), RunFailure> {
        let Some(check) = &output.contract else {
            return match descriptor.skill {
                Some(skill) => Err(RunFailure::new(
                    ErrorCode::ContractViolation,
                    ErrorScope::Validation,
                    format!("Agent declares skill '{}' but returned no contract output", skill),
                )),
                None => Ok(()),
            };
        };

        let contract = self
            .skills
            .require(&check.skill)
            .map_err(|e| RunFailure::new(ErrorCode::Internal, ErrorScope::Validation, e.to_string()))?;
        let issues = contract.check_output(&check.output);
        if !issues.is_empty() {
            return Err(RunFailure::new(
                ErrorCode::ContractViolation,
                ErrorScope::Validation,
                format!(
                    "Skill '{}' output violates its contract after {} attempt(s): {}",
                    check.skill,
                    check.attempts,
                    describe_issues(&issues)
                ),
            ));
        }

        recorder.record(
            TraceEntry::new(
                TraceEventType::Decision,
                format!("Output matches '{}' contract", check.skill),
            )
            .status(TraceStatus::Success)
            .detail(json!({ "attempts": check.attempts })),
        );
        Ok(())
    }

    /// Mark the plan's evidence checklist and persist it. Failing to persist
    /// is logged; it never fails the job.
    async fn record_evidence(
        &self,
        recorder: &TraceRecorder,
        plan: &mut Plan,
        output: &AgentOutput,
        files_produced: u32,
    ) {
        let published = match &output.published {
            Some(outcome) if outcome.committed => EvidenceStatus::Passed,
            Some(PublishOutcome { error: Some(_), .. }) => EvidenceStatus::Failed,
            _ => EvidenceStatus::Skipped,
        };
        let contract = if output.contract.is_some() {
            EvidenceStatus::Passed
        } else {
            EvidenceStatus::Skipped
        };
        let artifacts = if files_produced > 0 {
            EvidenceStatus::Passed
        } else {
            EvidenceStatus::Failed
        };

        for (name, status) in [
            (EVIDENCE_CONTRACT, contract),
            (EVIDENCE_ARTIFACTS, artifacts),
            (EVIDENCE_QUALITY, EvidenceStatus::Passed),
            (EVIDENCE_PUBLISHED, published),
        ] {
            plan.set_evidence(name, status);
        }

        if let Err(e) = self
            .store
            .update_evidence(plan.job_id, &plan.evidence, &plan.markdown)
            .await
        {
            tracing::warn!(job_id = %plan.job_id, "Failed to persist plan evidence: {}", e);
            recorder.report_error(
                ErrorScope::Execution,
                None,
                "Plan evidence not saved",
                &e.to_string(),
                false,
            );
        }
    }

    fn tool_session(&self, job: &Job, recorder: &Arc<TraceRecorder>) -> Option<ToolSession> {
        let requested = job
            .payload
            .get("repo")
            .and_then(|repo| repo.get("tool"))
            .and_then(Value::as_str);
        let tool = self.tools.resolve(requested);
        if tool.is_none() {
            if let Some(name) = requested {
                recorder.record(
                    TraceEntry::new(TraceEventType::Info, format!("Tool '{}' is not registered", name))
                        .status(TraceStatus::Warning),
                );
            }
        }
        tool.map(|tool| ToolSession::new(tool, recorder.clone()))
    }

    async fn finish(
        &self,
        job: &Job,
        transition: Result<Transition, InvalidTransition>,
        update: JobUpdate,
        stage: Stage,
    ) -> Result<Job, OrchestratorError> {
        match self.apply(job.id, transition?, update).await {
            Ok(updated) => {
                self.stage(&updated, stage);
                Ok(updated)
            }
            Err(OrchestratorError::Store(StoreError::Conflict { actual, .. })) => {
                tracing::warn!(job_id = %job.id, %actual, "Job changed state during the run; outcome dropped");
                self.get_job(job.id).await
            }
            Err(e) => Err(e),
        }
    }

    async fn apply(
        &self,
        id: JobId,
        transition: Transition,
        update: JobUpdate,
    ) -> Result<Job, OrchestratorError> {
        let job = self.store.transition(id, transition, update).await?;
        tracing::info!(job_id = %id, from = %transition.from, to = %transition.to, "Job state changed");
        Ok(job)
    }

    fn stage(&self, job: &Job, stage: Stage) {
        tracing::debug!(job_id = %job.id, ?stage, "Stage");
        self.bus.publish(LiveEvent::Stage {
            job_id: job.id,
            stage,
            state: job.state,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::agents::{docs::DocBundle, ContractCheck};
    use crate::contract::{DOC_BUNDLE, TEST_PLAN};
    use crate::llm::{DisabledGenerator, ScriptedGenerator};
    use crate::quality::AnalysisDepth;
    use crate::store::InMemoryJobStore;
    use crate::tools::{FakeOp, FakeRepo, ToolErrorKind};

    /// Reads five sources and writes every file of a generated bundle.
    struct FixtureAgent;

    #[async_trait]
    impl Agent for FixtureAgent {
        fn descriptor(&self) -> AgentDescriptor {
            AgentDescriptor {
                kind: "fixture",
                description: "Deterministic fixture",
                skill: Some(DOC_BUNDLE),
                requires_planning: false,
                requires_reflection: false,
                uses_tools: false,
            }
        }

        async fn execute(&self, ctx: &AgentContext, job: &Job) -> Result<AgentOutput, AgentError> {
            for i in 0..5 {
                ctx.recorder.record_artifact(ArtifactInput {
                    artifact_type: ArtifactType::DocRead,
                    path: &format!("src/module{}.rs", i),
                    content: "pub fn handler() {}",
                    previous: None,
                });
            }
            let outcome = ctx
                .generate_structured::<DocBundle>(DOC_BUNDLE, &job.payload, "Write docs", "execute")
                .await?;
            for file in &outcome.value.files {
                ctx.recorder.record_artifact(ArtifactInput {
                    artifact_type: ArtifactType::FileCreated,
                    path: &file.path,
                    content: &file.content,
                    previous: None,
                });
            }
            Ok(AgentOutput {
                result: json!({ "summary": outcome.value.summary }),
                contract: Some(ContractCheck {
                    skill: DOC_BUNDLE.to_string(),
                    attempts: outcome.attempts,
                    output: outcome.raw,
                }),
                targets_configured: 1,
                targets_covered: 1,
                depth: AnalysisDepth::Deep,
                multi_pass: true,
                published: None,
            })
        }
    }

    /// Returns output claiming a contract it does not meet.
    struct UncheckedAgent;

    #[async_trait]
    impl Agent for UncheckedAgent {
        fn descriptor(&self) -> AgentDescriptor {
            AgentDescriptor {
                kind: "unchecked",
                description: "Skips contract parsing",
                skill: Some(TEST_PLAN),
                requires_planning: false,
                requires_reflection: false,
                uses_tools: false,
            }
        }

        async fn execute(&self, _ctx: &AgentContext, _job: &Job) -> Result<AgentOutput, AgentError> {
            Ok(AgentOutput {
                contract: Some(ContractCheck {
                    skill: TEST_PLAN.to_string(),
                    attempts: 1,
                    output: json!({ "summary": "no cases" }),
                }),
                ..Default::default()
            })
        }
    }

    fn orchestrator(generator: Arc<dyn Generator>) -> Orchestrator {
        let mut agents = AgentRegistry::builtin();
        agents.register(Arc::new(FixtureAgent));
        agents.register(Arc::new(UncheckedAgent));
        Orchestrator::new(
            Arc::new(InMemoryJobStore::new()),
            EventBus::default(),
            generator,
            Arc::new(SkillRegistry::builtin().unwrap()),
        )
        .with_agents(agents)
        .with_flush_interval(Duration::from_millis(20))
    }

    fn with_repo(orchestrator: Orchestrator, repo: Arc<FakeRepo>) -> Orchestrator {
        let mut tools = ToolRegistry::empty();
        tools.register(repo);
        orchestrator.with_tools(tools)
    }

    fn bundle_reply(files: usize) -> String {
        let files: Vec<Value> = (0..files)
            .map(|i| json!({ "path": format!("docs/page{}.md", i), "content": format!("# Page {}", i) }))
            .collect();
        json!({ "summary": "API docs", "files": files, "coveredTargets": ["Invoices"] }).to_string()
    }

    fn plan_reply(risk: &str) -> String {
        json!({
            "objective": "Document the billing API",
            "scope": "docs/",
            "steps": [
                {"id": "read", "title": "Read sources", "description": "Read the handlers", "risk": "low"},
                {"id": "publish", "title": "Open PR", "description": "Commit the docs", "risk": risk}
            ],
            "validationStrategy": "Contract check",
            "rollbackPlan": "Close the PR"
        })
        .to_string()
    }

    fn reflection_reply() -> String {
        json!({ "critique": "Covers the main flows", "issues": [], "confidence": 0.8 }).to_string()
    }

    fn docs_payload(require_approval: bool) -> Value {
        json!({
            "spec": "Document the billing API",
            "targets": ["Invoices"],
            "requireApproval": require_approval,
        })
    }

    #[tokio::test]
    async fn end_to_end_run_scores_recorded_activity() {
        let generator = Arc::new(ScriptedGenerator::with_replies([bundle_reply(3)]));
        let orch = orchestrator(generator);
        let job = orch
            .submit(NewJob::new("fixture", json!({ "spec": "Document the API" })))
            .await
            .unwrap();
        let mut events = orch.bus().subscribe_job(job.id);

        let done = orch.run(job.id).await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        let result = done.result.unwrap();
        assert_eq!(result["quality"]["score"], 85);
        assert_eq!(result["metrics"]["filesRead"], 5);
        assert_eq!(result["metrics"]["filesProduced"], 3);
        assert_eq!(result["contract"]["attempts"], 1);

        let mut stages = Vec::new();
        while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(50), events.recv()).await {
            if let LiveEvent::Stage { stage, .. } = event {
                stages.push(stage);
            }
        }
        assert_eq!(
            stages,
            vec![
                Stage::Started,
                Stage::Executing,
                Stage::Validating,
                Stage::Scoring,
                Stage::Completed
            ]
        );

        let trace = orch.store().get_trace_events(job.id).await.unwrap();
        assert!(trace.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert_eq!(orch.store().get_artifacts(job.id).await.unwrap().len(), 8);
        assert_eq!(orch.store().get_ai_calls(job.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn high_risk_plan_waits_for_approval_then_publishes() {
        let generator = Arc::new(ScriptedGenerator::with_replies([
            plan_reply("high"),
            bundle_reply(1),
            reflection_reply(),
        ]));
        let repo = Arc::new(FakeRepo::named("github"));
        let orch = with_repo(orchestrator(generator.clone()), repo.clone());
        let job = orch.submit(NewJob::new("docs", docs_payload(false))).await.unwrap();

        let paused = orch.run(job.id).await.unwrap();
        assert_eq!(paused.state, JobState::AwaitingApproval);
        let plan = orch.store().get_plan(job.id).await.unwrap().unwrap();
        assert!(plan.requires_approval);
        assert!(repo.calls().is_empty());

        let done = orch.approve(job.id).await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        let result = done.result.unwrap();
        assert_eq!(result["published"]["committed"], true);
        assert_eq!(result["reflection"]["confidence"], 0.8);
        assert_eq!(repo.pull_requests().len(), 1);
        assert_eq!(generator.purposes(), vec!["plan", "execute", "reflect"]);

        let plan = orch.store().get_plan(job.id).await.unwrap().unwrap();
        assert!(plan.evidence.iter().all(|e| e.status == EvidenceStatus::Passed));

        // Numbering continues across the pause.
        let trace = orch.store().get_trace_events(job.id).await.unwrap();
        assert!(trace.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[tokio::test]
    async fn commit_failure_completes_unpublished() {
        let generator = Arc::new(ScriptedGenerator::with_replies([
            plan_reply("low"),
            bundle_reply(2),
            reflection_reply(),
        ]));
        let repo = Arc::new(FakeRepo::named("github").fail(FakeOp::CommitFile, ToolErrorKind::Unauthorized));
        let orch = with_repo(orchestrator(generator), repo);
        let job = orch.submit(NewJob::new("docs", docs_payload(false))).await.unwrap();

        let done = orch.run(job.id).await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        let result = done.result.unwrap();
        assert_eq!(result["published"]["committed"], false);
        assert_eq!(result["published"]["reason"], "tool_error");

        let plan = orch.store().get_plan(job.id).await.unwrap().unwrap();
        let published = plan.evidence.iter().find(|e| e.name == EVIDENCE_PUBLISHED).unwrap();
        assert_eq!(published.status, EvidenceStatus::Failed);
    }

    #[tokio::test]
    async fn dry_run_never_touches_the_repository() {
        let generator = Arc::new(ScriptedGenerator::with_replies([
            plan_reply("low"),
            bundle_reply(1),
            reflection_reply(),
        ]));
        let repo = Arc::new(FakeRepo::named("github"));
        let orch = with_repo(orchestrator(generator), repo.clone());
        let job = orch
            .submit(NewJob::new("docs", docs_payload(false)).dry_run(true))
            .await
            .unwrap();

        let done = orch.run(job.id).await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.result.unwrap()["published"]["reason"], "dry_run");
        assert!(repo.calls().is_empty());
    }

    #[tokio::test]
    async fn exhausted_contract_retries_fail_the_job() {
        let bad = json!({ "summary": "x", "cases": [] }).to_string();
        let generator = Arc::new(ScriptedGenerator::with_replies([bad.clone(), bad]));
        let orch = orchestrator(generator.clone());
        let job = orch
            .submit(NewJob::new("test_plan", json!({ "spec": "Login feature" })))
            .await
            .unwrap();
        let mut events = orch.bus().subscribe_job(job.id);

        let done = orch.run(job.id).await.unwrap();
        assert_eq!(done.state, JobState::Failed);
        assert_eq!(done.failure.as_ref().unwrap().code, ErrorCode::ContractViolation);
        assert_eq!(done.result.unwrap()["quality"]["score"], 0);
        assert_eq!(generator.requests().len(), 2);

        let mut fatal = None;
        while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(50), events.recv()).await {
            if let LiveEvent::Error { code, fatal: true, .. } = event {
                fatal = code;
            }
        }
        assert_eq!(fatal, Some(ErrorCode::ContractViolation));
    }

    #[tokio::test]
    async fn nonconforming_output_is_caught_at_validation() {
        let orch = orchestrator(Arc::new(ScriptedGenerator::new()));
        let job = orch
            .submit(NewJob::new("unchecked", json!({ "spec": "anything" })))
            .await
            .unwrap();

        let done = orch.run(job.id).await.unwrap();
        let failure = done.failure.unwrap();
        assert_eq!(failure.code, ErrorCode::ContractViolation);
        assert!(failure.message.contains("test_plan"));
    }

    #[tokio::test]
    async fn missing_api_key_fails_with_generation_code() {
        let orch = orchestrator(Arc::new(DisabledGenerator::new("openai", "gpt-4o-mini")));
        let job = orch
            .submit(NewJob::new("test_plan", json!({ "spec": "Login feature" })))
            .await
            .unwrap();

        let done = orch.run(job.id).await.unwrap();
        assert_eq!(done.state, JobState::Failed);
        assert_eq!(done.failure.unwrap().code, ErrorCode::GenerationFailed);
    }

    #[tokio::test]
    async fn second_start_and_stray_approval_are_rejected() {
        let generator = Arc::new(ScriptedGenerator::with_replies([bundle_reply(1)]));
        let orch = orchestrator(generator);
        let job = orch
            .submit(NewJob::new("fixture", json!({ "spec": "Document the API" })))
            .await
            .unwrap();
        orch.run(job.id).await.unwrap();

        let err = orch.run(job.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition(_)));
        let err = orch.approve(job.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
        assert_eq!(orch.get_job(job.id).await.unwrap().state, JobState::Completed);
    }

    #[tokio::test]
    async fn submit_rejects_bad_payloads_and_unknown_types() {
        let orch = orchestrator(Arc::new(ScriptedGenerator::new()));

        let err = orch
            .submit(NewJob::new("test_plan", json!({ "targets": [] })))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidInput(_)));

        let err = orch.submit(NewJob::new("deploy", json!({}))).await.unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_AGENT");
        assert!(orch.store().list_jobs(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unregistered_type_fails_at_run_time() {
        let orch = orchestrator(Arc::new(ScriptedGenerator::new()));
        let job = orch
            .store()
            .create_job(Job::new(NewJob::new("retired_kind", json!({}))))
            .await
            .unwrap();

        let done = orch.run(job.id).await.unwrap();
        assert_eq!(done.failure.unwrap().code, ErrorCode::UnknownAgent);
    }

    #[tokio::test]
    async fn unreadable_trace_fails_the_job_at_once() {
        let store = Arc::new(InMemoryJobStore::new());
        let orch = Orchestrator::new(
            store.clone(),
            EventBus::default(),
            Arc::new(ScriptedGenerator::new()),
            Arc::new(SkillRegistry::builtin().unwrap()),
        );
        let job = orch
            .submit(NewJob::new("test_plan", json!({ "spec": "Login feature" })))
            .await
            .unwrap();
        let mut events = orch.bus().subscribe_job(job.id);
        store.set_cursor_failure(true);

        let done = orch.run(job.id).await.unwrap();
        assert_eq!(done.state, JobState::Failed);
        assert_eq!(done.failure.unwrap().code, ErrorCode::Internal);
        assert_eq!(done.result.unwrap()["quality"]["score"], 0);

        let mut fatal = false;
        while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(50), events.recv()).await {
            if let LiveEvent::Error { fatal: true, .. } = event {
                fatal = true;
            }
        }
        assert!(fatal);
    }

    #[tokio::test]
    async fn revisions_require_a_finished_parent() {
        let generator = Arc::new(ScriptedGenerator::with_replies([bundle_reply(1)]));
        let orch = orchestrator(generator);
        let parent = orch
            .submit(NewJob::new("fixture", json!({ "spec": "Document the API" })))
            .await
            .unwrap();

        let err = orch.submit_revision(parent.id, "More examples").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::RevisionNotAllowed { state: JobState::Pending, .. }));

        orch.run(parent.id).await.unwrap();
        let child = orch.submit_revision(parent.id, "  More examples ").await.unwrap();
        assert_eq!(child.parent_id, Some(parent.id));
        assert_eq!(child.revision_note.as_deref(), Some("More examples"));
        assert_eq!(child.payload["revisionNote"], "More examples");
        assert_eq!(child.state, JobState::Pending);

        let revisions = orch.store().list_revisions(parent.id).await.unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].id, child.id);
    }
}
