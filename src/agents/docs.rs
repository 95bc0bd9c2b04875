//! Documentation agent.
//!
//! Reads source material, writes documentation files for the configured
//! targets, optionally runs a second review pass, and proposes the files as
//! a draft pull request. Source reads that fail are fatal (nothing useful
//! can be written without them); publishing failures are not.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{
    Agent, AgentContext, AgentDescriptor, AgentError, AgentOutput, ContractCheck, Planner,
    Reflection,
};
use crate::contract::{DOC_BUNDLE, REFLECTION};
use crate::job::{Job, Plan};
use crate::quality::AnalysisDepth;
use crate::tools::{publish_files, GeneratedFile, PublishRequest, ToolSession};
use crate::trace::recorder::ArtifactInput;
use crate::trace::{ArtifactType, TraceEntry, TraceEventType, TraceStatus};
use crate::util::{dedup_trimmed, truncate_chars};

pub const KIND: &str = "docs";

/// Per-source excerpt length included in the prompt.
const SOURCE_EXCERPT_CHARS: usize = 4000;

/// Where to publish, taken from the payload's `repo` object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoTarget {
    pub tool: Option<String>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocsRequest {
    pub spec: String,
    #[serde(default)]
    pub targets: Vec<String>,
    /// Repository paths to read through the tool
    #[serde(default)]
    pub sources: Vec<String>,
    /// Source material supplied inline
    #[serde(default)]
    pub documents: Vec<GeneratedFile>,
    #[serde(default)]
    pub depth: AnalysisDepth,
    #[serde(default)]
    pub multi_pass: bool,
    #[serde(default)]
    pub repo: RepoTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocBundle {
    pub summary: String,
    pub files: Vec<GeneratedFile>,
    #[serde(default)]
    pub covered_targets: Vec<String>,
}

pub struct DocsAgent;

impl DocsAgent {
    fn request(job: &Job) -> Result<DocsRequest, AgentError> {
        serde_json::from_value(job.payload.clone())
            .map_err(|e| AgentError::InvalidInput(format!("docs payload: {}", e)))
    }

    fn skill_input(request: &DocsRequest) -> Value {
        json!({
            "spec": request.spec,
            "targets": request.targets,
            "sources": request.sources,
            "depth": request.depth,
            "multiPass": request.multi_pass,
        })
    }

    /// Gather source material: inline documents first, then tool reads.
    async fn read_sources(
        ctx: &AgentContext,
        request: &DocsRequest,
        tools: Option<&ToolSession>,
    ) -> Result<Vec<GeneratedFile>, AgentError> {
        let mut sources = Vec::new();
        for doc in &request.documents {
            ctx.recorder.record_artifact(ArtifactInput {
                artifact_type: ArtifactType::DocRead,
                path: &doc.path,
                content: &doc.content,
                previous: None,
            });
            sources.push(doc.clone());
        }

        match tools {
            Some(session) => {
                for path in &request.sources {
                    match session.read_file(path).await? {
                        Some(content) => sources.push(GeneratedFile {
                            path: path.clone(),
                            content,
                        }),
                        None => {
                            ctx.recorder.record(
                                TraceEntry::new(TraceEventType::Info, format!("Source not found: {}", path))
                                    .status(TraceStatus::Warning),
                            );
                        }
                    }
                }
            }
            None if !request.sources.is_empty() => {
                ctx.recorder.record(
                    TraceEntry::new(
                        TraceEventType::Info,
                        format!("No repository tool; skipped {} source path(s)", request.sources.len()),
                    )
                    .status(TraceStatus::Warning),
                );
            }
            None => {}
        }
        Ok(sources)
    }

    fn task(request: &DocsRequest, sources: &[GeneratedFile], plan: Option<&Plan>) -> String {
        let mut task = format!("Write documentation for the following request.\n\n{}\n", request.spec);
        if !request.targets.is_empty() {
            task.push_str(&format!("\nTargets to cover: {}\n", request.targets.join(", ")));
        }
        if let Some(plan) = plan {
            task.push_str(&format!("\nFollow the approved plan:\n{}\n", plan.markdown));
        }
        for source in sources {
            let (excerpt, cut) = truncate_chars(&source.content, SOURCE_EXCERPT_CHARS);
            task.push_str(&format!(
                "\n--- {} ---\n{}{}\n",
                source.path,
                excerpt,
                if cut { "\n[...]" } else { "" }
            ));
        }
        task
    }

    fn covered(request: &DocsRequest, bundle: &DocBundle) -> u32 {
        let claimed: HashSet<String> = bundle
            .covered_targets
            .iter()
            .map(|t| t.trim().to_lowercase())
            .collect();
        dedup_trimmed(request.targets.iter().cloned())
            .iter()
            .filter(|t| claimed.contains(&t.to_lowercase()))
            .count() as u32
    }

    fn publish_request(job: &Job, request: &DocsRequest, bundle: &DocBundle) -> PublishRequest {
        let headline = request.spec.lines().next().unwrap_or("documentation").trim();
        let (headline, _) = truncate_chars(headline, 60);
        let id = job.id.to_string();
        PublishRequest {
            branch: request
                .repo
                .branch
                .clone()
                .unwrap_or_else(|| format!("agentjobs/docs-{}", &id[..8])),
            title: format!("Docs: {}", headline),
            body: format!("{}\n\nGenerated by agentjobs job {}.", bundle.summary, id),
            commit_message: format!("docs: {}", headline),
            dry_run: job.dry_run,
        }
    }
}

#[async_trait]
impl Agent for DocsAgent {
    fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor {
            kind: KIND,
            description: "Writes documentation for configured targets and opens a draft pull request",
            skill: Some(DOC_BUNDLE),
            requires_planning: true,
            requires_reflection: true,
            uses_tools: true,
        }
    }

    async fn plan(
        &self,
        ctx: &AgentContext,
        job: &Job,
        planner: &Planner,
    ) -> Result<Option<Plan>, AgentError> {
        let request = Self::request(job)?;
        let headline = request.spec.lines().next().unwrap_or_default().trim();
        let objective = format!("Document: {}", headline);
        planner.draft(ctx, job, &objective).await.map(Some)
    }

    async fn execute(&self, ctx: &AgentContext, job: &Job) -> Result<AgentOutput, AgentError> {
        self.execute_with_tools(ctx, job, None, None).await
    }

    async fn execute_with_tools(
        &self,
        ctx: &AgentContext,
        job: &Job,
        tools: Option<ToolSession>,
        plan: Option<&Plan>,
    ) -> Result<AgentOutput, AgentError> {
        let request = Self::request(job)?;
        let input = Self::skill_input(&request);
        let sources = Self::read_sources(ctx, &request, tools.as_ref()).await?;

        let task = Self::task(&request, &sources, plan);
        let first = ctx
            .generate_structured::<DocBundle>(DOC_BUNDLE, &input, &task, "execute")
            .await?;
        let mut attempts = first.attempts;
        let (mut bundle, mut raw) = (first.value, first.raw);

        if request.multi_pass {
            let review_task = format!(
                "{}\n\nReview this first draft, fix gaps against the targets and return the improved bundle:\n{}",
                task, raw
            );
            let review = ctx
                .generate_structured::<DocBundle>(DOC_BUNDLE, &input, &review_task, "review")
                .await?;
            attempts += review.attempts;
            bundle = review.value;
            raw = review.raw;
        }

        let publish = Self::publish_request(job, &request, &bundle);
        let published = publish_files(tools.as_ref(), &ctx.recorder, &bundle.files, &publish).await;

        Ok(AgentOutput {
            result: json!({
                "summary": bundle.summary,
                "files": bundle.files.iter().map(|f| f.path.clone()).collect::<Vec<_>>(),
                "coveredTargets": bundle.covered_targets,
            }),
            contract: Some(ContractCheck {
                skill: DOC_BUNDLE.to_string(),
                attempts,
                output: raw,
            }),
            targets_configured: dedup_trimmed(request.targets.iter().cloned()).len() as u32,
            targets_covered: Self::covered(&request, &bundle),
            depth: request.depth,
            multi_pass: request.multi_pass,
            published: Some(published),
        })
    }

    async fn reflect(
        &self,
        ctx: &AgentContext,
        job: &Job,
        output: &AgentOutput,
    ) -> Result<Option<Reflection>, AgentError> {
        let task = format!(
            "Critique this documentation result for the request below. List concrete issues and rate your confidence from 0 to 1.\n\nRequest:\n{}\n\nResult:\n{}",
            job.payload.get("spec").and_then(Value::as_str).unwrap_or_default(),
            output.result
        );
        let outcome = ctx
            .generate_structured::<Reflection>(REFLECTION, &json!({}), &task, "reflect")
            .await?;
        Ok(Some(outcome.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(targets: &[&str]) -> DocsRequest {
        serde_json::from_value(json!({
            "spec": "Document the billing API\nMore detail",
            "targets": targets,
        }))
        .unwrap()
    }

    fn bundle(covered: &[&str]) -> DocBundle {
        DocBundle {
            summary: "Docs".to_string(),
            files: vec![],
            covered_targets: covered.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn coverage_only_counts_configured_targets() {
        let req = request(&["Invoices", "Refunds", "Invoices "]);
        assert_eq!(DocsAgent::covered(&req, &bundle(&["invoices", "Webhooks"])), 1);
        assert_eq!(DocsAgent::covered(&req, &bundle(&["Refunds", "Invoices"])), 2);
    }

    #[test]
    fn payload_defaults() {
        let req = request(&[]);
        assert_eq!(req.depth, AnalysisDepth::Lite);
        assert!(!req.multi_pass);
        assert!(req.repo.branch.is_none());
    }

    #[test]
    fn publish_request_uses_headline_and_short_branch() {
        let job = Job::new(crate::job::NewJob::new("docs", json!({"spec": "x"})).dry_run(true));
        let publish = DocsAgent::publish_request(&job, &request(&[]), &bundle(&[]));
        assert_eq!(publish.title, "Docs: Document the billing API");
        assert!(publish.branch.starts_with("agentjobs/docs-"));
        assert!(publish.dry_run);
    }
}
