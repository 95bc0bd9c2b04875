//! Traced access to a tool for one job.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use super::{RepoTool, ToolError};
use crate::job::ErrorScope;
use crate::trace::recorder::ArtifactInput;
use crate::trace::{ArtifactType, TraceEntry, TraceEventType, TraceRecorder, TraceStatus};

/// Wraps a [`RepoTool`] so every operation lands in the job's trace:
/// a `tool_call` before the call, a `tool_result` after it. Both share a
/// correlation id.
#[derive(Clone)]
pub struct ToolSession {
    tool: Arc<dyn RepoTool>,
    recorder: Arc<TraceRecorder>,
}

impl ToolSession {
    pub fn new(tool: Arc<dyn RepoTool>, recorder: Arc<TraceRecorder>) -> Self {
        Self { tool, recorder }
    }

    pub fn tool_name(&self) -> &str {
        self.tool.name()
    }

    fn begin(&self, operation: &str, target: &str) -> (String, Instant) {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        self.recorder.record(
            TraceEntry::new(TraceEventType::ToolCall, format!("{} {}", operation, target))
                .tool(self.tool.name())
                .correlation(correlation_id.clone())
                .input(target),
        );
        (correlation_id, Instant::now())
    }

    fn finish<T>(
        &self,
        operation: &str,
        correlation_id: String,
        started: Instant,
        result: &Result<T, ToolError>,
        summary: impl FnOnce(&T) -> String,
    ) {
        let entry = TraceEntry::new(TraceEventType::ToolResult, operation.to_string())
            .tool(self.tool.name())
            .correlation(correlation_id)
            .duration(started.elapsed());
        let entry = match result {
            Ok(value) => entry.status(TraceStatus::Success).output(summary(value)),
            Err(err) => {
                tracing::warn!(tool = self.tool.name(), operation, "Tool call failed: {}", err);
                entry
                    .status(TraceStatus::Failed)
                    .output(err.message.clone())
                    .detail(json!({
                        "kind": err.kind,
                        "code": err.error_code(),
                        "hint": err.hint,
                    }))
            }
        };
        self.recorder.record(entry);
        if let Err(err) = result {
            // Callers decide whether a tool failure ends the job.
            self.recorder.report_error(
                ErrorScope::Tool,
                Some(err.error_code()),
                format!("{} failed on {}", operation, self.tool.name()),
                &err.message,
                false,
            );
        }
    }

    /// Read a source file and record it as a `doc_read` artifact.
    pub async fn read_file(&self, path: &str) -> Result<Option<String>, ToolError> {
        let content = self.lookup(path).await?;
        if let Some(content) = &content {
            self.recorder.record_artifact(ArtifactInput {
                artifact_type: ArtifactType::DocRead,
                path,
                content,
                previous: None,
            });
        }
        Ok(content)
    }

    /// Read a file without recording an artifact, e.g. to diff against it.
    pub async fn lookup(&self, path: &str) -> Result<Option<String>, ToolError> {
        let (id, started) = self.begin("read_file", path);
        let result = self.tool.read_file(path).await;
        self.finish("read_file", id, started, &result, |content| match content {
            Some(c) => format!("{} bytes", c.len()),
            None => "not found".to_string(),
        });
        result
    }

    pub async fn create_branch(&self, branch: &str) -> Result<(), ToolError> {
        let (id, started) = self.begin("create_branch", branch);
        let result = self.tool.create_branch(branch).await;
        self.finish("create_branch", id, started, &result, |_| format!("created {}", branch));
        result
    }

    pub async fn commit_file(
        &self,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<String, ToolError> {
        let (id, started) = self.begin("commit_file", path);
        let result = self.tool.commit_file(branch, path, content, message).await;
        self.finish("commit_file", id, started, &result, |sha| format!("commit {}", sha));
        result
    }

    pub async fn create_draft_pr(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<String, ToolError> {
        let (id, started) = self.begin("create_draft_pr", branch);
        let result = self.tool.create_draft_pr(branch, title, body).await;
        self.finish("create_draft_pr", id, started, &result, |url| url.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, LiveEvent};
    use crate::job::{ErrorCode, JobId};
    use crate::store::InMemoryJobStore;
    use crate::tools::{FakeOp, FakeRepo, ToolErrorKind};
    use crate::trace::{RecorderLimits, TraceCursor};

    fn recorder() -> Arc<TraceRecorder> {
        Arc::new(TraceRecorder::new(
            JobId::new(),
            Arc::new(InMemoryJobStore::new()),
            EventBus::default(),
            RecorderLimits::default(),
            TraceCursor::default(),
        ))
    }

    #[tokio::test]
    async fn read_records_call_result_and_artifact() {
        let recorder = recorder();
        let repo = Arc::new(FakeRepo::named("github").with_file("src/lib.rs", "pub fn a() {}"));
        let session = ToolSession::new(repo, recorder.clone());

        let content = session.read_file("src/lib.rs").await.unwrap();
        assert!(content.is_some());
        assert_eq!(recorder.file_counts(), (1, 0));
        // tool_call, tool_result, doc_read event, doc_read artifact
        assert_eq!(recorder.pending_len(), 4);
    }

    #[tokio::test]
    async fn failure_is_returned_and_traced() {
        let recorder = recorder();
        let repo = Arc::new(FakeRepo::named("github").fail(FakeOp::ReadFile, ToolErrorKind::Timeout));
        let session = ToolSession::new(repo, recorder.clone());

        let err = session.read_file("src/lib.rs").await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Timeout);
        assert_eq!(recorder.file_counts(), (0, 0));
        // tool_call, tool_result, error
        assert_eq!(recorder.pending_len(), 3);
    }

    #[tokio::test]
    async fn failure_publishes_a_non_fatal_tool_error() {
        let bus = EventBus::new(16);
        let job_id = JobId::new();
        let mut events = bus.subscribe();
        let recorder = Arc::new(TraceRecorder::new(
            job_id,
            Arc::new(InMemoryJobStore::new()),
            bus,
            RecorderLimits::default(),
            TraceCursor::default(),
        ));
        let repo = Arc::new(FakeRepo::named("github").fail(FakeOp::CreateBranch, ToolErrorKind::RateLimited));
        let session = ToolSession::new(repo, recorder);

        session.create_branch("agentjobs/docs").await.unwrap_err();

        let mut error = None;
        while let Ok(event) = events.try_recv() {
            if let LiveEvent::Error { scope, code, fatal, .. } = event {
                error = Some((scope, code, fatal));
            }
        }
        let (scope, code, fatal) = error.expect("error event published");
        assert_eq!(scope, ErrorScope::Tool);
        assert_eq!(code, Some(ErrorCode::ToolRateLimited));
        assert!(!fatal);
    }
}
