//! Publishing generated files as a change proposal.
//!
//! Publishing never fails the job. Generated files stay useful even when
//! the branch, commit or pull request cannot be created, so every tool
//! failure here is folded into a [`PublishOutcome`] with `committed: false`.
//! The failure itself still reaches the trace and the live feed as a
//! non-fatal tool error.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ToolError, ToolSession};
use crate::trace::recorder::ArtifactInput;
use crate::trace::{ArtifactType, TraceEntry, TraceEventType, TraceRecorder, TraceStatus};

pub const REASON_DRY_RUN: &str = "dry_run";
pub const REASON_NO_TOOL: &str = "no_tool";
pub const REASON_TOOL_ERROR: &str = "tool_error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub branch: String,
    pub title: String,
    pub body: String,
    pub commit_message: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub committed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default)]
    pub commits: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl PublishOutcome {
    fn skipped(reason: &str) -> Self {
        Self {
            committed: false,
            reason: Some(reason.to_string()),
            branch: None,
            commits: Vec::new(),
            pr_url: None,
            error: None,
        }
    }

    fn tool_failure(branch: &str, commits: Vec<String>, error: ToolError) -> Self {
        Self {
            committed: false,
            reason: Some(REASON_TOOL_ERROR.to_string()),
            branch: Some(branch.to_string()),
            commits,
            pr_url: None,
            error: Some(error),
        }
    }
}

/// Record `files` as artifacts and, unless this is a dry run or no tool is
/// available, commit them to a new branch and open a draft pull request.
///
/// Each remote operation is attempted at most once.
pub async fn publish_files(
    session: Option<&ToolSession>,
    recorder: &TraceRecorder,
    files: &[GeneratedFile],
    request: &PublishRequest,
) -> PublishOutcome {
    let live = session.filter(|_| !request.dry_run);

    for file in files {
        let previous = match live {
            Some(session) => match session.lookup(&file.path).await {
                Ok(previous) => previous,
                // Already traced by the session; the file is recorded without a diff.
                Err(e) => {
                    tracing::warn!(path = %file.path, "Could not read previous content: {}", e);
                    None
                }
            },
            None => None,
        };
        recorder.record_artifact(ArtifactInput {
            artifact_type: if previous.is_some() {
                ArtifactType::FileModified
            } else {
                ArtifactType::FileCreated
            },
            path: &file.path,
            content: &file.content,
            previous: previous.as_deref(),
        });
    }

    let outcome = match (request.dry_run, live) {
        (true, _) => PublishOutcome::skipped(REASON_DRY_RUN),
        (false, None) => PublishOutcome::skipped(REASON_NO_TOOL),
        (false, Some(session)) => commit_all(session, files, request).await,
    };

    let status = match (&outcome.error, outcome.committed) {
        (Some(_), _) => TraceStatus::Warning,
        (None, true) => TraceStatus::Success,
        (None, false) => TraceStatus::Info,
    };
    let title = if outcome.committed {
        format!("Published {} file(s) to {}", outcome.commits.len(), request.branch)
    } else {
        format!(
            "Not published: {}",
            outcome.reason.as_deref().unwrap_or("unknown")
        )
    };
    recorder.record(
        TraceEntry::new(TraceEventType::Decision, title)
            .status(status)
            .did("publish generated files")
            .detail(json!({
                "committed": outcome.committed,
                "reason": outcome.reason,
                "prUrl": outcome.pr_url,
            })),
    );
    outcome
}

async fn commit_all(
    session: &ToolSession,
    files: &[GeneratedFile],
    request: &PublishRequest,
) -> PublishOutcome {
    if let Err(error) = session.create_branch(&request.branch).await {
        return PublishOutcome::tool_failure(&request.branch, Vec::new(), error);
    }

    let mut commits = Vec::with_capacity(files.len());
    for file in files {
        match session
            .commit_file(&request.branch, &file.path, &file.content, &request.commit_message)
            .await
        {
            Ok(commit) => commits.push(commit),
            Err(error) => return PublishOutcome::tool_failure(&request.branch, commits, error),
        }
    }

    // Commits landed; a missing pull request is reported but does not undo them.
    let (pr_url, error) = match session
        .create_draft_pr(&request.branch, &request.title, &request.body)
        .await
    {
        Ok(url) => (Some(url), None),
        Err(error) => (None, Some(error)),
    };

    PublishOutcome {
        committed: true,
        reason: None,
        branch: Some(request.branch.clone()),
        commits,
        pr_url,
        error,
    }
}
