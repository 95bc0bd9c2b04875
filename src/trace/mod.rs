//! Execution trace: timeline events, file artifacts and AI-call rows.
//!
//! Everything here is append-only product data. Values are redacted and
//! size-capped by [`recorder::TraceRecorder`] before they reach storage.

pub mod redact;
pub mod recorder;

pub use recorder::{FlushReport, FlushStage, RecorderLimits, TraceCursor, TraceRecorder};

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::JobId;

/// Closed set of timeline event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventType {
    StepStart,
    StepComplete,
    StepFailed,
    DocRead,
    FileCreated,
    FileModified,
    McpConnect,
    McpCall,
    AiCall,
    AiParseError,
    Error,
    Info,
    ToolCall,
    ToolResult,
    Decision,
    PlanStep,
    Reasoning,
}

impl TraceEventType {
    pub const ALL: [TraceEventType; 17] = [
        TraceEventType::StepStart,
        TraceEventType::StepComplete,
        TraceEventType::StepFailed,
        TraceEventType::DocRead,
        TraceEventType::FileCreated,
        TraceEventType::FileModified,
        TraceEventType::McpConnect,
        TraceEventType::McpCall,
        TraceEventType::AiCall,
        TraceEventType::AiParseError,
        TraceEventType::Error,
        TraceEventType::Info,
        TraceEventType::ToolCall,
        TraceEventType::ToolResult,
        TraceEventType::Decision,
        TraceEventType::PlanStep,
        TraceEventType::Reasoning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TraceEventType::StepStart => "step_start",
            TraceEventType::StepComplete => "step_complete",
            TraceEventType::StepFailed => "step_failed",
            TraceEventType::DocRead => "doc_read",
            TraceEventType::FileCreated => "file_created",
            TraceEventType::FileModified => "file_modified",
            TraceEventType::McpConnect => "mcp_connect",
            TraceEventType::McpCall => "mcp_call",
            TraceEventType::AiCall => "ai_call",
            TraceEventType::AiParseError => "ai_parse_error",
            TraceEventType::Error => "error",
            TraceEventType::Info => "info",
            TraceEventType::ToolCall => "tool_call",
            TraceEventType::ToolResult => "tool_result",
            TraceEventType::Decision => "decision",
            TraceEventType::PlanStep => "plan_step",
            TraceEventType::Reasoning => "reasoning",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Success,
    Failed,
    Warning,
    Info,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Success => "success",
            TraceStatus::Failed => "failed",
            TraceStatus::Warning => "warning",
            TraceStatus::Info => "info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(TraceStatus::Success),
            "failed" => Some(TraceStatus::Failed),
            "warning" => Some(TraceStatus::Warning),
            "info" => Some(TraceStatus::Info),
            _ => None,
        }
    }
}

/// One immutable timeline entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub job_id: JobId,
    /// Creation order within the job, starting at 1
    pub sequence: u64,
    #[serde(rename = "type")]
    pub event_type: TraceEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub title: String,
    pub status: TraceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asked: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// An event as composed by callers, before the recorder stamps it with a
/// job id and sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry {
    pub event_type: TraceEventType,
    pub title: String,
    pub status: TraceStatus,
    pub step_id: Option<String>,
    pub duration_ms: Option<u64>,
    pub correlation_id: Option<String>,
    pub asked: Option<String>,
    pub did: Option<String>,
    pub why: Option<String>,
    pub reasoning_summary: Option<String>,
    pub tool_name: Option<String>,
    pub input_summary: Option<String>,
    pub output_summary: Option<String>,
    pub detail: Option<Value>,
}

impl TraceEntry {
    pub fn new(event_type: TraceEventType, title: impl Into<String>) -> Self {
        Self {
            event_type,
            title: title.into(),
            status: TraceStatus::Info,
            step_id: None,
            duration_ms: None,
            correlation_id: None,
            asked: None,
            did: None,
            why: None,
            reasoning_summary: None,
            tool_name: None,
            input_summary: None,
            output_summary: None,
            detail: None,
        }
    }

    pub fn status(mut self, status: TraceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = Some(elapsed.as_millis() as u64);
        self
    }

    pub fn correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn asked(mut self, text: impl Into<String>) -> Self {
        self.asked = Some(text.into());
        self
    }

    pub fn did(mut self, text: impl Into<String>) -> Self {
        self.did = Some(text.into());
        self
    }

    pub fn why(mut self, text: impl Into<String>) -> Self {
        self.why = Some(text.into());
        self
    }

    pub fn reasoning(mut self, text: impl Into<String>) -> Self {
        self.reasoning_summary = Some(text.into());
        self
    }

    pub fn tool(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    pub fn input(mut self, summary: impl Into<String>) -> Self {
        self.input_summary = Some(summary.into());
        self
    }

    pub fn output(mut self, summary: impl Into<String>) -> Self {
        self.output_summary = Some(summary.into());
        self
    }

    pub fn detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    DocRead,
    FileCreated,
    FileModified,
    FileDeleted,
    FilePreview,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::DocRead => "doc_read",
            ArtifactType::FileCreated => "file_created",
            ArtifactType::FileModified => "file_modified",
            ArtifactType::FileDeleted => "file_deleted",
            ArtifactType::FilePreview => "file_preview",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "doc_read" => Some(ArtifactType::DocRead),
            "file_created" => Some(ArtifactType::FileCreated),
            "file_modified" => Some(ArtifactType::FileModified),
            "file_deleted" => Some(ArtifactType::FileDeleted),
            "file_preview" => Some(ArtifactType::FilePreview),
            _ => None,
        }
    }

    /// Operation verb recorded alongside the artifact.
    pub fn operation(&self) -> &'static str {
        match self {
            ArtifactType::DocRead => "read",
            ArtifactType::FileCreated => "create",
            ArtifactType::FileModified => "modify",
            ArtifactType::FileDeleted => "delete",
            ArtifactType::FilePreview => "preview",
        }
    }
}

/// A file-level record of content read or produced during a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub job_id: JobId,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub path: String,
    pub operation: String,
    pub size_bytes: u64,
    /// SHA-256 hex of the raw content
    pub content_hash: String,
    pub preview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_added: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_removed: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Accounting row for one model invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiCallRecord {
    pub job_id: JobId,
    /// Strictly increasing per job, starting at 1
    pub call_index: u32,
    pub provider: String,
    pub model: String,
    pub purpose: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub duration_ms: u64,
    pub estimated_cost_usd: f64,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_types_round_trip_through_strings() {
        for t in TraceEventType::ALL {
            assert_eq!(TraceEventType::parse(t.as_str()), Some(t));
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn entry_builder_sets_fields() {
        let entry = TraceEntry::new(TraceEventType::ToolCall, "Commit docs")
            .status(TraceStatus::Success)
            .tool("github")
            .correlation("c-1")
            .duration(Duration::from_millis(1500));
        assert_eq!(entry.tool_name.as_deref(), Some("github"));
        assert_eq!(entry.duration_ms, Some(1500));
        assert_eq!(entry.status, TraceStatus::Success);
    }
}
