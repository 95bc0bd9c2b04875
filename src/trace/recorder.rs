//! Per-job trace recorder.
//!
//! Events, artifacts and AI-call rows are sanitized, stamped, published live
//! and buffered in memory. Buffers reach storage on [`TraceRecorder::flush`],
//! which runs explicitly, on a timer, or when a buffer reaches the batch size.
//!
//! # Invariants
//! - sequence numbers and AI-call indices are strictly increasing per job
//! - buffered items keep creation order, including after a failed flush
//! - a failing flush stage never prevents the other stages from flushing
//! - the live channel never blocks or fails recording

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::redact::{redact_str, sanitize_detail, sanitize_preview};
use super::{
    AiCallRecord, Artifact, ArtifactType, TraceEntry, TraceEvent, TraceEventType, TraceStatus,
};
use crate::config::Config;
use crate::cost::{estimate_cost_usd, TokenUsage};
use crate::events::{EventBus, LiveEvent};
use crate::job::{ErrorCode, ErrorScope, JobId};
use crate::store::JobStore;

/// Size caps and batching thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderLimits {
    pub max_detail_bytes: usize,
    pub max_preview_chars: usize,
    pub max_diff_chars: usize,
    /// Cap for titles and the asked/did/why/summary text fields
    pub max_summary_chars: usize,
    /// Buffered item count that triggers an early flush
    pub flush_batch: usize,
}

impl Default for RecorderLimits {
    fn default() -> Self {
        Self {
            max_detail_bytes: 4096,
            max_preview_chars: 2000,
            max_diff_chars: 4000,
            max_summary_chars: 1000,
            flush_batch: 50,
        }
    }
}

impl RecorderLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_detail_bytes: config.trace_max_detail_bytes,
            max_preview_chars: config.trace_max_preview_chars,
            max_diff_chars: config.trace_max_diff_chars,
            max_summary_chars: config.trace_max_summary_chars,
            flush_batch: config.trace_flush_batch,
        }
    }
}

/// Where a recorder resumes numbering for a job that already has rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceCursor {
    pub last_sequence: u64,
    pub last_call_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushStage {
    Traces,
    Artifacts,
    AiCalls,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub traces: usize,
    pub artifacts: usize,
    pub ai_calls: usize,
    pub failed_stages: Vec<FlushStage>,
}

impl FlushReport {
    pub fn is_ok(&self) -> bool {
        self.failed_stages.is_empty()
    }
}

/// Input for [`TraceRecorder::record_artifact`].
#[derive(Debug, Clone)]
pub struct ArtifactInput<'a> {
    pub artifact_type: ArtifactType,
    pub path: &'a str,
    pub content: &'a str,
    /// Prior content, for `file_modified` diffs
    pub previous: Option<&'a str>,
}

/// Input for [`TraceRecorder::record_ai_call`].
#[derive(Debug, Clone)]
pub struct AiCallInput {
    pub provider: String,
    pub model: String,
    pub purpose: String,
    pub usage: TokenUsage,
    pub duration: Duration,
    pub success: bool,
}

#[derive(Default)]
struct Buffers {
    next_sequence: u64,
    events: Vec<TraceEvent>,
    artifacts: Vec<Artifact>,
    ai_calls: Vec<AiCallRecord>,
    files_read: u32,
    files_produced: u32,
}

impl Buffers {
    fn len(&self) -> usize {
        self.events.len() + self.artifacts.len() + self.ai_calls.len()
    }
}

pub struct TraceRecorder {
    job_id: JobId,
    store: Arc<dyn JobStore>,
    bus: EventBus,
    limits: RecorderLimits,
    buffers: StdMutex<Buffers>,
    call_index: AtomicU32,
    // Serializes flushes so re-queued items cannot overtake newer ones.
    flush_lock: Mutex<()>,
    batch_full: Notify,
}

impl TraceRecorder {
    pub fn new(
        job_id: JobId,
        store: Arc<dyn JobStore>,
        bus: EventBus,
        limits: RecorderLimits,
        cursor: TraceCursor,
    ) -> Self {
        Self {
            job_id,
            store,
            bus,
            limits,
            buffers: StdMutex::new(Buffers {
                next_sequence: cursor.last_sequence + 1,
                ..Default::default()
            }),
            call_index: AtomicU32::new(cursor.last_call_index),
            flush_lock: Mutex::new(()),
            batch_full: Notify::new(),
        }
    }

    /// Build a recorder that continues numbering after the job's stored rows.
    pub async fn resume(
        job_id: JobId,
        store: Arc<dyn JobStore>,
        bus: EventBus,
        limits: RecorderLimits,
    ) -> Result<Self, crate::store::StoreError> {
        let cursor = store.trace_cursor(job_id).await?;
        Ok(Self::new(job_id, store, bus, limits, cursor))
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn limits(&self) -> RecorderLimits {
        self.limits
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Buffers> {
        // A panic while holding the lock cannot leave buffers half-written,
        // so a poisoned lock is still usable.
        self.buffers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn after_push(&self, buffered: usize) {
        if buffered >= self.limits.flush_batch {
            self.batch_full.notify_one();
        }
    }

    /// Record a timeline event and return its sequence number.
    pub fn record(&self, entry: TraceEntry) -> u64 {
        let cap = |s: &str| sanitize_preview(s, self.limits.max_summary_chars).0;
        let redact = |s: Option<String>| s.map(|s| cap(&s));
        let detail = entry
            .detail
            .as_ref()
            .map(|d| sanitize_detail(d, self.limits.max_detail_bytes));

        let (sequence, buffered) = {
            let mut buffers = self.lock();
            let sequence = buffers.next_sequence;
            buffers.next_sequence += 1;
            let event = TraceEvent {
                job_id: self.job_id,
                sequence,
                event_type: entry.event_type,
                step_id: entry.step_id,
                title: cap(&entry.title),
                status: entry.status,
                duration_ms: entry.duration_ms,
                correlation_id: entry.correlation_id,
                asked: redact(entry.asked),
                did: redact(entry.did),
                why: redact(entry.why),
                reasoning_summary: redact(entry.reasoning_summary),
                tool_name: entry.tool_name,
                input_summary: redact(entry.input_summary),
                output_summary: redact(entry.output_summary),
                detail,
                created_at: Utc::now(),
            };
            // Published under the lock so live order matches sequence order.
            self.bus.publish(LiveEvent::Trace {
                job_id: self.job_id,
                event: event.clone(),
            });
            buffers.events.push(event);
            (sequence, buffers.len())
        };
        self.after_push(buffered);
        sequence
    }

    pub fn info(&self, title: impl Into<String>) -> u64 {
        self.record(TraceEntry::new(TraceEventType::Info, title))
    }

    pub fn step_start(&self, step_id: &str, title: impl Into<String>) -> u64 {
        self.record(
            TraceEntry::new(TraceEventType::StepStart, title)
                .step(step_id)
                .status(TraceStatus::Info),
        )
    }

    pub fn step_complete(&self, step_id: &str, title: impl Into<String>, elapsed: Duration) -> u64 {
        self.record(
            TraceEntry::new(TraceEventType::StepComplete, title)
                .step(step_id)
                .status(TraceStatus::Success)
                .duration(elapsed),
        )
    }

    pub fn step_failed(
        &self,
        step_id: &str,
        title: impl Into<String>,
        elapsed: Duration,
        error: &str,
        detail: Option<Value>,
    ) -> u64 {
        let mut entry = TraceEntry::new(TraceEventType::StepFailed, title)
            .step(step_id)
            .status(TraceStatus::Failed)
            .duration(elapsed)
            .output(error);
        if let Some(detail) = detail {
            entry = entry.detail(detail);
        }
        self.record(entry)
    }

    pub fn error(&self, title: impl Into<String>, message: &str) -> u64 {
        self.record(
            TraceEntry::new(TraceEventType::Error, title)
                .status(TraceStatus::Failed)
                .output(message),
        )
    }

    /// Record an error entry and publish the matching live error event.
    ///
    /// Non-fatal errors are reported the same way; the job carries on.
    pub fn report_error(
        &self,
        scope: ErrorScope,
        code: Option<ErrorCode>,
        title: impl Into<String>,
        message: &str,
        fatal: bool,
    ) -> u64 {
        let sequence = self.record(
            TraceEntry::new(TraceEventType::Error, title)
                .status(if fatal { TraceStatus::Failed } else { TraceStatus::Warning })
                .output(message)
                .detail(json!({
                    "scope": scope,
                    "code": code,
                    "fatal": fatal,
                })),
        );
        self.bus.publish(LiveEvent::Error {
            job_id: self.job_id,
            scope,
            code,
            message: sanitize_preview(message, self.limits.max_summary_chars).0,
            fatal,
        });
        sequence
    }

    /// Record a file-level artifact plus its matching timeline event.
    pub fn record_artifact(&self, input: ArtifactInput<'_>) -> Artifact {
        let (preview, _) = sanitize_preview(input.content, self.limits.max_preview_chars);
        let diff = match (input.artifact_type, input.previous) {
            (ArtifactType::FileModified, Some(previous)) => Some(line_diff(previous, input.content)),
            _ => None,
        };
        let artifact = Artifact {
            job_id: self.job_id,
            artifact_type: input.artifact_type,
            path: redact_str(input.path),
            operation: input.artifact_type.operation().to_string(),
            size_bytes: input.content.len() as u64,
            content_hash: content_hash(input.content),
            preview,
            diff_preview: diff
                .as_ref()
                .map(|d| sanitize_preview(&d.text, self.limits.max_diff_chars).0),
            lines_added: diff.as_ref().map(|d| d.added),
            lines_removed: diff.as_ref().map(|d| d.removed),
            created_at: Utc::now(),
        };

        let event_type = match input.artifact_type {
            ArtifactType::DocRead => TraceEventType::DocRead,
            ArtifactType::FileCreated => TraceEventType::FileCreated,
            ArtifactType::FileModified => TraceEventType::FileModified,
            ArtifactType::FileDeleted | ArtifactType::FilePreview => TraceEventType::Info,
        };
        self.record(
            TraceEntry::new(event_type, format!("{} {}", artifact.operation, artifact.path))
                .status(TraceStatus::Success)
                .detail(json!({
                    "path": artifact.path,
                    "sizeBytes": artifact.size_bytes,
                    "contentHash": artifact.content_hash,
                })),
        );

        let buffered = {
            let mut buffers = self.lock();
            match input.artifact_type {
                ArtifactType::DocRead => buffers.files_read += 1,
                ArtifactType::FileCreated | ArtifactType::FileModified => {
                    buffers.files_produced += 1
                }
                ArtifactType::FileDeleted | ArtifactType::FilePreview => {}
            }
            self.bus.publish(LiveEvent::Artifact {
                job_id: self.job_id,
                artifact: artifact.clone(),
            });
            buffers.artifacts.push(artifact.clone());
            buffers.len()
        };
        self.after_push(buffered);
        artifact
    }

    /// Record one model invocation and return its call index.
    pub fn record_ai_call(&self, input: AiCallInput) -> u32 {
        let call_index = self.call_index.fetch_add(1, Ordering::SeqCst) + 1;
        let row = AiCallRecord {
            job_id: self.job_id,
            call_index,
            provider: input.provider,
            model: input.model.clone(),
            purpose: input.purpose.clone(),
            prompt_tokens: input.usage.prompt_tokens,
            completion_tokens: input.usage.completion_tokens,
            duration_ms: input.duration.as_millis() as u64,
            estimated_cost_usd: estimate_cost_usd(&input.model, &input.usage),
            success: input.success,
            created_at: Utc::now(),
        };

        self.record(
            TraceEntry::new(TraceEventType::AiCall, format!("AI call: {}", input.purpose))
                .status(if input.success {
                    TraceStatus::Success
                } else {
                    TraceStatus::Failed
                })
                .duration(input.duration)
                .tool(row.provider.clone())
                .detail(json!({
                    "callIndex": call_index,
                    "model": row.model,
                    "promptCount": row.prompt_tokens,
                    "completionCount": row.completion_tokens,
                })),
        );

        let buffered = {
            let mut buffers = self.lock();
            buffers.ai_calls.push(row);
            buffers.len()
        };
        self.after_push(buffered);
        call_index
    }

    /// `(files_read, files_produced)` recorded so far by this recorder.
    pub fn file_counts(&self) -> (u32, u32) {
        let buffers = self.lock();
        (buffers.files_read, buffers.files_produced)
    }

    pub fn pending_len(&self) -> usize {
        self.lock().len()
    }

    /// Write buffered rows to storage.
    ///
    /// Each stage is attempted regardless of the others; rows of a failed
    /// stage go back to the front of their buffer for the next flush. With
    /// nothing buffered no storage call is made.
    pub async fn flush(&self) -> FlushReport {
        let _guard = self.flush_lock.lock().await;

        let (events, artifacts, ai_calls) = {
            let mut buffers = self.lock();
            (
                std::mem::take(&mut buffers.events),
                std::mem::take(&mut buffers.artifacts),
                std::mem::take(&mut buffers.ai_calls),
            )
        };

        let mut report = FlushReport::default();

        if !events.is_empty() {
            match self.store.insert_trace_events(self.job_id, &events).await {
                Ok(()) => report.traces = events.len(),
                Err(e) => {
                    tracing::error!(job_id = %self.job_id, count = events.len(), "Trace flush failed: {}", e);
                    report.failed_stages.push(FlushStage::Traces);
                    let mut buffers = self.lock();
                    requeue(&mut buffers.events, events);
                }
            }
        }

        if !artifacts.is_empty() {
            match self.store.insert_artifacts(self.job_id, &artifacts).await {
                Ok(()) => report.artifacts = artifacts.len(),
                Err(e) => {
                    tracing::error!(job_id = %self.job_id, count = artifacts.len(), "Artifact flush failed: {}", e);
                    report.failed_stages.push(FlushStage::Artifacts);
                    let mut buffers = self.lock();
                    requeue(&mut buffers.artifacts, artifacts);
                }
            }
        }

        if !ai_calls.is_empty() {
            match self.store.insert_ai_calls(self.job_id, &ai_calls).await {
                Ok(()) => report.ai_calls = ai_calls.len(),
                Err(e) => {
                    tracing::error!(job_id = %self.job_id, count = ai_calls.len(), "AI call flush failed: {}", e);
                    report.failed_stages.push(FlushStage::AiCalls);
                    let mut buffers = self.lock();
                    requeue(&mut buffers.ai_calls, ai_calls);
                }
            }
        }

        report
    }

    /// Flush on `interval` and whenever a buffer fills, until `cancel` fires.
    /// A final flush runs on the way out.
    pub fn spawn_periodic_flush(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            // A zero period would panic.
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = recorder.batch_full.notified() => {}
                }
                recorder.flush().await;
            }
            recorder.flush().await;
        })
    }
}

fn requeue<T>(buffer: &mut Vec<T>, mut failed: Vec<T>) {
    failed.append(buffer);
    *buffer = failed;
}

/// SHA-256 hex digest of raw content.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDiff {
    pub added: u32,
    pub removed: u32,
    pub text: String,
}

/// Changed region between the common leading and trailing lines.
pub fn line_diff(old: &str, new: &str) -> LineDiff {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let prefix = old_lines
        .iter()
        .zip(&new_lines)
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = old_lines.len().min(new_lines.len()) - prefix;
    let suffix = old_lines
        .iter()
        .rev()
        .zip(new_lines.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let removed = &old_lines[prefix..old_lines.len() - suffix];
    let added = &new_lines[prefix..new_lines.len() - suffix];

    let mut text = format!("@@ line {} @@\n", prefix + 1);
    for line in removed {
        text.push('-');
        text.push_str(line);
        text.push('\n');
    }
    for line in added {
        text.push('+');
        text.push_str(line);
        text.push('\n');
    }

    LineDiff {
        added: added.len() as u32,
        removed: removed.len() as u32,
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryJobStore;

    fn recorder_with(store: Arc<InMemoryJobStore>, limits: RecorderLimits) -> TraceRecorder {
        TraceRecorder::new(
            JobId::new(),
            store,
            EventBus::new(64),
            limits,
            TraceCursor::default(),
        )
    }

    #[tokio::test]
    async fn empty_flush_makes_no_storage_calls() {
        let store = Arc::new(InMemoryJobStore::new());
        let recorder = recorder_with(store.clone(), RecorderLimits::default());
        let report = recorder.flush().await;
        assert!(report.is_ok());
        assert_eq!(report, FlushReport::default());
        assert_eq!(store.insert_call_count(), 0);
    }

    #[tokio::test]
    async fn events_are_numbered_and_flushed_in_order() {
        let store = Arc::new(InMemoryJobStore::new());
        let recorder = recorder_with(store.clone(), RecorderLimits::default());
        recorder.step_start("s1", "Read");
        recorder.info("between");
        recorder.step_complete("s1", "Read", Duration::from_millis(5));

        let report = recorder.flush().await;
        assert_eq!(report.traces, 3);
        let stored = store.get_trace_events(recorder.job_id()).await.unwrap();
        let sequences: Vec<u64> = stored.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(stored[2].event_type, TraceEventType::StepComplete);
    }

    #[tokio::test]
    async fn failing_stage_does_not_block_others_and_is_retried() {
        let store = Arc::new(InMemoryJobStore::new());
        let recorder = recorder_with(store.clone(), RecorderLimits::default());
        recorder.info("first");
        recorder.record_artifact(ArtifactInput {
            artifact_type: ArtifactType::DocRead,
            path: "README.md",
            content: "# hello",
            previous: None,
        });
        recorder.record_ai_call(AiCallInput {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            purpose: "execute".to_string(),
            usage: TokenUsage::new(10, 5),
            duration: Duration::from_millis(20),
            success: true,
        });

        store.set_insert_failure(FlushStage::Traces, true);
        let report = recorder.flush().await;
        assert_eq!(report.failed_stages, vec![FlushStage::Traces]);
        assert_eq!(report.artifacts, 1);
        assert_eq!(report.ai_calls, 1);
        assert!(store.get_trace_events(recorder.job_id()).await.unwrap().is_empty());

        recorder.info("later");
        store.set_insert_failure(FlushStage::Traces, false);
        let report = recorder.flush().await;
        assert!(report.is_ok());
        let stored = store.get_trace_events(recorder.job_id()).await.unwrap();
        let sequences: Vec<u64> = stored.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
        assert_eq!(stored[3].title, "later");
    }

    #[tokio::test]
    async fn ai_call_indices_increase_from_cursor() {
        let store = Arc::new(InMemoryJobStore::new());
        let recorder = TraceRecorder::new(
            JobId::new(),
            store,
            EventBus::new(8),
            RecorderLimits::default(),
            TraceCursor {
                last_sequence: 10,
                last_call_index: 2,
            },
        );
        let call = || AiCallInput {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            purpose: "plan".to_string(),
            usage: TokenUsage::default(),
            duration: Duration::ZERO,
            success: true,
        };
        assert_eq!(recorder.record_ai_call(call()), 3);
        assert_eq!(recorder.record_ai_call(call()), 4);
        assert_eq!(recorder.info("next"), 13);
    }

    #[tokio::test]
    async fn detail_and_summaries_are_redacted_before_buffering() {
        let store = Arc::new(InMemoryJobStore::new());
        let recorder = recorder_with(store.clone(), RecorderLimits::default());
        recorder.record(
            TraceEntry::new(TraceEventType::ToolCall, "call")
                .input("token sk-abcdefghijklmnopqrstu in input")
                .detail(json!({"password": "hunter2", "path": "a.md"})),
        );
        recorder.flush().await;
        let stored = store.get_trace_events(recorder.job_id()).await.unwrap();
        assert_eq!(
            stored[0].input_summary.as_deref(),
            Some("token [REDACTED] in input")
        );
        let detail = stored[0].detail.as_ref().unwrap();
        assert_eq!(detail["password"], "[REDACTED]");
        assert_eq!(detail["path"], "a.md");
    }

    #[tokio::test]
    async fn long_text_fields_are_capped() {
        let store = Arc::new(InMemoryJobStore::new());
        let limits = RecorderLimits {
            max_summary_chars: 100,
            ..Default::default()
        };
        let recorder = recorder_with(store.clone(), limits);
        recorder.error("x".repeat(5_000), &"y".repeat(200_000));
        recorder.record(
            TraceEntry::new(TraceEventType::Decision, "decide")
                .asked("a".repeat(500))
                .why("w".repeat(500)),
        );
        recorder.flush().await;

        let stored = store.get_trace_events(recorder.job_id()).await.unwrap();
        let within = |s: &Option<String>| s.as_ref().map_or(0, |s| s.chars().count()) <= 101;
        assert!(stored[0].title.chars().count() <= 101);
        assert!(within(&stored[0].output_summary));
        assert!(stored[0].output_summary.as_deref().unwrap().ends_with('…'));
        assert!(within(&stored[1].asked));
        assert!(within(&stored[1].why));
        assert_eq!(stored[1].title, "decide");
    }

    #[tokio::test]
    async fn artifacts_carry_hash_preview_and_diff() {
        let store = Arc::new(InMemoryJobStore::new());
        let limits = RecorderLimits {
            max_preview_chars: 8,
            ..Default::default()
        };
        let recorder = recorder_with(store, limits);
        let artifact = recorder.record_artifact(ArtifactInput {
            artifact_type: ArtifactType::FileModified,
            path: "docs/api.md",
            content: "a\nB\nc\nd\n",
            previous: Some("a\nb\nc\n"),
        });
        assert_eq!(artifact.content_hash, content_hash("a\nB\nc\nd\n"));
        assert_eq!(artifact.content_hash.len(), 64);
        assert_eq!(artifact.size_bytes, 8);
        assert_eq!(artifact.lines_added, Some(3));
        assert_eq!(artifact.lines_removed, Some(2));
        assert_eq!(recorder.file_counts(), (0, 1));
    }

    #[tokio::test]
    async fn live_events_follow_recording_order() {
        let store = Arc::new(InMemoryJobStore::new());
        let bus = EventBus::new(16);
        let job_id = JobId::new();
        let mut sub = bus.subscribe_job(job_id);
        let recorder = TraceRecorder::new(
            job_id,
            store,
            bus,
            RecorderLimits::default(),
            TraceCursor::default(),
        );
        recorder.info("one");
        recorder.info("two");
        for expected in [1, 2] {
            match sub.recv().await.unwrap() {
                LiveEvent::Trace { event, .. } => assert_eq!(event.sequence, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn periodic_flusher_drains_on_cancel() {
        let store = Arc::new(InMemoryJobStore::new());
        let recorder = Arc::new(recorder_with(store.clone(), RecorderLimits::default()));
        let cancel = CancellationToken::new();
        let handle = recorder.spawn_periodic_flush(Duration::from_secs(3600), cancel.clone());
        recorder.info("buffered");
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(recorder.pending_len(), 0);
        assert_eq!(store.get_trace_events(recorder.job_id()).await.unwrap().len(), 1);
    }

    #[test]
    fn line_diff_counts_changed_region() {
        let diff = line_diff("a\nb\nc\n", "a\nx\ny\nc\n");
        assert_eq!((diff.added, diff.removed), (2, 1));
        assert!(diff.text.contains("-b\n+x\n+y\n"));
        let same = line_diff("a\n", "a\n");
        assert_eq!((same.added, same.removed), (0, 0));
    }
}
