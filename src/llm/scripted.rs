//! Generator that replays queued replies.

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Generation, GenerationError, GenerationRequest, Generator};
use crate::cost::TokenUsage;

/// Replies are consumed in order; every request is kept for inspection.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: StdMutex<VecDeque<Result<String, GenerationError>>>,
    requests: StdMutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let generator = Self::new();
        for reply in replies {
            generator.push_reply(reply);
        }
        generator
    }

    pub fn push_reply(&self, content: impl Into<String>) {
        self.lock_replies().push_back(Ok(content.into()));
    }

    pub fn push_error(&self, error: GenerationError) {
        self.lock_replies().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Purposes of the requests received so far, in order.
    pub fn purposes(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.purpose).collect()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, GenerationError>>> {
        self.replies.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        let reply = self.lock_replies().pop_front().unwrap_or_else(|| {
            Err(GenerationError::parse_error(format!(
                "no scripted reply left for '{}'",
                request.purpose
            )))
        });
        reply.map(|content| Generation {
            usage: TokenUsage::new(
                (request.task.len() + request.context.len()) as u64 / 4,
                content.len() as u64 / 4,
            ),
            content,
            duration: Duration::from_millis(1),
        })
    }
}
