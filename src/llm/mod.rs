//! Generation collaborator.
//!
//! The core treats the model as an opaque `generate(task, context) -> content`
//! call. Implementations:
//! - [`HttpGenerator`]: OpenAI-compatible chat completions endpoint
//! - [`ScriptedGenerator`]: queued canned replies, for tests and demos
//! - [`DisabledGenerator`]: stands in when no provider is configured

mod error;
mod http;
mod scripted;

pub use error::{classify_http_status, GenerationError, GenerationErrorKind, RetryConfig};
pub use http::HttpGenerator;
pub use scripted::ScriptedGenerator;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::cost::TokenUsage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// What to produce
    pub task: String,
    /// Background material and output instructions
    pub context: String,
    /// Short label recorded on the AI-call row (e.g. "plan", "execute")
    pub purpose: String,
}

impl GenerationRequest {
    pub fn new(
        purpose: impl Into<String>,
        task: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            task: task.into(),
            context: context.into(),
            purpose: purpose.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub content: String,
    pub usage: TokenUsage,
    pub duration: Duration,
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Provider name recorded on AI-call rows.
    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    /// Produce content. Must be called with `temperature = 0` semantics so a
    /// retried request is meaningfully comparable.
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError>;
}

/// Generator used when no API key is configured: every call fails.
#[derive(Debug, Clone)]
pub struct DisabledGenerator {
    provider: String,
    model: String,
}

impl DisabledGenerator {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Generator for DisabledGenerator {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<Generation, GenerationError> {
        Err(GenerationError::not_configured(
            "LLM_API_KEY is not set; no model provider is available".to_string(),
        ))
    }
}

/// Build the generator described by `config`.
pub fn generator_from_config(config: &Config) -> Result<Arc<dyn Generator>, GenerationError> {
    match &config.llm_api_key {
        Some(key) => Ok(Arc::new(HttpGenerator::new(
            config.llm_provider.clone(),
            config.llm_api_url.clone(),
            key.clone(),
            config.llm_model.clone(),
        )?)),
        None => {
            tracing::warn!("LLM_API_KEY not set; generation calls will fail");
            Ok(Arc::new(DisabledGenerator::new(
                config.llm_provider.clone(),
                config.llm_model.clone(),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_generator_fails_permanently() {
        let generator = DisabledGenerator::new("openai", "gpt-4o-mini");
        let err = generator
            .generate(&GenerationRequest::new("plan", "task", ""))
            .await
            .unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::NotConfigured);
        assert!(!err.is_transient());
    }

    #[test]
    fn config_without_key_builds_disabled_generator() {
        let config = Config::for_tests();
        let generator = generator_from_config(&config).unwrap();
        assert_eq!(generator.model(), config.llm_model);
    }
}
