//! OpenAI-compatible chat completions client with retry for transient errors.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::{GenerationError, RetryConfig};
use super::{Generation, GenerationRequest, Generator};
use crate::cost::TokenUsage;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct HttpGenerator {
    client: Client,
    provider: String,
    api_url: String,
    api_key: String,
    model: String,
    retry_config: RetryConfig,
}

impl HttpGenerator {
    pub fn new(
        provider: String,
        api_url: String,
        api_key: String,
        model: String,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GenerationError::network_error(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            provider,
            api_url,
            api_key,
            model,
            retry_config: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Execute a single request without retry.
    async fn execute_request(&self, body: &ChatRequest<'_>) -> Result<Generation, GenerationError> {
        let started = Instant::now();
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::network_error(format!("Request timeout: {}", e))
                } else if e.is_connect() {
                    GenerationError::network_error(format!("Connection failed: {}", e))
                } else {
                    GenerationError::network_error(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::network_error(format!("Failed to read body: {}", e)))?;

        if !status.is_success() {
            return Err(GenerationError::from_status(status.as_u16(), &text, retry_after));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| GenerationError::parse_error(format!("Failed to parse response: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::parse_error("No content in response".to_string()))?;
        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Generation {
            content,
            usage,
            duration: started.elapsed(),
        })
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let mut messages = Vec::with_capacity(2);
        if !request.context.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &request.context,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.task,
        });
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.0,
        };

        tracing::debug!(model = %self.model, purpose = %request.purpose, "Sending generation request");

        let mut attempt = 0;
        loop {
            match self.execute_request(&body).await {
                Ok(generation) => return Ok(generation),
                Err(error) if self.retry_config.should_retry(&error, attempt) => {
                    let delay = error.suggested_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Transient generation error, retrying: {}",
                        error
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!("Generation failed: {}", error);
                    return Err(error);
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_response_with_usage() {
        let text = r#"{"choices":[{"message":{"role":"assistant","content":"{\"a\":1}"}}],
                       "usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}}"#;
        let parsed: ChatResponse = serde_json::from_str(text).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("{\"a\":1}"));
        let usage = parsed.usage.unwrap();
        assert_eq!((usage.prompt_tokens, usage.completion_tokens), (12, 3));
    }

    #[test]
    fn request_body_pins_temperature_to_zero() {
        let body = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: 0.0,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["temperature"], 0.0);
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_network_error() {
        let generator = HttpGenerator::new(
            "openai".to_string(),
            "http://127.0.0.1:9/v1/chat/completions".to_string(),
            "key".to_string(),
            "gpt-4o-mini".to_string(),
        )
        .unwrap()
        .with_retry_config(RetryConfig { max_retries: 0 });
        let err = generator
            .generate(&GenerationRequest::new("test", "hi", ""))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
