//! Generation error types with retry classification.
//!
//! Distinguishes between transient errors (worth retrying the same request)
//! and permanent ones.

use std::time::Duration;

/// Error from a generation call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    pub message: String,
    /// Suggested retry delay from a Retry-After header
    pub retry_after: Option<Duration>,
}

impl GenerationError {
    fn with_kind(kind: GenerationErrorKind, status_code: Option<u16>, message: String) -> Self {
        Self {
            kind,
            status_code,
            message,
            retry_after: None,
        }
    }

    pub fn rate_limited(message: String, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::with_kind(GenerationErrorKind::RateLimited, Some(429), message)
        }
    }

    pub fn server_error(status_code: u16, message: String) -> Self {
        Self::with_kind(GenerationErrorKind::ServerError, Some(status_code), message)
    }

    pub fn client_error(status_code: u16, message: String) -> Self {
        Self::with_kind(GenerationErrorKind::ClientError, Some(status_code), message)
    }

    pub fn network_error(message: String) -> Self {
        Self::with_kind(GenerationErrorKind::NetworkError, None, message)
    }

    pub fn parse_error(message: String) -> Self {
        Self::with_kind(GenerationErrorKind::ParseError, None, message)
    }

    pub fn not_configured(message: String) -> Self {
        Self::with_kind(GenerationErrorKind::NotConfigured, None, message)
    }

    /// Build from a non-success HTTP response.
    pub fn from_status(status_code: u16, body: &str, retry_after: Option<Duration>) -> Self {
        match classify_http_status(status_code) {
            GenerationErrorKind::RateLimited => Self::rate_limited(body.to_string(), retry_after),
            GenerationErrorKind::ClientError => Self::client_error(status_code, body.to_string()),
            _ => Self::server_error(status_code, body.to_string()),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Delay before retry `attempt` (0-based): the server's Retry-After if
    /// given, else exponential backoff capped at 30 seconds.
    pub fn suggested_delay(&self, attempt: u32) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after;
        }
        let base_ms: u64 = match self.kind {
            GenerationErrorKind::RateLimited => 2_000,
            GenerationErrorKind::ServerError => 1_000,
            _ => 500,
        };
        let delay = base_ms.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay.min(30_000))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// 429, transient
    RateLimited,
    /// 5xx, transient
    ServerError,
    /// 4xx other than 429, permanent
    ClientError,
    /// Connection failure or timeout, transient
    NetworkError,
    /// Response body not understood, permanent
    ParseError,
    /// No provider credentials, permanent
    NotConfigured,
}

impl GenerationErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GenerationErrorKind::RateLimited
                | GenerationErrorKind::ServerError
                | GenerationErrorKind::NetworkError
        )
    }
}

impl std::fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationErrorKind::RateLimited => write!(f, "Rate limited"),
            GenerationErrorKind::ServerError => write!(f, "Server error"),
            GenerationErrorKind::ClientError => write!(f, "Client error"),
            GenerationErrorKind::NetworkError => write!(f, "Network error"),
            GenerationErrorKind::ParseError => write!(f, "Parse error"),
            GenerationErrorKind::NotConfigured => write!(f, "Not configured"),
        }
    }
}

/// Transport-level retry policy. Separate from the contract retry loop,
/// which re-asks for content rather than re-sending a failed request.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

impl RetryConfig {
    pub fn should_retry(&self, error: &GenerationError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_transient()
    }
}

pub fn classify_http_status(status: u16) -> GenerationErrorKind {
    match status {
        429 => GenerationErrorKind::RateLimited,
        400..=499 => GenerationErrorKind::ClientError,
        _ => GenerationErrorKind::ServerError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(GenerationErrorKind::RateLimited.is_transient());
        assert!(GenerationErrorKind::NetworkError.is_transient());
        assert!(!GenerationErrorKind::ClientError.is_transient());
        assert!(!GenerationErrorKind::NotConfigured.is_transient());
    }

    #[test]
    fn http_status_classification() {
        assert_eq!(classify_http_status(429), GenerationErrorKind::RateLimited);
        assert_eq!(classify_http_status(503), GenerationErrorKind::ServerError);
        assert_eq!(classify_http_status(401), GenerationErrorKind::ClientError);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let error = GenerationError::server_error(502, "bad gateway".to_string());
        assert!(error.suggested_delay(1) > error.suggested_delay(0));
        assert_eq!(error.suggested_delay(20), Duration::from_secs(30));

        let limited = GenerationError::rate_limited("slow down".to_string(), Some(Duration::from_secs(7)));
        assert_eq!(limited.suggested_delay(3), Duration::from_secs(7));
    }

    #[test]
    fn retry_policy_respects_budget_and_kind() {
        let policy = RetryConfig::default();
        let transient = GenerationError::network_error("reset".to_string());
        let permanent = GenerationError::client_error(400, "bad".to_string());
        assert!(policy.should_retry(&transient, 0));
        assert!(!policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&permanent, 0));
    }
}
