//! Typed tool failures.

use serde::{Deserialize, Serialize};

use crate::job::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Unreachable,
    Timeout,
    Unauthorized,
    Forbidden,
    RateLimited,
    ServerError,
    /// Unexpected response shape or a request the remote rejected as invalid
    Protocol,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorKind::Unreachable => "unreachable",
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::Unauthorized => "unauthorized",
            ToolErrorKind::Forbidden => "forbidden",
            ToolErrorKind::RateLimited => "rate_limited",
            ToolErrorKind::ServerError => "server_error",
            ToolErrorKind::Protocol => "protocol",
        }
    }

    /// Classify an HTTP status from a tool's remote API.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ToolErrorKind::Unauthorized,
            403 => ToolErrorKind::Forbidden,
            408 | 504 => ToolErrorKind::Timeout,
            429 => ToolErrorKind::RateLimited,
            500..=599 => ToolErrorKind::ServerError,
            _ => ToolErrorKind::Protocol,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            ToolErrorKind::Unreachable => ErrorCode::ToolUnreachable,
            ToolErrorKind::Timeout => ErrorCode::ToolTimeout,
            ToolErrorKind::Unauthorized => ErrorCode::ToolUnauthorized,
            ToolErrorKind::Forbidden => ErrorCode::ToolForbidden,
            ToolErrorKind::RateLimited => ErrorCode::ToolRateLimited,
            ToolErrorKind::ServerError => ErrorCode::ToolServerError,
            ToolErrorKind::Protocol => ErrorCode::ToolProtocolError,
        }
    }

    /// Default actionable hint when the adapter has nothing more specific.
    pub fn default_hint(&self) -> &'static str {
        match self {
            ToolErrorKind::Unreachable => "Check network access to the tool's host",
            ToolErrorKind::Timeout => "The remote service is slow; try again later",
            ToolErrorKind::Unauthorized => "Reconnect the integration; its credentials were rejected",
            ToolErrorKind::Forbidden => "Grant the integration write access to the target repository",
            ToolErrorKind::RateLimited => "Wait for the rate limit window to reset before retrying",
            ToolErrorKind::ServerError => "The remote service failed; check its status page",
            ToolErrorKind::Protocol => "The remote response was not understood; check the adapter version",
        }
    }
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{tool} {operation} failed ({kind}): {message}")]
#[serde(rename_all = "camelCase")]
pub struct ToolError {
    pub tool: String,
    pub operation: String,
    pub kind: ToolErrorKind,
    pub message: String,
    pub hint: String,
}

impl ToolError {
    pub fn new(
        tool: impl Into<String>,
        operation: impl Into<String>,
        kind: ToolErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            operation: operation.into(),
            kind,
            message: message.into(),
            hint: kind.default_hint().to_string(),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    pub fn from_status(
        tool: impl Into<String>,
        operation: impl Into<String>,
        status: u16,
        body: &str,
    ) -> Self {
        Self::new(
            tool,
            operation,
            ToolErrorKind::from_status(status),
            format!("HTTP {}: {}", status, body),
        )
    }

    pub fn error_code(&self) -> ErrorCode {
        self.kind.error_code()
    }
}
