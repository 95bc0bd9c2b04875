//! Configuration management for agentjobs.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `DATA_DIR` - Optional. Where the SQLite store lives. Defaults to `./.agentjobs`.
//! - `JOB_STORE` - Optional. `memory` or `sqlite`. Defaults to `sqlite`.
//! - `STALE_JOB_MINUTES` - Optional. Running jobs idle this long are failed. Defaults to `30`.
//! - `WATCHDOG_INTERVAL_SECS` - Optional. Stale-job sweep interval. Defaults to `60`.
//! - `TRACE_FLUSH_INTERVAL_MS` - Optional. Periodic trace flush. Defaults to `2000`.
//! - `TRACE_FLUSH_BATCH` - Optional. Buffered rows that force a flush. Defaults to `50`.
//! - `TRACE_MAX_DETAIL_BYTES` - Optional. Detail payload cap. Defaults to `4096`.
//! - `TRACE_MAX_PREVIEW_CHARS` - Optional. Artifact preview cap. Defaults to `2000`.
//! - `TRACE_MAX_DIFF_CHARS` - Optional. Artifact diff cap. Defaults to `4000`.
//! - `LLM_API_URL` - Optional. Chat completions endpoint. Defaults to OpenAI's.
//! - `LLM_API_KEY` - Optional. Without it every generation call fails.
//! - `LLM_MODEL` - Optional. Defaults to `gpt-4o-mini`.
//! - `LLM_PROVIDER` - Optional. Provider label for AI-call rows. Defaults to `openai`.
//! - `REQUIRE_PLAN_APPROVAL` - Optional. Default approval policy for plans. Defaults to `false`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::store::JobStoreType;
use crate::util::{env_var_bool, env_var_nonempty};

const DEFAULT_LLM_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Directory for the SQLite database
    pub data_dir: PathBuf,
    pub job_store: JobStoreType,

    pub stale_job_minutes: u64,
    pub watchdog_interval_secs: u64,

    pub trace_flush_interval_ms: u64,
    pub trace_flush_batch: usize,
    pub trace_max_detail_bytes: usize,
    pub trace_max_preview_chars: usize,
    pub trace_max_diff_chars: usize,
    pub trace_max_summary_chars: usize,

    pub llm_api_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_provider: String,

    /// Plans need approval unless the payload says otherwise
    pub require_plan_approval: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable does not parse
    /// or `JOB_STORE` names an unknown backend.
    pub fn from_env() -> Result<Self, ConfigError> {
        let job_store = match env_var_nonempty("JOB_STORE") {
            Some(value) => JobStoreType::parse(&value).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "JOB_STORE".to_string(),
                    format!("'{}' (expected 'memory' or 'sqlite')", value),
                )
            })?,
            None => JobStoreType::default(),
        };

        Ok(Self {
            host: env_var_nonempty("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_env("PORT", 3000)?,
            data_dir: env_var_nonempty("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./.agentjobs")),
            job_store,
            stale_job_minutes: parse_env("STALE_JOB_MINUTES", 30)?,
            watchdog_interval_secs: parse_env("WATCHDOG_INTERVAL_SECS", 60)?,
            trace_flush_interval_ms: parse_env("TRACE_FLUSH_INTERVAL_MS", 2000)?,
            trace_flush_batch: parse_env("TRACE_FLUSH_BATCH", 50)?,
            trace_max_detail_bytes: parse_env("TRACE_MAX_DETAIL_BYTES", 4096)?,
            trace_max_preview_chars: parse_env("TRACE_MAX_PREVIEW_CHARS", 2000)?,
            trace_max_diff_chars: parse_env("TRACE_MAX_DIFF_CHARS", 4000)?,
            trace_max_summary_chars: parse_env("TRACE_MAX_SUMMARY_CHARS", 1000)?,
            llm_api_url: env_var_nonempty("LLM_API_URL")
                .unwrap_or_else(|| DEFAULT_LLM_API_URL.to_string()),
            llm_api_key: env_var_nonempty("LLM_API_KEY"),
            llm_model: env_var_nonempty("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            llm_provider: env_var_nonempty("LLM_PROVIDER").unwrap_or_else(|| "openai".to_string()),
            require_plan_approval: env_var_bool("REQUIRE_PLAN_APPROVAL", false),
        })
    }

    /// In-memory configuration with defaults (useful for testing).
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            data_dir: std::env::temp_dir().join("agentjobs-tests"),
            job_store: JobStoreType::Memory,
            stale_job_minutes: 30,
            watchdog_interval_secs: 60,
            trace_flush_interval_ms: 50,
            trace_flush_batch: 50,
            trace_max_detail_bytes: 4096,
            trace_max_preview_chars: 2000,
            trace_max_diff_chars: 4000,
            trace_max_summary_chars: 1000,
            llm_api_url: DEFAULT_LLM_API_URL.to_string(),
            llm_api_key: None,
            llm_model: "gpt-4o-mini".to_string(),
            llm_provider: "openai".to_string(),
            require_plan_approval: false,
        }
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_job_minutes.saturating_mul(60))
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs.max(1))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.trace_flush_interval_ms.max(1))
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var_nonempty(name) {
        Some(value) => value
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{}': {}", value, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_variable_uses_default() {
        let value: u64 = parse_env("AGENTJOBS_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn invalid_number_is_rejected() {
        std::env::set_var("AGENTJOBS_TEST_BAD_NUMBER", "soon");
        let err = parse_env::<u64>("AGENTJOBS_TEST_BAD_NUMBER", 1).unwrap_err();
        assert!(err.to_string().contains("AGENTJOBS_TEST_BAD_NUMBER"));
        std::env::remove_var("AGENTJOBS_TEST_BAD_NUMBER");
    }

    #[test]
    fn test_config_is_in_memory_without_provider() {
        let config = Config::for_tests();
        assert_eq!(config.job_store, JobStoreType::Memory);
        assert!(config.llm_api_key.is_none());
        assert_eq!(config.stale_threshold(), Duration::from_secs(30 * 60));
    }
}
