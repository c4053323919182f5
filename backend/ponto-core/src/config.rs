// src/config.rs

use serde::Deserialize;
use std::time::Duration;

use crate::error::{PontoError, PontoResult};
use crate::fetch::RetryPolicy;

pub const ENV_PREFIX: &str = "PONTO_";
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api";
pub const DEFAULT_TIMEOUT_MS: u64 = 12_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 600;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_backoff_base_ms() -> u64 {
    DEFAULT_BACKOFF_BASE_MS
}
fn default_refresh_interval_secs() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

/// Engine settings, read from `PONTO_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    pub employee_id: Option<String>,
    pub company_id: Option<String>,
    pub token: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            employee_id: None,
            company_id: None,
            token: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> PontoResult<Self> {
        let config = envy::prefixed(ENV_PREFIX).from_env::<EngineConfig>()?;
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            timeout: Duration::from_millis(self.timeout_ms),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    /// The logged-in identity the engine works on behalf of.
    pub fn session(&self) -> PontoResult<SessionContext> {
        let employee_id = self
            .employee_id
            .clone()
            .ok_or_else(|| PontoError::MissingEnvVar(format!("{}EMPLOYEE_ID", ENV_PREFIX)))?;
        let company_id = self
            .company_id
            .clone()
            .ok_or_else(|| PontoError::MissingEnvVar(format!("{}COMPANY_ID", ENV_PREFIX)))?;
        Ok(SessionContext {
            employee_id,
            company_id,
            token: self.token.clone(),
        })
    }
}

/// Session values passed into the engine instead of read from local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub employee_id: String,
    pub company_id: String,
    pub token: Option<String>,
}

impl SessionContext {
    pub fn new(employee_id: impl Into<String>, company_id: impl Into<String>) -> Self {
        Self {
            employee_id: employee_id.into(),
            company_id: company_id.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fetch_contract() {
        let config = EngineConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.timeout, Duration::from_millis(12_000));
        assert_eq!(policy.backoff_base, Duration::from_millis(600));
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
    }

    #[test]
    fn envy_reads_prefixed_values_with_defaults() {
        let vars = vec![
            ("PONTO_EMPLOYEE_ID".to_string(), "42".to_string()),
            ("PONTO_COMPANY_ID".to_string(), "7".to_string()),
            ("PONTO_MAX_ATTEMPTS".to_string(), "2".to_string()),
        ];
        let config: EngineConfig = envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .expect("config should deserialize");
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        let session = config.session().unwrap();
        assert_eq!(session, SessionContext::new("42", "7"));
    }

    #[test]
    fn missing_employee_is_reported() {
        let config = EngineConfig::default();
        match config.session() {
            Err(PontoError::MissingEnvVar(name)) => assert_eq!(name, "PONTO_EMPLOYEE_ID"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
