// src/fetch.rs

use rand::Rng;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};
use url::Url;

use crate::error::FetchError;

pub const DEFAULT_RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Jitter bounds applied to every backoff delay.
const JITTER_MIN: f64 = 0.75;
const JITTER_MAX: f64 = 1.25;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub backoff_base: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            timeout: Duration::from_millis(12_000),
            backoff_base: Duration::from_millis(600),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retryable_statuses.contains(&status.as_u16())
    }

    /// Timeouts and transport failures are retried; so are the listed statuses.
    pub fn is_retryable(&self, err: &FetchError) -> bool {
        match err {
            FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => self.is_retryable_status(*status),
            FetchError::Request(e) => match e.status() {
                Some(status) => self.is_retryable_status(status),
                None => !e.is_builder() && !e.is_decode(),
            },
            FetchError::Json(_) | FetchError::UrlParse(_) => false,
        }
    }

    /// `backoff_base * 2^(attempt-1) * factor`, attempt counted from 1.
    pub fn backoff_delay_with(&self, attempt: u32, factor: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base_ms = self.backoff_base.as_millis() as f64;
        let millis = base_ms * f64::from(1u32 << exponent) * factor;
        Duration::from_millis(millis.max(0.0).round() as u64)
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
        self.backoff_delay_with(attempt, factor)
    }
}

/// HTTP client shared by every portal read and write.
#[derive(Clone)]
pub struct FetchClient {
    http_client: Client,
    base_url: String,
    token: Option<String>,
    policy: RetryPolicy,
}

impl FetchClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        policy: RetryPolicy,
    ) -> Result<Self, FetchError> {
        // Per-attempt timeouts are enforced in `attempt_once`.
        let http_client = Client::builder().build()?;
        Url::parse(base_url)?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            policy,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, FetchError> {
        let url = if endpoint.starts_with("http") {
            endpoint.to_string()
        } else if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        };
        Ok(Url::parse(&url)?)
    }

    fn build_request(
        &self,
        method: Method,
        url: &Url,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> RequestBuilder {
        let mut builder = self
            .http_client
            .request(method, url.clone())
            .header(ACCEPT, "application/json");
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.header(CONTENT_TYPE, "application/json").json(body);
        }
        builder
    }

    /// Sends one request with the retry policy. `Ok(None)` means an empty body.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        context_msg: &str,
    ) -> Result<Option<Value>, FetchError> {
        let url = self.endpoint_url(endpoint)?;
        let mut attempt: u32 = 1;

        loop {
            let request = self.build_request(method.clone(), &url, query, body);
            debug!(
                "Sending request for '{}' to URL: {} (attempt {}/{})",
                context_msg, url, attempt, self.policy.max_attempts
            );

            let err = match self.attempt_once(request).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !self.policy.is_retryable(&err) {
                error!("Request for '{}' failed without retry: {}", context_msg, err);
                return Err(err);
            }
            if attempt >= self.policy.max_attempts {
                error!(
                    "Request for '{}' failed after {} attempts: {}",
                    context_msg, attempt, err
                );
                return Err(err);
            }

            let delay = self.policy.backoff_delay(attempt);
            warn!(
                "Attempt {} for '{}' failed ({}). Retrying in {} ms",
                attempt,
                context_msg,
                err,
                delay.as_millis()
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt_once(&self, request: RequestBuilder) -> Result<Option<Value>, FetchError> {
        let limit = self.policy.timeout;
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, FetchError>((status, text))
        };

        let (status, text) = match timeout(limit, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchError::Timeout {
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        };

        if !status.is_success() {
            return Err(FetchError::Status { status, body: text });
        }

        debug!("Received response: Status={}", status);
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    pub async fn get(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        context_msg: &str,
    ) -> Result<Option<Value>, FetchError> {
        self.request(Method::GET, endpoint, query, None, context_msg)
            .await
    }

    pub async fn post(
        &self,
        endpoint: &str,
        body: &Value,
        context_msg: &str,
    ) -> Result<Option<Value>, FetchError> {
        self.request(Method::POST, endpoint, &[], Some(body), context_msg)
            .await
    }
}
