//! Shared HTTP plumbing for the service clients.
//!
//! Every client issues GETs through [`ServiceHttpClient`], which applies the
//! service's timeout, API key, rate limit and bounded retry policy.

use crate::domain::{ApiKeyPlacement, PipelineError, ServiceKind, ServiceSettings};
use crate::infrastructure::rate_limiter::RateLimiter;
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; finance-data-pipeline/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Longest error body kept in an `Api` error message.
const MAX_ERROR_BODY: usize = 300;

#[derive(Clone)]
pub struct ServiceHttpClient {
    client: Client,
    settings: ServiceSettings,
    limiter: RateLimiter,
}

impl ServiceHttpClient {
    pub fn new(settings: ServiceSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .with_context(|| format!("Failed to create HTTP client for {}", settings.kind))?;
        let limiter = RateLimiter::new(settings.kind.as_str(), settings.requests_per_minute);

        Ok(Self {
            client,
            settings,
            limiter,
        })
    }

    pub fn kind(&self) -> ServiceKind {
        self.settings.kind
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url, path)
    }

    /// The API key, failing fast when the service needs one and none is set.
    fn api_key(&self) -> Result<Option<&str>> {
        let kind = self.settings.kind;
        match (&self.settings.api_key, kind.api_key_required()) {
            (Some(key), _) => Ok(Some(key.as_str())),
            (None, false) => Ok(None),
            (None, true) => Err(PipelineError::configuration(format!(
                "{} requires an API key; set {}",
                kind.display_name(),
                kind.api_key_env().unwrap_or("the API key variable")
            ))
            .with_context("service", kind.as_str())
            .into()),
        }
    }

    /// GET `path` with query parameters and parse the body as JSON.
    ///
    /// Connection failures, timeouts, 429 and 5xx responses are retried with
    /// exponential backoff; anything else fails on the first attempt.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let api_key = self.api_key()?;
        let url = self.url(path);
        let kind = self.settings.kind;

        let mut params: Vec<(&str, &str)> = query.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let mut header = None;
        match (kind.api_key_placement(), api_key) {
            (Some(ApiKeyPlacement::Query(name)), Some(key)) => params.push((name, key)),
            (Some(ApiKeyPlacement::Header(name)), Some(key)) => header = Some((name, key)),
            _ => {}
        }

        debug!("Fetching from {}: {} {:?}", kind.display_name(), url, query);

        let retry_strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.settings.max_retries);

        RetryIf::spawn(
            retry_strategy,
            || async {
                self.limiter.acquire().await;

                let mut request = self
                    .client
                    .get(&url)
                    .header("Accept", "application/json")
                    .query(&params);
                if let Some((name, key)) = header {
                    request = request.header(name, key);
                }

                let response = request
                    .send()
                    .await
                    .with_context(|| format!("Failed to fetch from {}", url))?;

                let status = response.status();
                if !status.is_success() {
                    let body: String = response
                        .text()
                        .await
                        .unwrap_or_default()
                        .chars()
                        .take(MAX_ERROR_BODY)
                        .collect();
                    return Err(PipelineError::api(kind.as_str(), status.as_u16(), body).into());
                }

                metrics::counter!("api_requests_total", "service" => kind.as_str()).increment(1);

                response
                    .json::<Value>()
                    .await
                    .with_context(|| format!("Failed to parse JSON from {}", url))
            },
            |e: &anyhow::Error| {
                let retry = is_retryable(e);
                if retry {
                    warn!("Retrying {} request after error: {:#}", kind.display_name(), e);
                }
                retry
            },
        )
        .await
    }
}

/// Transport failures and retryable statuses are worth another attempt.
fn is_retryable(error: &anyhow::Error) -> bool {
    if let Some(pipeline) = error.downcast_ref::<PipelineError>() {
        return pipeline.is_retryable();
    }
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
        .any(|e| e.is_timeout() || e.is_connect() || (e.is_request() && !e.is_decode()))
}
