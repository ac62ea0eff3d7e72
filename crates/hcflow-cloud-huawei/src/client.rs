//! Huawei Cloud REST client
//!
//! Direct API implementation: every request carries the `X-Auth-Token` header
//! and error bodies are decoded into [`HuaweiError::ApiError`].

use crate::config::ProviderConfig;
use crate::error::{HuaweiError, Result};
use hcflow_cloud::{RetryConfig, StateChangeConf};
use reqwest::Method;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;

const AUTH_HEADER: &str = "X-Auth-Token";

/// Shared client injected into every resource
///
/// Cloning is cheap: the HTTP connection pool and the provider settings are
/// shared.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    config: Arc<ProviderConfig>,
    retry: RetryConfig,
    poll_override: Option<Duration>,
}

impl Client {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let retry = RetryConfig {
            max_attempts: config.max_retries,
            ..RetryConfig::default()
        };
        Ok(Self {
            http: reqwest::Client::new(),
            config: Arc::new(config),
            retry,
            poll_override: None,
        })
    }

    /// Create a client from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(ProviderConfig::from_env()?)
    }

    /// Backoff used for retried requests and busy-instance retries
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the delay and interval of every state wait.
    /// Used against mock endpoints, where the real cadence is pointless.
    pub fn with_poll_override(mut self, interval: Duration) -> Self {
        self.poll_override = Some(interval);
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn project_id(&self) -> &str {
        &self.config.project_id
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Client bound to one service endpoint
    pub fn service(&self, service: &str) -> ServiceClient<'_> {
        ServiceClient {
            client: self,
            base_url: self.config.endpoint(service),
        }
    }

    /// Apply the poll override, if any, to a wait configuration
    pub fn state_change(&self, conf: StateChangeConf) -> StateChangeConf {
        match self.poll_override {
            Some(interval) => conf.delay(interval).poll_interval(interval),
            None => conf,
        }
    }
}

/// Requests against a single service endpoint
pub struct ServiceClient<'a> {
    client: &'a Client,
    base_url: String,
}

impl ServiceClient<'_> {
    /// GET with retries on throttling, server errors and transport failures
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let retry = &self.client.retry;
        let mut attempt = 0u32;
        loop {
            match self.send::<(), T>(Method::GET, path, None).await {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && attempt < retry.max_attempts => {
                    let delay = retry.delay_for_attempt(attempt);
                    tracing::debug!(
                        path,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send(Method::POST, path, Some(body)).await
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send(Method::PUT, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send::<(), T>(Method::DELETE, path, None).await
    }

    async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%method, %url, "Sending request");

        let mut request = self
            .client
            .http
            .request(method.clone(), &url)
            .header(AUTH_HEADER, &self.client.config.auth_token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let error = decode_error(status.as_u16(), &text);
            tracing::debug!(%method, %url, error = %error, "Request failed");
            return Err(error);
        }

        // Some endpoints answer with an empty body
        let text = if text.trim().is_empty() { "null" } else { &text };
        Ok(serde_json::from_str(text)?)
    }
}

fn is_transient(error: &HuaweiError) -> bool {
    match error {
        HuaweiError::ApiError { status, .. } => *status == 429 || *status >= 500,
        HuaweiError::HttpError(e) => e.is_connect() || e.is_timeout(),
        _ => false,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Flat { error_code: String, error_msg: String },
    Nested { error: ErrorDetail },
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

fn decode_error(status: u16, body: &str) -> HuaweiError {
    let (code, message) = match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody::Flat {
            error_code,
            error_msg,
        }) => (error_code, error_msg),
        Ok(ErrorBody::Nested { error }) => (error.code, error.message),
        Err(_) => (String::new(), body.trim().to_string()),
    };
    HuaweiError::ApiError {
        status,
        code,
        message,
    }
}
