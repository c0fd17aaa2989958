//! Shared HTTP plumbing for the upstream vendor APIs.
//!
//! Every wrapper in [`crate::endpoints`] owns one `ApiClient` configured for
//! its service. Requests are described by a [`Call`]; failures the error type
//! reports as transient (timeouts, connection drops, 429, 5xx) are retried
//! with capped exponential [`Backoff`].

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use soulo_core::constants;
use soulo_core::error::{SouloError, SouloResult};

use crate::response::extract_error_message;

/// Retry schedule: `base`, `2 * base`, `4 * base`, ... capped at `cap`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub const NONE: Backoff = Backoff {
        retries: 0,
        base: Duration::ZERO,
        cap: Duration::ZERO,
    };

    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        self.base.saturating_mul(1u32 << retry.min(16)).min(self.cap)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            retries: 3,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(4),
        }
    }
}

/// One request against an [`ApiClient`].
#[derive(Debug, Clone)]
pub struct Call<'a> {
    method: Method,
    path: &'a str,
    body: Option<&'a serde_json::Value>,
    headers: Vec<(&'a str, &'a str)>,
    extended: bool,
}

impl<'a> Call<'a> {
    pub fn new(method: Method, path: &'a str) -> Self {
        Self {
            method,
            path,
            body: None,
            headers: Vec::new(),
            extended: false,
        }
    }

    pub fn json(mut self, body: &'a serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, key: &'a str, value: &'a str) -> Self {
        self.headers.push((key, value));
        self
    }

    /// Use the long timeout (completions, uploads).
    pub fn extended(mut self) -> Self {
        self.extended = true;
        self
    }
}

/// HTTP client bound to one upstream service.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    /// "backend", "llm", "speech" or "sentiment"; used in errors and logs.
    service: &'static str,
    base_url: String,
    headers: Vec<(String, String)>,
    /// Appended to every URL (Google-style `key=`).
    query: Vec<(String, String)>,
    timeout: Duration,
    backoff: Backoff,
}

impl ApiClient {
    pub fn new(service: &'static str, base_url: &str, timeout_ms: u64) -> SouloResult<Self> {
        let base_url = soulo_core::AppConfig::sanitize_url(base_url);
        if base_url.is_empty() {
            return Err(SouloError::MissingConfig(format!("{service} base url")));
        }

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| SouloError::Http(format!("{service}: cannot build client: {e}")))?;

        Ok(Self {
            http,
            service,
            base_url,
            headers: Vec::new(),
            query: Vec::new(),
            timeout: Duration::from_millis(timeout_ms.max(1)),
            backoff: Backoff::default(),
        })
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    /// `Authorization: Bearer <token>`, skipped for an empty token.
    pub fn with_bearer(self, token: &str) -> Self {
        if token.is_empty() {
            return self;
        }
        let value = format!("Bearer {token}");
        self.with_header("Authorization", &value)
    }

    pub fn with_query_param(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn timeout_for(&self, extended: bool) -> Duration {
        if extended {
            self.timeout.saturating_mul(constants::EXTENDED_TIMEOUT_MULTIPLIER as u32)
        } else {
            self.timeout
        }
    }

    fn prepare(&self, builder: RequestBuilder, extra: &[(&str, &str)]) -> RequestBuilder {
        let builder = self
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(extra.iter().copied())
            .fold(builder, |b, (k, v)| b.header(k, v));
        if self.query.is_empty() {
            builder
        } else {
            builder.query(&self.query)
        }
    }

    async fn send_once(&self, call: &Call<'_>) -> SouloResult<Response> {
        let mut builder = self
            .http
            .request(call.method.clone(), self.url(call.path))
            .timeout(self.timeout_for(call.extended));
        if let Some(body) = call.body {
            builder = builder.json(body);
        }
        let response = self
            .prepare(builder, &call.headers)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.check_status(response).await
    }

    /// Send `call`, retrying transient failures per the client's [`Backoff`].
    pub async fn send(&self, call: Call<'_>) -> SouloResult<Response> {
        debug!(service = self.service, method = %call.method, path = call.path, "upstream request");
        let mut retry = 0;
        loop {
            match self.send_once(&call).await {
                Err(err) if err.is_transient() && retry < self.backoff.retries => {
                    let delay = self.backoff.delay(retry);
                    retry += 1;
                    warn!(
                        service = self.service,
                        path = call.path,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        "transient upstream failure: {err}"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    /// Multipart bodies are single-use, so this path never retries.
    pub async fn post_multipart(&self, path: &str, form: reqwest::multipart::Form) -> SouloResult<Response> {
        debug!(service = self.service, path, "upstream multipart upload");
        let builder = self
            .http
            .post(self.url(path))
            .multipart(form)
            .timeout(self.timeout_for(true));
        let response = self
            .prepare(builder, &[])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.check_status(response).await
    }

    pub async fn parse_json<T: DeserializeOwned>(&self, response: Response) -> SouloResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| SouloError::Serialization(format!("{} response: {e}", self.service)))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SouloResult<T> {
        let resp = self.send(Call::new(Method::GET, path)).await?;
        self.parse_json(resp).await
    }

    pub async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &serde_json::Value) -> SouloResult<T> {
        let resp = self.send(Call::new(Method::POST, path).json(body)).await?;
        self.parse_json(resp).await
    }

    /// POST with the long timeout, for chat completions.
    pub async fn post_extended_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> SouloResult<T> {
        let resp = self.send(Call::new(Method::POST, path).json(body).extended()).await?;
        self.parse_json(resp).await
    }

    async fn check_status(&self, response: Response) -> SouloResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(self.status_error(status, &body))
    }

    /// Map a non-success status and its body to an error.
    pub fn status_error(&self, status: StatusCode, body: &str) -> SouloError {
        let service = self.service;
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                SouloError::AuthFailed(format!("{service} returned {status}: {}", extract_error_message(body)))
            }
            StatusCode::TOO_MANY_REQUESTS => SouloError::RateLimited(service.to_string()),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                SouloError::Timeout(format!("{service} returned {status}"))
            }
            _ => SouloError::Api {
                service: service.to_string(),
                status: status.as_u16(),
                message: extract_error_message(body),
            },
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> SouloError {
        if e.is_timeout() {
            SouloError::Timeout(format!("{}: {e}", self.service))
        } else if e.is_connect() {
            SouloError::Http(format!("connection to {} failed: {e}", self.service))
        } else {
            SouloError::Http(format!("{}: {e}", self.service))
        }
    }
}
