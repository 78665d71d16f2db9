//! Transport Layer
//!
//! This module owns the network exchange with the ad service:
//! - The [`Transport`] seam: one JSON POST, nothing else
//! - [`HttpTransport`], the `reqwest` implementation with a shared pool
//! - [`TransportClient`], which adds headers, status mapping, response
//!   validation, retries with backoff and the per-call deadline
//!
//! Retries re-send the identical payload. `Authentication` and `Validation`
//! failures are returned after the first attempt; `Network`, `Service` and
//! `RateLimit` failures are retried while budget and deadline allow.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

use crate::config::{
    ClientOptions, AD_ACK_ENDPOINT, AD_INJECTION_ENDPOINT, API_KEY_HEADER_NAME, SDK_HEADER_NAME,
    SDK_NAME, SDK_VERSION, SDK_VERSION_HEADER_NAME,
};
use crate::error::{AdSdkError, Result};
use crate::retry::RetryPolicy;
use crate::types::AdResponse;

const SNIPPET_LIMIT: usize = 200;
/// Deadline used when the configured timeout overflows the clock
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

/// Status and body of one HTTP exchange
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// First characters of the body, for error reports
    pub fn snippet(&self) -> Option<String> {
        if self.body.is_empty() {
            None
        } else {
            Some(self.body.chars().take(SNIPPET_LIMIT).collect())
        }
    }
}

/// One JSON POST against the ad service
///
/// Implementations report transport-level failures as
/// [`AdSdkError::Network`] and must not interpret HTTP status codes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        body: &Value,
        timeout: Duration,
    ) -> Result<RawResponse>;

    /// Release pooled connections; later posts fail with `ClientClosed`
    async fn close(&self) {}
}

/// `reqwest`-backed transport sharing one connection pool across calls
pub struct HttpTransport {
    client: RwLock<Option<Client>>,
}

impl HttpTransport {
    /// Build a pooled `reqwest` client with `timeout` as its default
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdSdkError::transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    /// Use a caller-configured `reqwest::Client` (proxies, TLS roots, ...)
    pub fn with_client(client: Client) -> Self {
        Self {
            client: RwLock::new(Some(client)),
        }
    }

    fn current_client(&self) -> Result<Client> {
        self.client
            .read()
            .map_err(|_| AdSdkError::transport("HTTP client lock poisoned"))?
            .clone()
            .ok_or(AdSdkError::ClientClosed)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        body: &Value,
        timeout: Duration,
    ) -> Result<RawResponse> {
        let client = self.current_client()?;

        let mut request = client.post(url).timeout(timeout).json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(RawResponse { status, body })
    }

    async fn close(&self) {
        if let Ok(mut client) = self.client.write() {
            client.take();
        }
    }
}

/// Map an HTTP reply to a parsed [`AdResponse`] or a typed error
pub fn map_response(raw: RawResponse) -> Result<AdResponse> {
    let status = raw.status;
    match status {
        200..=299 => {
            let payload: Value = serde_json::from_str(&raw.body).map_err(|_| AdSdkError::Service {
                message: "Invalid JSON response".to_string(),
                status_code: Some(status),
                response_snippet: raw.snippet(),
            })?;
            AdResponse::from_json(payload).map_err(|e| AdSdkError::Service {
                message: format!("Malformed response: {}", e),
                status_code: Some(status),
                response_snippet: raw.snippet(),
            })
        }
        401 | 403 => Err(AdSdkError::Authentication {
            message: "Authentication failed".to_string(),
            status_code: Some(status),
            response_snippet: raw.snippet(),
        }),
        429 => Err(AdSdkError::RateLimit {
            status_code: status,
            response_snippet: raw.snippet(),
        }),
        400..=499 => Err(AdSdkError::Validation {
            message: "Request rejected by server".to_string(),
            status_code: Some(status),
            response_snippet: raw.snippet(),
        }),
        500..=599 => Err(AdSdkError::Service {
            message: "Server error".to_string(),
            status_code: Some(status),
            response_snippet: raw.snippet(),
        }),
        _ => Err(AdSdkError::Service {
            message: format!("Unexpected status {}", status),
            status_code: Some(status),
            response_snippet: raw.snippet(),
        }),
    }
}

/// Executes ad requests and acknowledgments against one service endpoint
pub struct TransportClient {
    transport: Arc<dyn Transport>,
    api_key: String,
    injection_url: String,
    ack_url: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl TransportClient {
    /// Bind a transport to the endpoints and retry policy in `options`
    ///
    /// # Arguments
    /// * `transport` - Performs the actual POSTs
    /// * `api_key` - Already resolved API key sent on every request
    /// * `options` - Base URL, timeout and backoff settings
    pub fn new(transport: Arc<dyn Transport>, api_key: String, options: &ClientOptions) -> Self {
        Self {
            transport,
            api_key,
            injection_url: options.endpoint(AD_INJECTION_ENDPOINT),
            ack_url: options.endpoint(AD_ACK_ENDPOINT),
            timeout: options.timeout,
            retry: RetryPolicy::from_options(options),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (SDK_HEADER_NAME, SDK_NAME.to_string()),
            (SDK_VERSION_HEADER_NAME, SDK_VERSION.to_string()),
            (API_KEY_HEADER_NAME, self.api_key.clone()),
        ]
    }

    /// Send an ad request, retrying within one overall deadline
    pub async fn send_ad_request(&self, payload: &Value) -> Result<AdResponse> {
        let url = &self.injection_url;
        let headers = self.headers();
        let deadline = deadline_after(self.timeout);
        let mut attempt: u32 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(AdSdkError::timeout("request deadline exceeded"));
            }

            let outcome = match timeout(
                remaining,
                self.transport.post_json(url, &headers, payload, remaining),
            )
            .await
            {
                Ok(result) => result.and_then(map_response),
                Err(_) => Err(AdSdkError::timeout(format!(
                    "no response within {:?}",
                    self.timeout
                ))),
            };

            let error = match outcome {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            if error.is_timeout() && Instant::now() >= deadline {
                tracing::debug!(attempt = attempt + 1, "Ad request deadline exceeded");
                return Err(error);
            }
            if !error.is_retryable() || attempt >= self.retry.retries {
                return Err(error);
            }

            match self.retry.delay_within(attempt, deadline) {
                Some(delay) => {
                    tracing::debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying ad request"
                    );
                    sleep(delay).await;
                }
                None => {
                    return Err(AdSdkError::timeout(format!(
                        "request deadline exceeded before retry (last error: {})",
                        error
                    )));
                }
            }
            attempt += 1;
        }
    }

    /// Post an acknowledgment once; no retries
    pub async fn send_ack(&self, payload: &Value) -> Result<()> {
        let headers = self.headers();

        let raw = timeout(
            self.timeout,
            self.transport.post_json(&self.ack_url, &headers, payload, self.timeout),
        )
        .await
        .map_err(|_| AdSdkError::timeout("acknowledgment timed out"))??;

        if (200..300).contains(&raw.status) {
            Ok(())
        } else {
            Err(AdSdkError::Service {
                message: "Ad acknowledgment rejected".to_string(),
                status_code: Some(raw.status),
                response_snippet: raw.snippet(),
            })
        }
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transports shared by the unit tests of several modules.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub enum Step {
        Respond(RawResponse),
        Fail(AdSdkError),
        Hang(Duration),
    }

    /// Replays scripted steps; the last step repeats once the script runs out
    pub struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        last: Mutex<Option<Step>>,
        pub calls: AtomicUsize,
        pub ack_calls: AtomicUsize,
        pub ack_status: u16,
        pub bodies: Mutex<Vec<Value>>,
        pub headers: Mutex<Vec<Vec<(&'static str, String)>>>,
        pub closed: std::sync::atomic::AtomicBool,
    }

    impl ScriptedTransport {
        pub fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
                ack_calls: AtomicUsize::new(0),
                ack_status: 200,
                bodies: Mutex::new(Vec::new()),
                headers: Mutex::new(Vec::new()),
                closed: std::sync::atomic::AtomicBool::new(false),
            }
        }

        pub fn with_ack_status(mut self, status: u16) -> Self {
            self.ack_status = status;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn ack_calls(&self) -> usize {
            self.ack_calls.load(Ordering::SeqCst)
        }

        fn next_step(&self) -> Step {
            let mut steps = self.steps.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            match steps.pop_front() {
                Some(step) => {
                    *last = Some(step.replay());
                    step
                }
                None => last
                    .as_ref()
                    .map(Step::replay)
                    .unwrap_or_else(|| Step::Fail(AdSdkError::transport("script exhausted"))),
            }
        }
    }

    impl Step {
        fn replay(&self) -> Step {
            match self {
                Step::Respond(raw) => Step::Respond(raw.clone()),
                Step::Fail(error) => Step::Fail(error.clone()),
                Step::Hang(duration) => Step::Hang(*duration),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn post_json(
            &self,
            url: &str,
            headers: &[(&'static str, String)],
            body: &Value,
            _timeout: Duration,
        ) -> Result<RawResponse> {
            if url.ends_with(AD_ACK_ENDPOINT) {
                self.ack_calls.fetch_add(1, Ordering::SeqCst);
                self.bodies.lock().unwrap().push(body.clone());
                return Ok(RawResponse::new(self.ack_status, ""));
            }

            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies.lock().unwrap().push(body.clone());
            self.headers.lock().unwrap().push(headers.to_vec());

            match self.next_step() {
                Step::Respond(raw) => Ok(raw),
                Step::Fail(error) => Err(error),
                Step::Hang(duration) => {
                    sleep(duration).await;
                    Err(AdSdkError::transport("hung attempt finished"))
                }
            }
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    pub fn success_body(enhanced: &str) -> RawResponse {
        RawResponse::new(
            200,
            serde_json::json!({
                "ad_request_id": "req-1",
                "ad_response_id": "resp-1",
                "success": true,
                "execution_time_ms": 120.0,
                "aepi": {
                    "status": "ok",
                    "aepi_text": enhanced,
                    "checksum": "abc123",
                    "size_bytes": enhanced.len()
                },
                "tracking_url": "https://track.adstract.ai/c/abc",
                "tracking_identifier": "ADS-7731",
                "sponsored_label": "Sponsored",
                "product_name": "Adstract"
            })
            .to_string(),
        )
    }

    pub fn server_error() -> Step {
        Step::Respond(RawResponse::new(503, "upstream unavailable"))
    }
}
