//! Request Orchestration
//!
//! [`AdClient`] composes the remote pipeline:
//! validate required parameters → build conversation context → derive client
//! metadata → send with retries → interpret the reply.
//!
//! Every public request method runs the same core routine. The raising form
//! returns errors unchanged; the non-raising form folds them into an
//! [`EnhancementResult`] carrying the caller's original prompt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::ack::{build_ad_ack, build_error_ack, AdAck, AdStatus};
use crate::config::ClientOptions;
use crate::context::build_conversation;
use crate::error::{AdSdkError, Result};
use crate::transport::{HttpTransport, Transport, TransportClient};
use crate::types::{
    AdRequest, AdRequestConfiguration, AdResponse, Conversation, EnhancementResult, WrappingType,
};
use crate::user_agent::build_metadata;
use crate::validation::validate_required;

struct ClientInner {
    transport: TransportClient,
    wrapping_type: WrappingType,
    closed: AtomicBool,
    cancel: CancellationToken,
    /// Held shared by every call; `close` takes it exclusively to drain them
    in_flight: RwLock<()>,
}

/// Non-blocking ad enhancement client
///
/// Cloning is cheap and clones share one connection pool and one lifecycle:
/// closing any clone closes them all.
#[derive(Clone)]
pub struct AdClient {
    inner: Arc<ClientInner>,
}

impl AdClient {
    /// Create a client backed by `reqwest`
    ///
    /// # Errors
    /// `Authentication` when no usable API key is configured, `Network` when
    /// the HTTP client cannot be built.
    pub fn new(options: ClientOptions) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(options.timeout)?);
        Self::with_transport(options, transport)
    }

    /// Create a client from `ADSTRACT_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(ClientOptions::from_env())
    }

    /// Create a client over a custom transport
    pub fn with_transport(options: ClientOptions, transport: Arc<dyn Transport>) -> Result<Self> {
        let api_key = options.resolve_api_key()?;
        let transport = TransportClient::new(transport, api_key, &options);

        tracing::debug!(
            base_url = %options.base_url,
            retries = transport.retry_policy().retries,
            timeout_ms = options.timeout.as_millis() as u64,
            "Ad client initialized"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                transport,
                wrapping_type: options.wrapping_type,
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                in_flight: RwLock::new(()),
            }),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Enhance `prompt` with an ad, returning any failure as an error
    ///
    /// On success the result holds the enhanced prompt, the conversation the
    /// request was sent under and the parsed service reply.
    pub async fn request_ad(
        &self,
        prompt: &str,
        config: &AdRequestConfiguration,
    ) -> Result<EnhancementResult> {
        let mut result = self.enhance(prompt, config).await;
        match result.error.take() {
            Some(error) => Err(error),
            None => Ok(result),
        }
    }

    /// Enhance `prompt` with an ad, falling back to the original prompt
    ///
    /// Never fails: on any error the result carries `prompt` verbatim with
    /// `success == false` and the cause in `error`.
    pub async fn request_ad_or_default(
        &self,
        prompt: &str,
        config: &AdRequestConfiguration,
    ) -> EnhancementResult {
        self.enhance(prompt, config).await
    }

    /// Report how the served ad surfaced in the LLM's answer
    ///
    /// Best-effort: results without a served ad are skipped. A failed local
    /// analysis, or a failed send of the regular acknowledgment, is reported
    /// once more as an error acknowledgment. Send failures are logged and
    /// dropped.
    pub async fn analyse_and_report(&self, result: &EnhancementResult, llm_response: &str) {
        let _in_flight = self.inner.in_flight.read().await;
        if self.is_closed() {
            tracing::debug!("Skipping ad acknowledgment on closed client");
            return;
        }
        if !result.success {
            tracing::debug!("Skipping ad acknowledgment for unenhanced result");
            return;
        }

        let ack = match build_ad_ack(result, llm_response, self.inner.wrapping_type) {
            Ok(ack) => ack,
            Err(error) => {
                tracing::error!(error = %error, "Ad response analysis failed");
                build_error_ack(result, llm_response, &error)
            }
        };

        let error = match self.send_ack(&ack).await {
            Ok(()) => return,
            Err(error) => error,
        };
        tracing::warn!(error = %error, ad_status = ?ack.ad_status, "Failed to send ad acknowledgment");
        if ack.ad_status == AdStatus::Error || error == AdSdkError::ClientClosed {
            return;
        }

        let error_ack = build_error_ack(result, llm_response, &error);
        if let Err(error) = self.send_ack(&error_ack).await {
            tracing::warn!(error = %error, "Failed to send error acknowledgment");
        }
    }

    async fn send_ack(&self, ack: &AdAck) -> Result<()> {
        let payload = serde_json::to_value(ack)
            .map_err(|e| AdSdkError::validation(format!("Failed to serialize acknowledgment: {}", e)))?;

        let sent = tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(AdSdkError::ClientClosed),
            sent = self.inner.transport.send_ack(&payload) => sent,
        };
        sent?;
        tracing::debug!(ad_status = ?ack.ad_status, "Ad acknowledgment sent");
        Ok(())
    }

    /// Shut the client down
    ///
    /// Cancels in-flight calls (they finish with `ClientClosed`), waits for
    /// them to return, then releases the transport. Safe to call repeatedly.
    pub async fn close(&self) {
        let first = !self.inner.closed.swap(true, Ordering::SeqCst);
        self.inner.cancel.cancel();
        let _drained = self.inner.in_flight.write().await;
        if first {
            self.inner.transport.close().await;
            tracing::info!("Ad client closed");
        }
    }

    /// Core routine shared by every request method
    async fn enhance(&self, prompt: &str, config: &AdRequestConfiguration) -> EnhancementResult {
        let _in_flight = self.inner.in_flight.read().await;
        if self.is_closed() {
            return EnhancementResult::fallback(prompt, None, AdSdkError::ClientClosed);
        }

        if let Err(error) = validate_required(config) {
            tracing::warn!(error = %error, "Ad request rejected before sending");
            return EnhancementResult::fallback(prompt, None, error);
        }
        let conversation = match build_conversation(config) {
            Ok(conversation) => conversation,
            Err(error) => return EnhancementResult::fallback(prompt, None, error),
        };

        let ad_response = match self.send(prompt, &conversation, config).await {
            Ok(ad_response) => ad_response,
            Err(error) => {
                tracing::warn!(
                    conversation_id = %conversation.conversation_id,
                    error = %error,
                    "Ad enhancement failed"
                );
                return EnhancementResult::fallback(prompt, Some(conversation), error);
            }
        };

        match ad_response.enhanced_prompt().map(str::to_string) {
            Some(enhanced) => {
                tracing::debug!(
                    conversation_id = %conversation.conversation_id,
                    ad_response_id = ?ad_response.ad_response_id,
                    "Prompt enhanced"
                );
                EnhancementResult::enhanced(enhanced, conversation, ad_response)
            }
            None => {
                tracing::debug!(
                    conversation_id = %conversation.conversation_id,
                    ad_response_id = ?ad_response.ad_response_id,
                    "No ad served"
                );
                let error = AdSdkError::NoAdServed {
                    ad_response_id: ad_response.ad_response_id.clone(),
                };
                EnhancementResult::fallback(prompt, Some(conversation), error).with_ad_response(ad_response)
            }
        }
    }

    async fn send(
        &self,
        prompt: &str,
        conversation: &Conversation,
        config: &AdRequestConfiguration,
    ) -> Result<AdResponse> {
        let request = AdRequest {
            prompt: prompt.to_string(),
            conversation: conversation.clone(),
            metadata: build_metadata(&config.user_agent, &config.x_forwarded_for)?,
            constraints: config.constraints.clone(),
            wrapping_type: self.inner.wrapping_type,
        };
        let payload = request.to_payload()?;

        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(AdSdkError::ClientClosed),
            response = self.inner.transport.send_ad_request(&payload) => response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkErrorKind;
    use crate::transport::testing::*;
    use crate::transport::RawResponse;
    use crate::types::Constraints;
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const PROMPT: &str = "How do I make my API faster?";

    fn options(retries: u32, timeout: Duration) -> ClientOptions {
        ClientOptions::default()
            .with_api_key("test-api-key-123")
            .with_base_url("http://ads.test")
            .with_timeout(timeout)
            .with_retries(retries)
            .with_backoff(0.0, Duration::ZERO)
    }

    fn client(steps: Vec<Step>, retries: u32) -> (AdClient, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(steps));
        let client = AdClient::with_transport(options(retries, Duration::from_secs(5)), transport.clone())
            .unwrap();
        (client, transport)
    }

    fn config() -> AdRequestConfiguration {
        AdRequestConfiguration::new("sess-1", USER_AGENT, "203.0.113.7")
    }

    #[tokio::test]
    async fn test_request_ad_success() {
        let (client, transport) = client(vec![Step::Respond(success_body("Enhanced prompt"))], 2);

        let result = assert_ok!(client.request_ad(PROMPT, &config()).await);
        assert!(result.success);
        assert_eq!(result.prompt, "Enhanced prompt");
        assert!(result.error.is_none());
        let conversation = result.conversation.unwrap();
        assert_eq!(conversation.session_id, "sess-1");
        assert!(conversation.message_id.starts_with("msg_u_"));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_payload_carries_context_and_metadata() {
        let (client, transport) = client(vec![Step::Respond(success_body("x"))], 0);
        let config = config().with_constraints(Constraints::default().with_max_ads(2));
        assert_ok!(client.request_ad(PROMPT, &config).await);

        let body = transport.bodies.lock().unwrap()[0].clone();
        assert_eq!(body["prompt"], PROMPT);
        assert_eq!(body["conversation"]["session_id"], "sess-1");
        assert_eq!(body["metadata"]["client"]["device_type"], "desktop");
        assert_eq!(body["metadata"]["client"]["x_forwarded_for"], "203.0.113.7");
        assert_eq!(body["constraints"]["max_ads"], 2);
        assert_eq!(body["wrapping_type"], "xml");
    }

    #[tokio::test]
    async fn test_missing_parameters_in_both_forms() {
        let (client, transport) = client(vec![Step::Respond(success_body("x"))], 2);
        let config = AdRequestConfiguration::default();

        let error = assert_err!(client.request_ad(PROMPT, &config).await);
        assert_eq!(
            error,
            AdSdkError::MissingParameter {
                fields: vec![
                    "session_id".to_string(),
                    "user_agent".to_string(),
                    "x_forwarded_for".to_string()
                ]
            }
        );

        let fallback = client.request_ad_or_default(PROMPT, &config).await;
        assert!(!fallback.success);
        assert_eq!(fallback.prompt, PROMPT);
        assert_eq!(fallback.error, Some(error));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_raising_and_non_raising_agree() {
        let scripts: [fn() -> Vec<Step>; 4] = [
            || vec![Step::Respond(success_body("Enhanced prompt"))],
            || vec![Step::Respond(RawResponse::new(401, "bad key"))],
            || vec![server_error()],
            || vec![Step::Respond(RawResponse::new(200, json!({"success": false}).to_string()))],
        ];

        for script in scripts {
            let (raising, _) = client(script(), 1);
            let (non_raising, _) = client(script(), 1);

            let raised = raising.request_ad(PROMPT, &config()).await;
            let folded = non_raising.request_ad_or_default(PROMPT, &config()).await;

            match raised {
                Ok(result) => {
                    assert!(folded.success);
                    assert_eq!(result.prompt, folded.prompt);
                }
                Err(error) => {
                    assert!(!folded.success);
                    assert_eq!(folded.prompt, PROMPT);
                    assert_eq!(folded.error, Some(error));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_recovers_within_retry_budget() {
        let (client, transport) = client(
            vec![
                server_error(),
                Step::Fail(AdSdkError::transport("connection reset")),
                Step::Respond(success_body("Enhanced prompt")),
            ],
            2,
        );

        assert_ok!(client.request_ad(PROMPT, &config()).await);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_large_retry_budget_is_honoured() {
        let mut steps: Vec<Step> = (0..5).map(|_| server_error()).collect();
        steps.push(Step::Respond(success_body("Enhanced prompt")));
        let (client, transport) = client(steps, 5);

        let result = client.request_ad_or_default(PROMPT, &config()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.prompt, "Enhanced prompt");
        assert_eq!(transport.calls(), 6);
    }

    #[tokio::test]
    async fn test_oversized_timeout_is_usable() {
        let transport = Arc::new(ScriptedTransport::new(vec![Step::Respond(success_body("Enhanced prompt"))]));
        let client =
            AdClient::with_transport(options(2, Duration::from_secs(u64::MAX)), transport.clone()).unwrap();

        let result = client.request_ad_or_default(PROMPT, &config()).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_fails_when_failures_exceed_retry_budget() {
        let (client, transport) = client(
            vec![
                server_error(),
                server_error(),
                server_error(),
                Step::Respond(success_body("too late")),
            ],
            2,
        );

        let result = client.request_ad_or_default(PROMPT, &config()).await;
        assert!(!result.success);
        assert_eq!(result.prompt, PROMPT);
        assert!(result.conversation.is_some());
        assert_eq!(result.error.and_then(|e| e.status_code()), Some(503));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_auth_and_validation_called_once() {
        for status in [401u16, 422] {
            let (client, transport) = client(vec![Step::Respond(RawResponse::new(status, ""))], 3);
            let error = assert_err!(client.request_ad(PROMPT, &config()).await);
            assert_eq!(error.status_code(), Some(status));
            assert_eq!(transport.calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_deadline_surfaces_timeout_promptly() {
        let transport = Arc::new(ScriptedTransport::new(vec![Step::Hang(Duration::from_secs(10))]));
        let client =
            AdClient::with_transport(options(3, Duration::from_millis(100)), transport.clone()).unwrap();

        let started = std::time::Instant::now();
        let error = assert_err!(client.request_ad(PROMPT, &config()).await);

        assert!(matches!(error, AdSdkError::Network { kind: NetworkErrorKind::Timeout, .. }));
        assert_eq!(transport.calls(), 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unserved_ad_is_not_retried() {
        let body = json!({"ad_response_id": "resp-0", "success": false}).to_string();
        let (client, transport) = client(vec![Step::Respond(RawResponse::new(200, body))], 3);

        let error = assert_err!(client.request_ad(PROMPT, &config()).await);
        assert_eq!(
            error,
            AdSdkError::NoAdServed {
                ad_response_id: Some("resp-0".to_string())
            }
        );
        assert_eq!(transport.calls(), 1);

        let fallback = client.request_ad_or_default(PROMPT, &config()).await;
        assert!(!fallback.success);
        assert_eq!(fallback.prompt, PROMPT);
        let reply = fallback.ad_response.expect("unserved reply is kept");
        assert_eq!(reply.ad_response_id.as_deref(), Some("resp-0"));
        assert_eq!(reply.success, Some(false));
    }

    #[tokio::test]
    async fn test_short_prompt_and_user_agent_fail_locally() {
        let (client, transport) = client(vec![Step::Respond(success_body("x"))], 0);

        let error = assert_err!(client.request_ad("hi", &config()).await);
        assert!(matches!(error, AdSdkError::Validation { .. }));

        let short_agent = AdRequestConfiguration::new("sess-1", "curl", "203.0.113.7");
        let error = assert_err!(client.request_ad(PROMPT, &short_agent).await);
        assert!(matches!(error, AdSdkError::Validation { .. }));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_construction_requires_api_key() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let options = ClientOptions::default().with_api_key("short");
        assert!(matches!(
            AdClient::with_transport(options, transport),
            Err(AdSdkError::Authentication { .. })
        ));
    }

    #[tokio::test]
    async fn test_calls_after_close_fail_fast() {
        let (client, transport) = client(vec![Step::Respond(success_body("x"))], 2);
        client.close().await;
        client.close().await;

        assert!(client.is_closed());
        assert!(transport.closed.load(Ordering::SeqCst));
        assert_eq!(
            assert_err!(client.request_ad(PROMPT, &config()).await),
            AdSdkError::ClientClosed
        );
        let fallback = client.request_ad_or_default(PROMPT, &config()).await;
        assert_eq!(fallback.error, Some(AdSdkError::ClientClosed));
        assert_eq!(fallback.prompt, PROMPT);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_close_cancels_in_flight_calls() {
        let transport = Arc::new(ScriptedTransport::new(vec![Step::Hang(Duration::from_secs(30))]));
        let client =
            AdClient::with_transport(options(0, Duration::from_secs(60)), transport.clone()).unwrap();

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.request_ad(PROMPT, &config()).await })
        };
        while transport.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::timeout(Duration::from_secs(2), client.close())
            .await
            .expect("close should drain promptly");
        let outcome = pending.await.unwrap();
        assert_eq!(outcome.unwrap_err(), AdSdkError::ClientClosed);
    }

    #[tokio::test]
    async fn test_ack_sent_for_successful_result() {
        let (client, transport) = client(vec![Step::Respond(success_body("Enhanced prompt"))], 0);
        let result = client.request_ad(PROMPT, &config()).await.unwrap();

        client
            .analyse_and_report(&result, "Try this. <ADS>ADS-7731 EdgeCache</ADS>")
            .await;

        assert_eq!(transport.ack_calls(), 1);
        let bodies = transport.bodies.lock().unwrap();
        let ack = bodies.last().unwrap();
        assert_eq!(ack["ad_status"], json!(AdStatus::Ok));
        assert_eq!(ack["ad_response_id"], "resp-1");
        assert_eq!(ack["analytics"]["total_ads_detected"], 1);
    }

    #[tokio::test]
    async fn test_ack_skipped_for_fallback_result() {
        let (client, transport) = client(vec![server_error()], 0);
        let result = client.request_ad_or_default(PROMPT, &config()).await;

        client.analyse_and_report(&result, "anything").await;
        assert_eq!(transport.ack_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_analysis_sends_error_ack() {
        let (client, transport) = client(vec![Step::Respond(success_body("Enhanced prompt"))], 0);
        let mut result = client.request_ad(PROMPT, &config()).await.unwrap();
        if let Some(response) = result.ad_response.as_mut() {
            response.tracking_identifier = None;
        }

        client.analyse_and_report(&result, "answer").await;

        let bodies = transport.bodies.lock().unwrap();
        let ack = bodies.last().unwrap();
        assert_eq!(ack["ad_status"], "error");
        assert!(ack["error_tracking"]["error_message"]
            .as_str()
            .unwrap()
            .contains("tracking_identifier"));
    }

    #[tokio::test]
    async fn test_failed_ack_send_is_followed_by_error_ack() {
        let transport = Arc::new(
            ScriptedTransport::new(vec![Step::Respond(success_body("Enhanced prompt"))]).with_ack_status(500),
        );
        let client =
            AdClient::with_transport(options(0, Duration::from_secs(5)), transport.clone()).unwrap();
        let result = client.request_ad(PROMPT, &config()).await.unwrap();

        client.analyse_and_report(&result, "answer").await;

        assert_eq!(transport.ack_calls(), 2);
        let bodies = transport.bodies.lock().unwrap();
        let error_ack = bodies.last().unwrap();
        assert_eq!(error_ack["ad_status"], "error");
        assert!(error_ack["error_tracking"]["error_message"]
            .as_str()
            .unwrap()
            .contains("acknowledgment rejected"));
    }

    #[tokio::test]
    async fn test_failed_error_ack_is_not_resent() {
        let transport = Arc::new(
            ScriptedTransport::new(vec![Step::Respond(success_body("Enhanced prompt"))]).with_ack_status(500),
        );
        let client =
            AdClient::with_transport(options(0, Duration::from_secs(5)), transport.clone()).unwrap();
        let mut result = client.request_ad(PROMPT, &config()).await.unwrap();
        if let Some(response) = result.ad_response.as_mut() {
            response.tracking_identifier = None;
        }

        client.analyse_and_report(&result, "answer").await;
        assert_eq!(transport.ack_calls(), 1);
    }
}
