//! Blocking client.
//!
//! Wraps the non-blocking [`crate::client::AdClient`] and drives its futures
//! on an owned current-thread runtime, so both call styles share one
//! orchestration path. Must not be used from inside an async context.

use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

use crate::client::AdClient as AsyncAdClient;
use crate::config::ClientOptions;
use crate::error::{AdSdkError, Result};
use crate::transport::Transport;
use crate::types::{AdRequestConfiguration, EnhancementResult};

/// Blocking ad enhancement client
///
/// Owns its runtime, so one instance serves one thread of callers at a time.
pub struct AdClient {
    inner: AsyncAdClient,
    runtime: Runtime,
}

fn build_runtime() -> Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| AdSdkError::transport(format!("Failed to start runtime: {}", e)))
}

impl AdClient {
    /// Create a blocking client backed by `reqwest`
    ///
    /// # Arguments
    /// * `options` - Client options; the API key falls back to `ADSTRACT_API_KEY`
    ///
    /// # Returns
    /// A ready client, or `Authentication` when no usable key is configured
    pub fn new(options: ClientOptions) -> Result<Self> {
        let runtime = build_runtime()?;
        let inner = AsyncAdClient::new(options)?;
        Ok(Self { inner, runtime })
    }

    /// Create a blocking client from `ADSTRACT_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(ClientOptions::from_env())
    }

    /// Create a blocking client over a custom transport
    ///
    /// # Arguments
    /// * `options` - Client options
    /// * `transport` - Transport released by [`AdClient::close`]
    pub fn with_transport(options: ClientOptions, transport: Arc<dyn Transport>) -> Result<Self> {
        let runtime = build_runtime()?;
        let inner = AsyncAdClient::with_transport(options, transport)?;
        Ok(Self { inner, runtime })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Blocking form of [`AsyncAdClient::request_ad`]
    pub fn request_ad(&self, prompt: &str, config: &AdRequestConfiguration) -> Result<EnhancementResult> {
        self.runtime.block_on(self.inner.request_ad(prompt, config))
    }

    /// Blocking form of [`AsyncAdClient::request_ad_or_default`]
    pub fn request_ad_or_default(&self, prompt: &str, config: &AdRequestConfiguration) -> EnhancementResult {
        self.runtime.block_on(self.inner.request_ad_or_default(prompt, config))
    }

    /// Blocking form of [`AsyncAdClient::analyse_and_report`]
    pub fn analyse_and_report(&self, result: &EnhancementResult, llm_response: &str) {
        self.runtime
            .block_on(self.inner.analyse_and_report(result, llm_response))
    }

    /// Release the transport; later calls fail with `ClientClosed`
    pub fn close(&self) {
        self.runtime.block_on(self.inner.close())
    }
}
