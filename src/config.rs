//! Configuration Management Module
//!
//! This module holds every knob a client instance is built from:
//! - Endpoint and credential settings (base URL, API key)
//! - Reliability settings (timeout, retries, backoff)
//! - Ad wrapping style requested from the server
//!
//! Options can be built in code with the `with_*` methods or loaded from
//! environment variables with [`ClientOptions::from_env`]. Credentials are
//! resolved exactly once, when the client is constructed.

use std::env;
use std::time::Duration;

use crate::error::{AdSdkError, Result};
use crate::types::WrappingType;

pub const DEFAULT_BASE_URL: &str = "https://api.adstract.ai";
pub const AD_INJECTION_ENDPOINT: &str = "/api/ad-injection/start/";
pub const AD_ACK_ENDPOINT: &str = "/api/ad-injection/ack/";

pub const ENV_API_KEY_NAME: &str = "ADSTRACT_API_KEY";
pub const ENV_BASE_URL_NAME: &str = "ADSTRACT_BASE_URL";
pub const ENV_TIMEOUT_NAME: &str = "ADSTRACT_TIMEOUT_SECS";
pub const ENV_RETRIES_NAME: &str = "ADSTRACT_RETRIES";

pub const SDK_HEADER_NAME: &str = "X-Adstract-SDK";
pub const SDK_VERSION_HEADER_NAME: &str = "X-Adstract-SDK-Version";
pub const API_KEY_HEADER_NAME: &str = "X-Adstract-API-Key";

pub const SDK_NAME: &str = "adstractai-rust";
pub const SDK_TYPE: &str = "rust";
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_TIMEOUT_SECS: u64 = 100;
pub const DEFAULT_RETRIES: u32 = 2;

pub const MIN_API_KEY_LENGTH: usize = 10;

/// Get environment variable value or fallback to default
pub fn env_or(key: &str, fallback: &str) -> String {
    env::var(key).unwrap_or_else(|_| fallback.to_string())
}

/// Parse a numeric environment variable, falling back when unset or invalid
pub fn parse_env<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(fallback)
}

/// Client construction options
///
/// Built with [`Default`] plus the `with_*` methods, or from the process
/// environment. Passed by value into [`crate::client::AdClient::new`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// API key; when `None` the `ADSTRACT_API_KEY` variable is consulted
    pub api_key: Option<String>,
    /// Base URL of the ad service (no trailing slash)
    pub base_url: String,
    /// Overall deadline for one call, spanning every retry
    pub timeout: Duration,
    /// Number of retries after the first attempt; the deadline still bounds them
    pub retries: u32,
    /// Base backoff in seconds; attempt `n` waits `backoff_factor * 2^n`
    pub backoff_factor: f64,
    /// Cap on a single backoff delay
    pub max_backoff: Duration,
    /// Relative jitter applied to each delay (0.1 = +/-10%)
    pub jitter: f64,
    /// How the server should wrap injected ad content
    pub wrapping_type: WrappingType,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retries: DEFAULT_RETRIES,
            backoff_factor: 0.5,
            max_backoff: Duration::from_secs(8),
            jitter: 0.1,
            wrapping_type: WrappingType::Xml,
        }
    }
}

impl ClientOptions {
    /// Load options from environment variables
    ///
    /// Loads a `.env` file if present, then reads:
    /// - `ADSTRACT_API_KEY`: API key
    /// - `ADSTRACT_BASE_URL`: endpoint override (default: https://api.adstract.ai)
    /// - `ADSTRACT_TIMEOUT_SECS`: per-call deadline in seconds (default: 100)
    /// - `ADSTRACT_RETRIES`: retry count (default: 2)
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Self {
            api_key: env::var(ENV_API_KEY_NAME).ok(),
            base_url: env_or(ENV_BASE_URL_NAME, DEFAULT_BASE_URL),
            timeout: Duration::from_secs(parse_env(ENV_TIMEOUT_NAME, DEFAULT_TIMEOUT_SECS)),
            retries: parse_env(ENV_RETRIES_NAME, DEFAULT_RETRIES),
            ..defaults
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overall deadline per call, spanning every retry
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retries after the first attempt, used as given
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Backoff base in seconds and the cap on a single delay
    ///
    /// # Arguments
    /// * `backoff_factor` - Attempt `n` waits `backoff_factor * 2^n` seconds
    /// * `max_backoff` - Upper bound on any one delay
    pub fn with_backoff(mut self, backoff_factor: f64, max_backoff: Duration) -> Self {
        self.backoff_factor = backoff_factor;
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_wrapping_type(mut self, wrapping_type: WrappingType) -> Self {
        self.wrapping_type = wrapping_type;
        self
    }

    /// Resolve the API key from the explicit option or the environment
    ///
    /// # Errors
    /// `Authentication` when neither source yields a key of at least
    /// `MIN_API_KEY_LENGTH` characters.
    pub fn resolve_api_key(&self) -> Result<String> {
        let candidate = self
            .api_key
            .clone()
            .or_else(|| env::var(ENV_API_KEY_NAME).ok());

        match candidate {
            Some(key) if key.trim().len() >= MIN_API_KEY_LENGTH => Ok(key.trim().to_string()),
            Some(_) => Err(AdSdkError::authentication(format!(
                "api_key must be at least {} characters",
                MIN_API_KEY_LENGTH
            ))),
            None => Err(AdSdkError::authentication(format!(
                "api_key not provided and {} is not set",
                ENV_API_KEY_NAME
            ))),
        }
    }

    /// Join the base URL and an API path
    ///
    /// # Arguments
    /// * `path` - Endpoint path starting with `/`
    ///
    /// # Returns
    /// Absolute URL without a doubled slash at the join
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}
