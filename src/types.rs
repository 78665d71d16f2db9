//! Type Definitions and Data Structures
//!
//! This module contains the shared types of the remote enhancement pipeline:
//! - Caller-supplied request configuration and tuning constraints
//! - Conversation identifiers sent with every request
//! - Wire request/response payloads exchanged with the ad service
//! - The fallback-by-construction [`EnhancementResult`]
//!
//! Wire types are serde-serializable; request-side types carry `validator`
//! rules that are checked before anything leaves the process.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use validator::Validate;

use crate::error::{AdSdkError, Result};

/// How the server wraps injected ad content inside the enhanced prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrappingType {
    /// Ad content enclosed in `<ADS>...</ADS>`
    #[default]
    Xml,
    /// Ad content starts at the sponsored label and ends at a plain marker
    Plain,
}

/// Content filtering tier requested from the ad service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafeMode {
    /// Only brand-safe creatives
    Strict,
    /// Service default filtering
    #[default]
    Standard,
    /// No additional filtering
    Off,
}

/// Optional tuning knobs for a single request
///
/// Recognized keys are typed and validated locally. Any other key lands in
/// `extra` and is forwarded to the service untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Constraints {
    /// Maximum number of ads to inject (1-20)
    #[validate(range(min = 1, max = 20))]
    #[serde(default = "default_max_ads")]
    pub max_ads: u32,
    /// Minimum similarity hint for creative matching (0.0-1.0)
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_similarity_hint: Option<f64>,
    /// Latency budget hint for the service in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms_hint: Option<u64>,
    /// Content filtering tier
    #[serde(default)]
    pub safe_mode: SafeMode,
    /// Unrecognized keys, passed through as-is
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Keys owned by the typed fields of [`Constraints`]
pub const RESERVED_CONSTRAINT_KEYS: [&str; 4] =
    ["max_ads", "min_similarity_hint", "max_latency_ms_hint", "safe_mode"];

fn default_max_ads() -> u32 {
    1
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_ads: default_max_ads(),
            min_similarity_hint: None,
            max_latency_ms_hint: None,
            safe_mode: SafeMode::default(),
            extra: HashMap::new(),
        }
    }
}

impl Constraints {
    /// Set how many ads the service may inject (validated to 1-20 on send)
    pub fn with_max_ads(mut self, max_ads: u32) -> Self {
        self.max_ads = max_ads;
        self
    }

    /// Set the content filtering tier
    pub fn with_safe_mode(mut self, safe_mode: SafeMode) -> Self {
        self.safe_mode = safe_mode;
        self
    }

    /// Attach an option the SDK does not know about
    ///
    /// # Arguments
    /// * `key` - Option name forwarded verbatim
    /// * `value` - Any JSON value
    ///
    /// # Returns
    /// The updated constraints. Keys owned by a typed field (see
    /// [`RESERVED_CONSTRAINT_KEYS`]) are ignored; set the field instead.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if RESERVED_CONSTRAINT_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Ignoring extra constraint that shadows a typed field");
            return self;
        }
        self.extra.insert(key, value);
        self
    }

    /// Extra keys that collide with a typed field
    fn reserved_extra_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .extra
            .keys()
            .map(String::as_str)
            .filter(|key| RESERVED_CONSTRAINT_KEYS.contains(key))
            .collect();
        keys.sort_unstable();
        keys
    }
}

/// Conversation identifiers attached to every ad request
///
/// The service owns conversation history; the client only forwards ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Identifier of the conversation thread
    pub conversation_id: String,
    /// Stable identifier of the user session
    pub session_id: String,
    /// Identifier of the user message being enhanced
    pub message_id: String,
}

impl Conversation {
    pub fn new(
        conversation_id: impl Into<String>,
        session_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            session_id: session_id.into(),
            message_id: message_id.into(),
        }
    }

    /// True when all three identifiers are non-blank
    pub fn is_complete(&self) -> bool {
        !self.conversation_id.trim().is_empty()
            && !self.session_id.trim().is_empty()
            && !self.message_id.trim().is_empty()
    }
}

/// Caller-supplied parameters for one enhancement request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdRequestConfiguration {
    /// Session identifier (required unless `conversation` is given)
    pub session_id: Option<String>,
    /// Browser user agent of the end user (required)
    pub user_agent: String,
    /// Client network origin, usually the X-Forwarded-For header (required)
    pub x_forwarded_for: String,
    /// Prior conversation context; takes precedence over `session_id`
    pub conversation: Option<Conversation>,
    /// Optional tuning constraints
    pub constraints: Option<Constraints>,
}

impl AdRequestConfiguration {
    pub fn new(
        session_id: impl Into<String>,
        user_agent: impl Into<String>,
        x_forwarded_for: impl Into<String>,
    ) -> Self {
        Self {
            session_id: Some(session_id.into()),
            user_agent: user_agent.into(),
            x_forwarded_for: x_forwarded_for.into(),
            conversation: None,
            constraints: None,
        }
    }

    pub fn with_conversation(mut self, conversation: Conversation) -> Self {
        self.conversation = Some(conversation);
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = Some(constraints);
        self
    }
}

/// Client metadata derived from the user agent and forwarded address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientMetadata {
    /// SHA-256 of the raw user agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent_hash: Option<String>,
    /// bot, tablet, mobile, desktop or unknown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_forwarded_for: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub client: ClientMetadata,
}

/// Request body sent to the ad injection endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AdRequest {
    /// Prompt to enhance (at least 3 characters)
    #[validate(length(min = 3))]
    pub prompt: String,
    pub conversation: Conversation,
    pub metadata: Metadata,
    #[validate(nested)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
    pub wrapping_type: WrappingType,
}

impl AdRequest {
    /// Validate field rules and convert the request to its JSON body
    ///
    /// # Errors
    /// `Validation` when a field rule fails or `constraints.extra` shadows a
    /// typed constraint.
    pub fn to_payload(&self) -> Result<Value> {
        self.validate()
            .map_err(|e| AdSdkError::validation(format!("Invalid request payload: {}", e)))?;
        if let Some(constraints) = &self.constraints {
            let reserved = constraints.reserved_extra_keys();
            if !reserved.is_empty() {
                return Err(AdSdkError::validation(format!(
                    "extra constraints shadow typed fields: {}",
                    reserved.join(", ")
                )));
            }
        }
        serde_json::to_value(self)
            .map_err(|e| AdSdkError::validation(format!("Failed to serialize request: {}", e)))
    }
}

/// Enhanced prompt block returned by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AepiData {
    pub status: String,
    /// Prompt text with ad instructions spliced in
    pub aepi_text: String,
    pub checksum: String,
    pub size_bytes: u64,
}

/// Parsed reply from the ad injection endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdResponse {
    #[serde(default)]
    pub ad_request_id: Option<String>,
    #[serde(default)]
    pub ad_response_id: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub execution_time_ms: Option<f64>,
    #[serde(default)]
    pub aepi: Option<AepiData>,
    /// Link the LLM is asked to include with the ad
    #[serde(default)]
    pub tracking_url: Option<String>,
    /// Marker the LLM is asked to echo inside each ad block
    #[serde(default)]
    pub tracking_identifier: Option<String>,
    /// Label that opens a plain-wrapped ad block
    #[serde(default)]
    pub sponsored_label: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    /// Full reply as received, including fields unknown to this SDK
    #[serde(skip)]
    pub raw: Value,
}

impl AdResponse {
    /// Build a response from decoded JSON, rejecting shapes the SDK cannot use
    pub fn from_json(payload: Value) -> Result<Self> {
        if !payload.is_object() {
            return Err(AdSdkError::service("response JSON must be an object"));
        }
        if let Some(aepi) = payload.get("aepi") {
            if !aepi.is_null() && !aepi.is_object() {
                return Err(AdSdkError::service("aepi must be an object"));
            }
        }

        let mut response: AdResponse = serde_json::from_value(payload.clone())
            .map_err(|e| AdSdkError::service(format!("Unexpected response structure: {}", e)))?;
        response.raw = payload;
        Ok(response)
    }

    /// The enhanced prompt, if the service actually served an ad
    pub fn enhanced_prompt(&self) -> Option<&str> {
        match (self.success, &self.aepi) {
            (Some(true), Some(aepi)) => Some(aepi.aepi_text.as_str()),
            _ => None,
        }
    }
}

/// Outcome of an enhancement call
///
/// `success == false` implies `prompt` is the caller's original prompt and
/// `error` holds the cause; `success == true` implies `prompt` is the
/// enhanced text and `error` is `None`. An unsuccessful result still carries
/// `ad_response` when the service replied without serving an ad.
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancementResult {
    pub prompt: String,
    /// Resolved conversation, when context building got that far
    pub conversation: Option<Conversation>,
    /// Parsed service reply, when one was received
    pub ad_response: Option<AdResponse>,
    pub success: bool,
    pub error: Option<AdSdkError>,
}

impl EnhancementResult {
    /// Successful result carrying the enhanced prompt
    pub fn enhanced(prompt: String, conversation: Conversation, ad_response: AdResponse) -> Self {
        Self {
            prompt,
            conversation: Some(conversation),
            ad_response: Some(ad_response),
            success: true,
            error: None,
        }
    }

    /// Unsuccessful result carrying the caller's prompt verbatim
    pub fn fallback(original_prompt: &str, conversation: Option<Conversation>, error: AdSdkError) -> Self {
        Self {
            prompt: original_prompt.to_string(),
            conversation,
            ad_response: None,
            success: false,
            error: Some(error),
        }
    }

    /// Keep the service reply that accompanied a fallback
    pub fn with_ad_response(mut self, ad_response: AdResponse) -> Self {
        self.ad_response = Some(ad_response);
        self
    }
}
