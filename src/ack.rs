//! Ad Acknowledgment Module
//!
//! After the caller's LLM answers an enhanced prompt, the SDK reports back
//! how the ad actually surfaced in that answer:
//! - Ad blocks detected, per the configured wrapping style
//! - Word counts, ad word ratio and an overload flag
//! - Where the first ad block sits (top, middle, bottom)
//! - Policy compliance and integrity hashes
//!
//! Building an ack is pure; sending it is the orchestrator's job and is
//! always best-effort.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{SDK_NAME, SDK_TYPE, SDK_VERSION};
use crate::context::assistant_message_id;
use crate::error::{AdSdkError, Result};
use crate::types::{EnhancementResult, WrappingType};
use crate::user_agent::sha256_hex;

pub const XML_TAG: &str = "ADS";
pub const PLAIN_END_TAG: &str = "[/ADS]";
pub const MAX_ADS_POLICY: u32 = 1;
pub const MAX_LATENCY_POLICY_MS: f64 = 3000.0;
/// Ad word ratio above which a response counts as overloaded
pub const OVERLOADED_RATIO: f64 = 0.3;
pub const ANALYSIS_ERROR_CODE: &str = "ANALYSIS_FAILED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPosition {
    Top,
    Middle,
    Bottom,
    None,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdStatus {
    Ok,
    NoAdUsed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    pub total_ads_detected: u32,
    pub total_links: u32,
    pub total_words: u32,
    pub ad_word_ratio: f64,
    pub is_overloaded: bool,
    pub sponsored_labels_count: u32,
    pub general_placement_position: PlacementPosition,
}

impl Default for Analytics {
    fn default() -> Self {
        Self {
            total_ads_detected: 0,
            total_links: 0,
            total_words: 0,
            ad_word_ratio: 0.0,
            is_overloaded: false,
            sponsored_labels_count: 0,
            general_placement_position: PlacementPosition::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub sdk_type: String,
    pub sdk_version: String,
    pub sdk_name: String,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            sdk_type: SDK_TYPE.to_string(),
            sdk_version: SDK_VERSION.to_string(),
            sdk_name: SDK_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compliance {
    pub max_ads_policy_ok: bool,
    pub max_latency_policy_ok: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalMetadata {
    /// SHA-256 of the LLM response
    pub response_hash: String,
    /// SHA-256 of the enhanced prompt text
    pub aepi_checksum: String,
    pub conversation_id: String,
    pub session_id: String,
    /// Assistant-side message id derived from the user message id
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorTracking {
    pub error_code: String,
    pub error_message: String,
}

/// Acknowledgment payload posted after an ad surfaced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdAck {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ad_response_id: Option<String>,
    pub ad_status: AdStatus,
    pub analytics: Analytics,
    pub diagnostics: Diagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance: Option<Compliance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_tracking: Option<ErrorTracking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_metadata: Option<ExternalMetadata>,
}

fn analysis_error(message: &str) -> AdSdkError {
    AdSdkError::validation(format!("ad analysis failed: {}", message))
}

fn count(haystack: &str, needle: &str) -> u32 {
    if needle.is_empty() {
        0
    } else {
        haystack.matches(needle).count() as u32
    }
}

/// Locate ad blocks in an LLM response
///
/// XML wrapping yields the text inside `<ADS>...</ADS>`; plain wrapping
/// yields the text between the sponsored label and `[/ADS]`.
fn ad_blocks<'a>(
    llm_response: &'a str,
    wrapping_type: WrappingType,
    sponsored_label: Option<&str>,
) -> Result<(Vec<&'a str>, Option<usize>)> {
    let pattern = match wrapping_type {
        WrappingType::Xml => format!(
            r"(?is)<{tag}>(.*?)</{tag}>",
            tag = regex::escape(XML_TAG)
        ),
        WrappingType::Plain => {
            let label = sponsored_label
                .filter(|label| !label.is_empty())
                .ok_or_else(|| analysis_error("sponsored_label missing for plain wrapping"))?;
            format!(
                r"(?is){}(.*?){}",
                regex::escape(label),
                regex::escape(PLAIN_END_TAG)
            )
        }
    };
    let regex = Regex::new(&pattern).map_err(|e| analysis_error(&e.to_string()))?;

    let mut first_start = None;
    let mut blocks = Vec::new();
    for captures in regex.captures_iter(llm_response) {
        if let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) {
            first_start.get_or_insert(whole.start());
            blocks.push(inner.as_str());
        }
    }
    Ok((blocks, first_start))
}

fn placement_position(response_len: usize, first_start: Option<usize>) -> PlacementPosition {
    match first_start {
        _ if response_len == 0 => PlacementPosition::Unknown,
        None => PlacementPosition::None,
        Some(start) => {
            let fraction = start as f64 / response_len as f64;
            if fraction <= 0.25 {
                PlacementPosition::Top
            } else if fraction <= 0.75 {
                PlacementPosition::Middle
            } else {
                PlacementPosition::Bottom
            }
        }
    }
}

/// Measure how the served ad appears in `llm_response`
///
/// # Errors
/// `Validation` when the result lacks the ad response fields the analysis
/// depends on.
pub fn build_analytics(
    result: &EnhancementResult,
    llm_response: &str,
    wrapping_type: WrappingType,
) -> Result<Analytics> {
    let ad_response = result
        .ad_response
        .as_ref()
        .ok_or_else(|| analysis_error("no ad response"))?;
    let tracking_identifier = ad_response
        .tracking_identifier
        .as_deref()
        .ok_or_else(|| analysis_error("tracking_identifier missing"))?;
    let sponsored_label = ad_response.sponsored_label.as_deref();

    let (blocks, first_start) = ad_blocks(llm_response, wrapping_type, sponsored_label)?;

    let total_ads_detected = blocks
        .iter()
        .map(|block| count(block, tracking_identifier))
        .sum();
    let total_links = ad_response
        .tracking_url
        .as_deref()
        .map_or(0, |url| count(llm_response, url));

    let total_words = llm_response.split_whitespace().count() as u32;
    let ad_words: usize = blocks.iter().map(|block| block.split_whitespace().count()).sum();
    let ad_word_ratio = if total_words > 0 {
        ((ad_words as f64 / total_words as f64) * 100.0).round() / 100.0
    } else {
        0.0
    };

    Ok(Analytics {
        total_ads_detected,
        total_links,
        total_words,
        ad_word_ratio,
        is_overloaded: ad_word_ratio > OVERLOADED_RATIO,
        sponsored_labels_count: sponsored_label.map_or(0, |label| count(llm_response, label)),
        general_placement_position: placement_position(llm_response.len(), first_start),
    })
}

/// Build the acknowledgment for a successful enhancement
pub fn build_ad_ack(
    result: &EnhancementResult,
    llm_response: &str,
    wrapping_type: WrappingType,
) -> Result<AdAck> {
    let analytics = build_analytics(result, llm_response, wrapping_type)?;
    let ad_response = result
        .ad_response
        .as_ref()
        .ok_or_else(|| analysis_error("no ad response"))?;
    let aepi = ad_response
        .aepi
        .as_ref()
        .ok_or_else(|| analysis_error("aepi missing"))?;
    let conversation = result
        .conversation
        .as_ref()
        .ok_or_else(|| analysis_error("conversation missing"))?;

    let compliance = Compliance {
        max_ads_policy_ok: analytics.total_ads_detected <= MAX_ADS_POLICY,
        max_latency_policy_ok: ad_response
            .execution_time_ms
            .map_or(true, |ms| ms <= MAX_LATENCY_POLICY_MS),
    };

    let ad_status = if analytics.total_ads_detected >= MAX_ADS_POLICY {
        AdStatus::Ok
    } else {
        AdStatus::NoAdUsed
    };

    Ok(AdAck {
        ad_response_id: ad_response.ad_response_id.clone(),
        ad_status,
        analytics,
        diagnostics: Diagnostics::default(),
        compliance: Some(compliance),
        error_tracking: None,
        external_metadata: Some(ExternalMetadata {
            response_hash: sha256_hex(llm_response),
            aepi_checksum: sha256_hex(&aepi.aepi_text),
            conversation_id: conversation.conversation_id.clone(),
            session_id: conversation.session_id.clone(),
            message_id: assistant_message_id(&conversation.message_id),
        }),
    })
}

/// Acknowledgment reporting that local analysis failed
///
/// Built from whatever the result still offers, so it cannot fail itself.
pub fn build_error_ack(result: &EnhancementResult, llm_response: &str, error: &AdSdkError) -> AdAck {
    let ad_response = result.ad_response.as_ref();
    let external_metadata = result.conversation.as_ref().map(|conversation| ExternalMetadata {
        response_hash: sha256_hex(llm_response),
        aepi_checksum: ad_response
            .and_then(|response| response.aepi.as_ref())
            .map(|aepi| sha256_hex(&aepi.aepi_text))
            .unwrap_or_default(),
        conversation_id: conversation.conversation_id.clone(),
        session_id: conversation.session_id.clone(),
        message_id: assistant_message_id(&conversation.message_id),
    });

    AdAck {
        ad_response_id: ad_response.and_then(|response| response.ad_response_id.clone()),
        ad_status: AdStatus::Error,
        analytics: Analytics::default(),
        diagnostics: Diagnostics::default(),
        compliance: None,
        error_tracking: Some(ErrorTracking {
            error_code: ANALYSIS_ERROR_CODE.to_string(),
            error_message: error.to_string(),
        }),
        external_metadata,
    }
}
