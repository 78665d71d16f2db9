//! User-agent parsing for request metadata.
//!
//! Only coarse families are extracted; the raw user agent never leaves the
//! process, only its SHA-256 hash does.

use sha2::{Digest, Sha256};

use crate::config::SDK_VERSION;
use crate::error::{AdSdkError, Result};
use crate::types::{ClientMetadata, Metadata};

pub const MIN_USER_AGENT_LENGTH: usize = 10;

pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Coarse device class: bot, tablet, mobile, desktop or unknown
pub fn parse_device_type(user_agent: &str) -> &'static str {
    let value = user_agent.to_lowercase();
    let has = |tokens: &[&str]| tokens.iter().any(|token| value.contains(token));

    if has(&["bot", "crawler", "spider", "slurp", "bingpreview"]) {
        "bot"
    } else if has(&["ipad", "tablet"]) {
        "tablet"
    } else if has(&["mobile", "iphone", "android"]) {
        "mobile"
    } else if has(&["windows", "macintosh", "linux", "cros"]) {
        "desktop"
    } else {
        "unknown"
    }
}

pub fn parse_os_family(user_agent: &str) -> Option<&'static str> {
    const CANDIDATES: [(&str, &str); 9] = [
        ("windows", "Windows"),
        ("android", "Android"),
        ("iphone", "iOS"),
        ("ipad", "iOS"),
        ("ios", "iOS"),
        ("mac os x", "macOS"),
        ("macintosh", "macOS"),
        ("cros", "ChromeOS"),
        ("linux", "Linux"),
    ];

    let value = user_agent.to_lowercase();
    CANDIDATES
        .iter()
        .find(|(token, _)| value.contains(token))
        .map(|(_, label)| *label)
}

// Order matters: Edge and Opera also advertise Chrome and Safari.
pub fn parse_browser_family(user_agent: &str) -> Option<&'static str> {
    let value = user_agent.to_lowercase();
    if value.contains("edg") {
        Some("Edge")
    } else if value.contains("opr") || value.contains("opera") {
        Some("Opera")
    } else if value.contains("chrome") && !value.contains("chromium") {
        Some("Chrome")
    } else if value.contains("safari") && !value.contains("chrome") && !value.contains("chromium") {
        Some("Safari")
    } else if value.contains("firefox") {
        Some("Firefox")
    } else if value.contains("chromium") {
        Some("Chromium")
    } else {
        None
    }
}

/// Build request metadata from the end user's user agent and address
///
/// # Errors
/// `Validation` when the user agent is too short to be meaningful.
pub fn build_metadata(user_agent: &str, x_forwarded_for: &str) -> Result<Metadata> {
    if user_agent.trim().len() < MIN_USER_AGENT_LENGTH {
        return Err(AdSdkError::validation("user_agent is invalid"));
    }

    Ok(Metadata {
        client: ClientMetadata {
            user_agent_hash: Some(sha256_hex(user_agent)),
            device_type: Some(parse_device_type(user_agent).to_string()),
            os_family: parse_os_family(user_agent).map(str::to_string),
            browser_family: parse_browser_family(user_agent).map(str::to_string),
            x_forwarded_for: Some(x_forwarded_for.to_string()),
            sdk_version: Some(SDK_VERSION.to_string()),
        },
    })
}
