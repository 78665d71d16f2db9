//! Error Types
//!
//! Every failure the SDK can report is a variant of [`AdSdkError`]:
//! - Local failures raised before any I/O (missing parameters, invalid payloads)
//! - Remote failures mapped from HTTP status codes
//! - Transport failures (timeouts, connection errors)
//! - Lifecycle failures (calls on a closed client)
//!
//! The raising API returns these unchanged; the non-raising API stores them
//! in [`crate::types::EnhancementResult::error`].

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, AdSdkError>;

/// Distinguishes a deadline expiry from other transport-level failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// The per-call deadline elapsed before a response arrived
    Timeout,
    /// Connection refused/reset, DNS failure, TLS failure, broken body, ...
    Transport,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdSdkError {
    #[error("Missing required parameter(s): {}", fields.join(", "))]
    MissingParameter { fields: Vec<String> },

    #[error("Authentication failed: {message}")]
    Authentication {
        message: String,
        status_code: Option<u16>,
        response_snippet: Option<String>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        status_code: Option<u16>,
        response_snippet: Option<String>,
    },

    #[error("Rate limited (status {status_code})")]
    RateLimit {
        status_code: u16,
        response_snippet: Option<String>,
    },

    #[error("Service error: {message}")]
    Service {
        message: String,
        status_code: Option<u16>,
        response_snippet: Option<String>,
    },

    #[error("Network error ({kind:?}): {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    #[error("No ad was served for this request")]
    NoAdServed { ad_response_id: Option<String> },

    #[error("Client has been closed")]
    ClientClosed,
}

impl AdSdkError {
    /// Local validation failure that never reached the server
    pub fn validation(message: impl Into<String>) -> Self {
        AdSdkError::Validation {
            message: message.into(),
            status_code: None,
            response_snippet: None,
        }
    }

    /// Credential problem detected locally, such as a missing or short API key
    pub fn authentication(message: impl Into<String>) -> Self {
        AdSdkError::Authentication {
            message: message.into(),
            status_code: None,
            response_snippet: None,
        }
    }

    /// Unusable reply from the service, without status details
    pub fn service(message: impl Into<String>) -> Self {
        AdSdkError::Service {
            message: message.into(),
            status_code: None,
            response_snippet: None,
        }
    }

    /// Deadline expiry; see [`AdSdkError::is_timeout`]
    pub fn timeout(message: impl Into<String>) -> Self {
        AdSdkError::Network {
            kind: NetworkErrorKind::Timeout,
            message: message.into(),
        }
    }

    /// Connection-level failure below HTTP
    pub fn transport(message: impl Into<String>) -> Self {
        AdSdkError::Network {
            kind: NetworkErrorKind::Transport,
            message: message.into(),
        }
    }

    /// Whether a fresh attempt with the identical payload could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdSdkError::Network { .. } | AdSdkError::Service { .. } | AdSdkError::RateLimit { .. }
        )
    }

    /// True for `Network` errors caused by the per-call deadline
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            AdSdkError::Network {
                kind: NetworkErrorKind::Timeout,
                ..
            }
        )
    }

    /// HTTP status that produced this error, if it came from a server reply
    pub fn status_code(&self) -> Option<u16> {
        match self {
            AdSdkError::Authentication { status_code, .. }
            | AdSdkError::Validation { status_code, .. }
            | AdSdkError::Service { status_code, .. } => *status_code,
            AdSdkError::RateLimit { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AdSdkError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            AdSdkError::timeout(error.to_string())
        } else {
            AdSdkError::transport(error.to_string())
        }
    }
}
