//! Adstract AI client library
//!
//! Enhances LLM prompts with contextual advertisements in two independent ways:
//! - Remotely: [`AdClient`] sends the prompt to the Adstract ad service and
//!   returns an enhanced prompt, with retries, a per-call deadline and an
//!   optional fallback to the original prompt
//! - Locally: [`select_ad`] picks a creative from an in-process catalog and
//!   [`inject_ad`] splices it into a response, with no I/O at all
//!
//! [`blocking::AdClient`] offers the same remote API for synchronous callers.

pub mod ack;
pub mod blocking;
pub mod client;
pub mod config;
pub mod context;
pub mod decision;
pub mod error;
pub mod render;
pub mod retry;
pub mod transport;
pub mod types;
pub mod user_agent;
pub mod validation;

pub use client::AdClient;
pub use config::ClientOptions;
pub use decision::{select_ad, AdContext, AdDecision, AdDecisionEngine, Creative, Placement};
pub use error::{AdSdkError, NetworkErrorKind, Result};
pub use render::{inject_ad, render_ad};
pub use transport::{HttpTransport, RawResponse, Transport};
pub use types::{
    AdRequestConfiguration, AdResponse, Constraints, Conversation, EnhancementResult, SafeMode,
    WrappingType,
};

#[test]
fn test_local_pipeline_end_to_end() {
    let decision = select_ad(&AdContext::new("Need performance tips", "Use caching"));
    assert!(!decision.is_noop());

    let fragment = render_ad(&decision);
    assert!(!fragment.is_empty());
    assert_eq!(inject_ad("Use caching", &decision), format!("Use caching{}", fragment));
}

#[test]
fn test_public_types_serialization() {
    let constraints = Constraints::default().with_safe_mode(SafeMode::Strict);
    let json = serde_json::to_string(&constraints).unwrap();
    assert!(json.contains("strict"));

    let json = serde_json::to_string(&WrappingType::Plain).unwrap();
    assert_eq!(json, "\"plain\"");
}
