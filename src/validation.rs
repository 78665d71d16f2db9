//! Required-parameter checks run before any identifier generation or I/O.

use crate::error::{AdSdkError, Result};
use crate::types::AdRequestConfiguration;

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

/// Check that every required field of `config` is present and non-empty
///
/// `session_id` is only required when no prior conversation is supplied.
/// The error names every offending field, in declaration order.
pub fn validate_required(config: &AdRequestConfiguration) -> Result<()> {
    let mut missing = Vec::new();

    if config.conversation.is_none() && is_blank(config.session_id.as_deref()) {
        missing.push("session_id".to_string());
    }
    if let Some(conversation) = &config.conversation {
        if conversation.session_id.trim().is_empty() {
            missing.push("conversation.session_id".to_string());
        }
    }
    if is_blank(Some(&config.user_agent)) {
        missing.push("user_agent".to_string());
    }
    if is_blank(Some(&config.x_forwarded_for)) {
        missing.push("x_forwarded_for".to_string());
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(AdSdkError::MissingParameter { fields: missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Conversation;

    fn missing_fields(config: &AdRequestConfiguration) -> Vec<String> {
        match validate_required(config) {
            Err(AdSdkError::MissingParameter { fields }) => fields,
            other => panic!("expected MissingParameter, got {:?}", other),
        }
    }

    #[test]
    fn test_complete_configuration_passes() {
        let config = AdRequestConfiguration::new("sess-1", "Mozilla/5.0 (X11; Linux)", "8.8.8.8");
        assert!(validate_required(&config).is_ok());
    }

    #[test]
    fn test_reports_every_missing_field() {
        let config = AdRequestConfiguration::default();
        assert_eq!(
            missing_fields(&config),
            vec!["session_id", "user_agent", "x_forwarded_for"]
        );
    }

    #[test]
    fn test_whitespace_counts_as_empty() {
        let config = AdRequestConfiguration::new("   ", "Mozilla/5.0 (X11; Linux)", "\t");
        assert_eq!(missing_fields(&config), vec!["session_id", "x_forwarded_for"]);
    }

    #[test]
    fn test_conversation_replaces_session_id() {
        let mut config = AdRequestConfiguration::new("", "Mozilla/5.0 (X11; Linux)", "1.1.1.1");
        config.session_id = None;
        config.conversation = Some(Conversation::new("conv", "sess", "msg"));
        assert!(validate_required(&config).is_ok());

        config.conversation = Some(Conversation::new("conv", "", "msg"));
        assert_eq!(missing_fields(&config), vec!["conversation.session_id"]);
    }
}
