//! Conversation context construction.
//!
//! Turns the identifiers a caller supplied into a complete [`Conversation`].
//! Missing conversation/message ids are generated per call; the session id
//! is always caller-owned and never generated here.

use uuid::Uuid;

use crate::error::{AdSdkError, Result};
use crate::types::{AdRequestConfiguration, Conversation};

/// Prefix of user-message ids; acknowledgments swap it for `msg_a_`
pub const USER_MESSAGE_PREFIX: &str = "msg_u_";
pub const ASSISTANT_MESSAGE_PREFIX: &str = "msg_a_";

/// Fresh `conv_`-prefixed conversation id
pub fn generate_conversation_id() -> String {
    format!("conv_{}", Uuid::new_v4().simple())
}

/// Fresh user message id with the `msg_u_` prefix
pub fn generate_message_id() -> String {
    format!("{}{}", USER_MESSAGE_PREFIX, Uuid::new_v4().simple())
}

/// Message id the assistant reply is reported under
pub fn assistant_message_id(user_message_id: &str) -> String {
    match user_message_id.strip_prefix(USER_MESSAGE_PREFIX) {
        Some(rest) => format!("{}{}", ASSISTANT_MESSAGE_PREFIX, rest),
        None => user_message_id.to_string(),
    }
}

fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Build the conversation context for one request
///
/// A fully specified prior conversation is returned unchanged. A prior
/// conversation with blank `conversation_id`/`message_id` gets those filled.
/// Without one, the context is derived from `session_id`.
///
/// # Errors
/// `MissingParameter` when no session id is available from either source.
pub fn build_conversation(config: &AdRequestConfiguration) -> Result<Conversation> {
    if let Some(prior) = &config.conversation {
        if prior.is_complete() {
            return Ok(prior.clone());
        }
        let session_id = non_blank(&prior.session_id).ok_or_else(|| AdSdkError::MissingParameter {
            fields: vec!["conversation.session_id".to_string()],
        })?;
        return Ok(Conversation {
            conversation_id: non_blank(&prior.conversation_id)
                .map(str::to_string)
                .unwrap_or_else(generate_conversation_id),
            session_id: session_id.to_string(),
            message_id: non_blank(&prior.message_id)
                .map(str::to_string)
                .unwrap_or_else(generate_message_id),
        });
    }

    let session_id = config
        .session_id
        .as_deref()
        .and_then(non_blank)
        .ok_or_else(|| AdSdkError::MissingParameter {
            fields: vec!["session_id".to_string()],
        })?;

    Ok(Conversation {
        conversation_id: generate_conversation_id(),
        session_id: session_id.to_string(),
        message_id: generate_message_id(),
    })
}
