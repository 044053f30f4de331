//! Routing context carried with every inbound message.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identifies who sent a message and where replies should go. Created
/// by the inbound transport handler and borrowed read-only by every
/// downstream call (turn loop, tools, confirmation broker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContext {
    /// User identifier, stringly typed for cross-transport compat.
    pub user_id: String,
    /// Transport the message arrived on (e.g. "telegram", "sms").
    pub source_channel: String,
    /// Channel replies go out on. Defaults to the source channel.
    pub reply_channel: String,
    /// Logical conversation id (chat id, phone number). Defaults to
    /// the user id.
    pub conversation_id: String,
    /// Transport-specific extras (chat id, thread id, ...).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl MessageContext {
    pub fn new(user_id: impl Into<String>, source_channel: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let source_channel = source_channel.into();
        Self {
            reply_channel: source_channel.clone(),
            conversation_id: user_id.clone(),
            user_id,
            source_channel,
            metadata: HashMap::new(),
        }
    }

    pub fn with_reply_channel(mut self, channel: impl Into<String>) -> Self {
        self.reply_channel = channel.into();
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
