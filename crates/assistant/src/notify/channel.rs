//! Outbound channel interface.

use serde::{Deserialize, Serialize};

/// One inline button. `callback_data` round-trips through the
/// transport back into the callback dispatcher; `url` buttons open a
/// link instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Button {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: Some(data.into()),
            url: None,
        }
    }
}

/// Row-major button layout.
pub type ButtonRows = Vec<Vec<Button>>;

/// Transport-native handle of a sent message, kept so the sender can
/// edit it later (confirmation timeouts, missed-task outcomes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef(pub String);

/// Result of a rich send.
#[derive(Debug, Clone, Default)]
pub struct SendOutcome {
    pub ok: bool,
    pub message_ref: Option<MessageRef>,
}

impl SendOutcome {
    pub fn failed() -> Self {
        Self::default()
    }

    pub fn sent(message_ref: Option<MessageRef>) -> Self {
        Self {
            ok: true,
            message_ref,
        }
    }
}

/// A named outbound delivery mechanism.
///
/// Channels that cannot implement a capability return a failure result
/// for that call rather than panicking; the defaults below do exactly
/// that for photos and edits.
#[async_trait::async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Unique channel identifier (e.g. "telegram", "sms").
    fn name(&self) -> &str;

    /// Send a plain text message. Returns true on success.
    async fn send(&self, user_id: &str, message: &str) -> bool;

    /// Send a message with buttons and optional formatting.
    async fn send_rich(
        &self,
        user_id: &str,
        message: &str,
        buttons: Option<&ButtonRows>,
        parse_mode: Option<&str>,
    ) -> SendOutcome;

    /// Send a photo with an optional caption.
    async fn send_photo(&self, _user_id: &str, _photo: &[u8], _caption: Option<&str>) -> bool {
        tracing::warn!(channel = self.name(), "channel cannot deliver photos");
        false
    }

    /// Edit a previously sent message.
    async fn edit_message(&self, _user_id: &str, _message: &MessageRef, _text: &str) -> bool {
        tracing::debug!(channel = self.name(), "channel cannot edit messages");
        false
    }
}
