//! NotificationRouter: fan-out of outbound messages to registered
//! channels.
//!
//! Resolution order: explicitly requested channel, then the configured
//! default, then the sole registered channel. Send failures are logged
//! and reported as `false`; they never propagate.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use valet_domain::error::{Error, Result};

use super::channel::{ButtonRows, MessageRef, NotificationChannel, SendOutcome};

pub struct NotificationRouter {
    channels: RwLock<HashMap<String, Arc<dyn NotificationChannel>>>,
    default: RwLock<Option<String>>,
}

impl NotificationRouter {
    pub fn new(default_channel: Option<String>) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            default: RwLock::new(default_channel),
        }
    }

    /// Register a channel. Duplicate names are an error.
    pub fn register_channel(&self, channel: Arc<dyn NotificationChannel>) -> Result<()> {
        let name = channel.name().to_string();
        let mut channels = self.channels.write();
        if channels.contains_key(&name) {
            return Err(Error::Config(format!(
                "channel '{name}' is already registered"
            )));
        }
        tracing::info!(channel = %name, "registered notification channel");
        channels.insert(name, channel);
        Ok(())
    }

    /// Set the default channel. The channel must be registered.
    pub fn set_default_channel(&self, name: &str) -> Result<()> {
        if !self.channels.read().contains_key(name) {
            return Err(Error::Config(format!("channel '{name}' is not registered")));
        }
        *self.default.write() = Some(name.to_string());
        Ok(())
    }

    pub fn default_channel_name(&self) -> Option<String> {
        self.default.read().clone()
    }

    pub fn list_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn resolve(&self, requested: Option<&str>) -> Option<Arc<dyn NotificationChannel>> {
        let channels = self.channels.read();
        if let Some(name) = requested {
            return channels.get(name).cloned();
        }
        if let Some(name) = self.default.read().as_deref() {
            if let Some(ch) = channels.get(name) {
                return Some(ch.clone());
            }
        }
        if channels.len() == 1 {
            return channels.values().next().cloned();
        }
        None
    }

    // ── Delivery ──────────────────────────────────────────────────

    pub async fn send(&self, user_id: &str, message: &str, channel: Option<&str>) -> bool {
        let Some(ch) = self.resolve(channel) else {
            tracing::warn!(requested = ?channel, "no channel resolved for send");
            return false;
        };
        ch.send(user_id, message).await
    }

    pub async fn send_rich(
        &self,
        user_id: &str,
        message: &str,
        buttons: Option<&ButtonRows>,
        parse_mode: Option<&str>,
        channel: Option<&str>,
    ) -> SendOutcome {
        let Some(ch) = self.resolve(channel) else {
            tracing::warn!(requested = ?channel, "no channel resolved for send_rich");
            return SendOutcome::failed();
        };
        ch.send_rich(user_id, message, buttons, parse_mode).await
    }

    pub async fn send_photo(
        &self,
        user_id: &str,
        photo: &[u8],
        caption: Option<&str>,
        channel: Option<&str>,
    ) -> bool {
        let Some(ch) = self.resolve(channel) else {
            tracing::warn!(requested = ?channel, "no channel resolved for send_photo");
            return false;
        };
        ch.send_photo(user_id, photo, caption).await
    }

    pub async fn edit_message(
        &self,
        user_id: &str,
        message: &MessageRef,
        text: &str,
        channel: Option<&str>,
    ) -> bool {
        let Some(ch) = self.resolve(channel) else {
            tracing::warn!(requested = ?channel, "no channel resolved for edit_message");
            return false;
        };
        ch.edit_message(user_id, message, text).await
    }
}
