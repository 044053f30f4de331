//! Confirmation broker: correlates an in-flight tool call with an
//! out-of-band user decision.
//!
//! The turn loop suspends on [`ConfirmationBroker::request_confirmation`];
//! the transport's callback handler resolves the decision by id from an
//! unrelated control path. Each pending confirmation owns a one-shot
//! channel, so the decision lands at most once; a timeout edits the
//! prompt and counts as denial. Restart drops pending confirmations,
//! which is fine because the turn that requested them is gone too.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use valet_domain::context::MessageContext;
use valet_domain::tool::PendingToolCall;

use crate::notify::{Button, MessageRef, NotificationRouter};

use super::callback_key;
use super::summary::format_tool_summary;

struct PendingEntry {
    conversation_id: String,
    tool_name: String,
    respond: oneshot::Sender<bool>,
    created_at: DateTime<Utc>,
    message_ref: Option<MessageRef>,
}

/// Snapshot of a pending confirmation, for introspection.
#[derive(Debug, Clone)]
pub struct PendingInfo {
    pub id: String,
    pub conversation_id: String,
    pub tool_name: String,
    pub created_at: DateTime<Utc>,
    pub message_ref: Option<MessageRef>,
}

pub struct ConfirmationBroker {
    router: Arc<NotificationRouter>,
    timeout: Duration,
    pending: Mutex<HashMap<String, PendingEntry>>,
}

impl ConfirmationBroker {
    pub fn new(router: Arc<NotificationRouter>, timeout: Duration) -> Self {
        Self {
            router,
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Every confirmation currently awaiting a decision.
    pub fn list_pending(&self) -> Vec<PendingInfo> {
        self.pending
            .lock()
            .iter()
            .map(|(id, entry)| PendingInfo {
                id: id.clone(),
                conversation_id: entry.conversation_id.clone(),
                tool_name: entry.tool_name.clone(),
                created_at: entry.created_at,
                message_ref: entry.message_ref.clone(),
            })
            .collect()
    }

    /// Render an approve/deny prompt and wait for the user's decision.
    /// Returns false on denial or timeout.
    pub async fn request_confirmation(
        &self,
        ctx: &MessageContext,
        pending_tool: &PendingToolCall,
    ) -> bool {
        let id = callback_key();
        let summary = format_tool_summary(
            &pending_tool.tool_name,
            &pending_tool.arguments,
            &pending_tool.description,
        );
        let prompt = format!("Confirm action:\n{summary}");
        let buttons = vec![vec![
            Button::callback("Approve", format!("cfm:{id}:y")),
            Button::callback("Deny", format!("cfm:{id}:n")),
        ]];

        let outcome = self
            .router
            .send_rich(
                &ctx.user_id,
                &prompt,
                Some(&buttons),
                None,
                Some(&ctx.reply_channel),
            )
            .await;
        if !outcome.ok {
            tracing::warn!(
                tool = %pending_tool.tool_name,
                channel = %ctx.reply_channel,
                "could not deliver confirmation prompt; denying"
            );
            return false;
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            id.clone(),
            PendingEntry {
                conversation_id: ctx.conversation_id.clone(),
                tool_name: pending_tool.tool_name.clone(),
                respond: tx,
                created_at: Utc::now(),
                message_ref: outcome.message_ref.clone(),
            },
        );

        let decision = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(approved)) => approved,
            // Sender dropped without a decision; treat as denial.
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::info!(confirmation_id = %id, tool = %pending_tool.tool_name, "confirmation timed out");
                if let Some(message_ref) = &outcome.message_ref {
                    let edited = format!("Confirm action: (timed out)\n{summary}");
                    self.router
                        .edit_message(&ctx.user_id, message_ref, &edited, Some(&ctx.reply_channel))
                        .await;
                }
                false
            }
        };

        // The resolver removes the entry on the happy path; make sure
        // timed-out or dropped entries go too.
        self.pending.lock().remove(&id);
        decision
    }

    /// Resolve a pending confirmation from the transport callback.
    /// Returns false when the id is unknown or already resolved.
    pub fn resolve(&self, confirmation_id: &str, approved: bool) -> bool {
        let Some(entry) = self.pending.lock().remove(confirmation_id) else {
            return false;
        };
        let age = (Utc::now() - entry.created_at).num_seconds();
        tracing::info!(
            confirmation_id,
            tool = %entry.tool_name,
            approved,
            age_secs = age,
            "confirmation resolved"
        );
        // The requester may have timed out between our map lookup and
        // this send; it already treated that as denial.
        let _ = entry.respond.send(approved);
        true
    }
}
