//! Routing of transport callback payloads.
//!
//! Transports deliver button payloads verbatim: `cfm:<id>:<y|n>` for
//! confirmations, `mst:<key>:<run|del>` for missed-task prompts. The
//! dispatcher parses them and returns the reply text the transport
//! should surface (as a toast/answer, not a chat message).

use std::sync::Arc;

use crate::runtime::confirm::ConfirmationBroker;
use crate::scheduler::{MissedAction, MissedTaskRecovery};

pub struct CallbackDispatcher {
    broker: Arc<ConfirmationBroker>,
    missed: Arc<MissedTaskRecovery>,
}

impl CallbackDispatcher {
    pub fn new(broker: Arc<ConfirmationBroker>, missed: Arc<MissedTaskRecovery>) -> Self {
        Self { broker, missed }
    }

    pub async fn dispatch(&self, payload: &str) -> String {
        match parse_payload(payload) {
            Some(Callback::Confirmation { id, approved }) => {
                if self.broker.resolve(&id, approved) {
                    if approved { "Approved" } else { "Denied" }.to_string()
                } else {
                    "This confirmation has expired.".to_string()
                }
            }
            Some(Callback::Missed { key, action }) => self.missed.handle_callback(&key, action).await,
            None => {
                tracing::warn!(payload, "unrecognised callback payload");
                "Unrecognised action.".to_string()
            }
        }
    }
}

enum Callback {
    Confirmation { id: String, approved: bool },
    Missed { key: String, action: MissedAction },
}

fn parse_payload(payload: &str) -> Option<Callback> {
    let mut parts = payload.splitn(3, ':');
    let kind = parts.next()?;
    let key = parts.next()?;
    let verb = parts.next()?;
    if key.is_empty() {
        return None;
    }

    match (kind, verb) {
        ("cfm", "y") => Some(Callback::Confirmation {
            id: key.to_string(),
            approved: true,
        }),
        ("cfm", "n") => Some(Callback::Confirmation {
            id: key.to_string(),
            approved: false,
        }),
        ("mst", "run") => Some(Callback::Missed {
            key: key.to_string(),
            action: MissedAction::Run,
        }),
        ("mst", "del") => Some(Callback::Missed {
            key: key.to_string(),
            action: MissedAction::Delete,
        }),
        _ => None,
    }
}
