//! The agent runtime: the LLM turn loop, the confirmation broker that
//! suspends it, and callback routing from transports.

pub mod callbacks;
pub mod confirm;
pub mod summary;
pub mod turn;

pub use turn::{generate_response, handle_user_message, ConfirmFn, TextDeltaFn, TurnOptions};

/// Short hex key for button callback payloads (confirmations,
/// missed-task prompts). Callback data budgets are tight on chat
/// transports, so eight characters.
pub(crate) fn callback_key() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
