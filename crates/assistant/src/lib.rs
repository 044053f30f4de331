//! The Valet assistant runtime.
//!
//! Wires the tool registry, LLM turn loop, confirmation broker,
//! notification router, conversation sessions, and the persistent
//! scheduler into one service bundle that transports talk to.

pub mod memory;
pub mod notify;
pub mod prompt;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod tools;

pub use runtime::callbacks::CallbackDispatcher;
pub use runtime::confirm::ConfirmationBroker;
pub use runtime::{generate_response, handle_user_message, TurnOptions};
pub use state::Services;
