//! In-memory conversation sessions with a sliding window.
//!
//! Sessions live only for the process lifetime; continuity across
//! restarts comes from the external memory store, not transcript
//! replay. Conversation ids are plain strings (chat id for chat
//! transports, phone number for SMS) so any transport can key into the
//! same store.

mod store;

pub use store::{SessionStore, DEFAULT_WINDOW_SIZE};
