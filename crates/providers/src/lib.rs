//! LLM provider adapters for the Valet runtime.
//!
//! The turn loop speaks [`traits::LlmProvider`]; the only concrete
//! adapter is the Anthropic Messages API. Adapters translate between
//! the runtime's provider-agnostic types and each provider's wire
//! format.

pub mod anthropic;
mod sse;
pub mod traits;

pub use anthropic::AnthropicProvider;
pub use traits::{ChatRequest, ChatResponse, LlmProvider, SystemBlock};
