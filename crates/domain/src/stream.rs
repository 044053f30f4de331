use serde::Serialize;
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted while an LLM round streams (provider-agnostic).
///
/// Text tokens drive the transport's live UI; the tool-call events let
/// the turn loop assemble tool-use blocks as they arrive.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// A text token chunk.
    #[serde(rename = "token")]
    Token { text: String },

    /// A tool-use block has opened.
    #[serde(rename = "tool_call_started")]
    ToolCallStarted { call_id: String, tool_name: String },

    /// Incremental tool-call argument JSON.
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { call_id: String, delta: String },

    /// A tool-use block is complete with parsed arguments.
    #[serde(rename = "tool_call_finished")]
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// The round is finished.
    #[serde(rename = "done")]
    Done { stop_reason: Option<String> },

    /// The provider reported an error mid-stream.
    #[serde(rename = "error")]
    Error { message: String },
}
