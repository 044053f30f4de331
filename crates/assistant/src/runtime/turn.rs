//! The LLM turn loop.
//!
//! One call to [`generate_response`] drives a whole turn: streaming
//! rounds against the provider, tool dispatch in emission order,
//! suspension on confirmation-gated tools, and re-entry with tool
//! results until the model produces plain text.
//!
//! Text streamed in a round that dispatched a confirmation-gated tool
//! is retracted from the returned result: it was shown live, but the
//! model wrote it before knowing the outcome, so the next round's
//! grounded text is the one that survives into the transcript.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;

use valet_domain::context::MessageContext;
use valet_domain::error::{Error, Result};
use valet_domain::stream::StreamEvent;
use valet_domain::tool::{
    BoxFuture, ContentPart, Message, PendingToolCall, Role, ToolCall, ToolResult,
};
use valet_providers::ChatRequest;
use valet_sessions::SessionStore;

use crate::prompt::build_system_prompt;
use crate::state::Services;

/// Hard ceiling on LLM rounds within one turn.
const MAX_ROUNDS: usize = 10;

const ROUND_LIMIT_NOTICE: &str =
    "\n\n(Stopped here: this turn reached its tool-call round limit. Ask me to continue.)";

const CONTENT_FILTER_NOTICE: &str =
    "My response was stopped by a content filter. Try rephrasing your request.";

/// Fast, non-blocking notification of streamed text. Transports that
/// are slower than the stream must coalesce internally.
pub type TextDeltaFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Confirmation hook: renders an approve/deny prompt and resolves to
/// the user's decision (false on denial or timeout).
pub type ConfirmFn = Arc<dyn Fn(PendingToolCall) -> BoxFuture<'static, bool> + Send + Sync>;

#[derive(Clone, Default)]
pub struct TurnOptions {
    pub on_text_delta: Option<TextDeltaFn>,
    pub on_confirm: Option<ConfirmFn>,
    pub context: Option<MessageContext>,
    /// Model override; `None` uses the provider default.
    pub model: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// generate_response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one turn against the LLM and return the final text.
///
/// Tool-level failures never surface here; they flow back to the model
/// as error results. Content-filter refusals recover into a polite
/// rephrasing message; any other provider error propagates.
pub async fn generate_response(
    services: &Services,
    history: Vec<Message>,
    opts: &TurnOptions,
) -> Result<String> {
    let last_user_text = history
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.text())
        .unwrap_or_default();
    let system = build_system_prompt(services, &last_user_text).await;
    let tools = services.registry.schemas();
    // Friendly aliases ("haiku") resolve to full model ids; anything
    // unrecognised passes through for the provider to judge.
    let model = opts.model.as_deref().map(|m| {
        services
            .config
            .llm
            .resolve_model(m)
            .unwrap_or_else(|| m.to_string())
    });

    let mut messages = history;
    let mut full_text = String::new();

    for round in 0..MAX_ROUNDS {
        tracing::debug!(round, messages = messages.len(), "starting LLM round");

        let request = ChatRequest {
            system: system.clone(),
            messages: messages.clone(),
            tools: tools.clone(),
            model: model.clone(),
            max_tokens: services.config.llm.max_tokens,
            temperature: None,
        };

        let outcome = match services.llm.chat_stream(request).await {
            Ok(stream) => consume_round(stream, opts).await,
            // The request itself failed; no text was streamed.
            Err(e) => RoundOutcome {
                text: String::new(),
                tool_calls: Vec::new(),
                error: Some(e),
            },
        };

        if let Some(e) = outcome.error {
            if e.is_content_filter() {
                tracing::info!("content filter tripped, recovering");
                if let Some(on_delta) = &opts.on_text_delta {
                    on_delta(CONTENT_FILTER_NOTICE);
                }
                full_text.push_str(&outcome.text);
                return Ok(content_filter_reply(&full_text));
            }
            return Err(e);
        }

        if outcome.tool_calls.is_empty() {
            full_text.push_str(&outcome.text);
            return Ok(full_text);
        }

        // ── Tool dispatch, sequentially, in emission order ────────
        let mut result_parts = Vec::with_capacity(outcome.tool_calls.len());
        let mut confirmation_gated = false;
        for call in &outcome.tool_calls {
            let result = dispatch_tool_call(services, call, opts, &mut confirmation_gated).await;
            result_parts.push(ContentPart::ToolResult {
                tool_use_id: call.call_id.clone(),
                content: result.to_content(),
                is_error: !result.is_success(),
            });
        }

        if confirmation_gated {
            // Streamed live, but retracted from the stored result.
            tracing::debug!(round, "retracting round text after confirmation-gated dispatch");
        } else {
            full_text.push_str(&outcome.text);
        }

        let mut assistant_parts = Vec::new();
        if !outcome.text.is_empty() {
            assistant_parts.push(ContentPart::Text {
                text: outcome.text.clone(),
            });
        }
        assistant_parts.extend(outcome.tool_calls.iter().map(|call| ContentPart::ToolUse {
            id: call.call_id.clone(),
            name: call.tool_name.clone(),
            input: call.arguments.clone(),
        }));
        messages.push(Message::assistant_parts(assistant_parts));
        messages.push(Message::user_parts(result_parts));
    }

    tracing::warn!(rounds = MAX_ROUNDS, "turn exhausted its round budget");
    full_text.push_str(ROUND_LIMIT_NOTICE);
    Ok(full_text)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Round streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RoundOutcome {
    text: String,
    tool_calls: Vec<ToolCall>,
    /// A provider failure mid-stream; `text` holds whatever arrived
    /// before it.
    error: Option<Error>,
}

async fn consume_round(
    mut stream: valet_domain::stream::BoxStream<'static, Result<StreamEvent>>,
    opts: &TurnOptions,
) -> RoundOutcome {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    // call_id -> (name, args buffer), for providers that never emit a
    // finished event.
    let mut open_calls: HashMap<String, (String, String)> = HashMap::new();

    while let Some(event) = stream.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                return RoundOutcome {
                    text,
                    tool_calls,
                    error: Some(e),
                }
            }
        };
        match event {
            StreamEvent::Token { text: chunk } => {
                if let Some(on_delta) = &opts.on_text_delta {
                    on_delta(&chunk);
                }
                text.push_str(&chunk);
            }
            StreamEvent::ToolCallStarted { call_id, tool_name } => {
                open_calls.insert(call_id, (tool_name, String::new()));
            }
            StreamEvent::ToolCallDelta { call_id, delta } => {
                if let Some((_, buffer)) = open_calls.get_mut(&call_id) {
                    buffer.push_str(&delta);
                }
            }
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => {
                open_calls.remove(&call_id);
                tool_calls.push(ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                });
            }
            StreamEvent::Done { stop_reason } => {
                tracing::debug!(?stop_reason, "round complete");
            }
            StreamEvent::Error { message } => {
                return RoundOutcome {
                    text,
                    tool_calls,
                    error: Some(Error::Provider {
                        provider: "llm".into(),
                        message,
                    }),
                };
            }
        }
    }

    // Close any tool calls that streamed deltas but no finish event.
    for (call_id, (tool_name, buffer)) in open_calls {
        let arguments: Value =
            serde_json::from_str(&buffer).unwrap_or_else(|_| Value::Object(Default::default()));
        tool_calls.push(ToolCall {
            call_id,
            tool_name,
            arguments,
        });
    }

    RoundOutcome {
        text,
        tool_calls,
        error: None,
    }
}

fn content_filter_reply(streamed: &str) -> String {
    if streamed.is_empty() {
        CONTENT_FILTER_NOTICE.to_string()
    } else {
        format!("{streamed}\n\n{CONTENT_FILTER_NOTICE}")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn dispatch_tool_call(
    services: &Services,
    call: &ToolCall,
    opts: &TurnOptions,
    confirmation_gated: &mut bool,
) -> ToolResult {
    let requires = services.registry.requires_confirmation(&call.tool_name);
    if requires {
        if let Some(on_confirm) = &opts.on_confirm {
            *confirmation_gated = true;
            let pending = build_pending(services, call).await;
            if !on_confirm(pending).await {
                tracing::info!(tool = %call.tool_name, "tool call denied by user");
                return ToolResult::error("User denied this action.");
            }
        }
    }
    services
        .registry
        .execute(&call.tool_name, call.arguments.clone(), opts.context.as_ref())
        .await
}

/// Build the pending call shown in the confirmation prompt. For
/// `cancel_scheduled_task`, the target task's stored state replaces
/// the opaque id so the prompt means something to a human.
async fn build_pending(services: &Services, call: &ToolCall) -> PendingToolCall {
    let mut description = services
        .registry
        .get(&call.tool_name)
        .map(|t| t.description)
        .unwrap_or_default();

    if call.tool_name == "cancel_scheduled_task" {
        if let Some(task_id) = call.arguments.get("task_id").and_then(Value::as_str) {
            // The model sometimes reformats hex ids as dashed UUIDs.
            let task_id = task_id.replace('-', "");
            if let Ok(Some(task)) = services.task_store.get(&task_id).await {
                let tz = services.scheduler.timezone();
                description = format!(
                    "Cancel task \"{}\" ({}, {})",
                    task.name,
                    task.task_type.as_str(),
                    task.schedule.describe(tz)
                );
            }
        }
    }

    PendingToolCall {
        call_id: call.call_id.clone(),
        tool_name: call.tool_name.clone(),
        arguments: call.arguments.clone(),
        description,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound glue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle one inbound user message end to end: append it to the
/// session, run the turn with confirmations wired to the broker, and
/// append the reply. Transports call this and serialise per
/// conversation.
pub async fn handle_user_message(
    services: &Services,
    ctx: &MessageContext,
    text: &str,
    on_text_delta: Option<TextDeltaFn>,
) -> Result<String> {
    append_turn(&services.sessions, &ctx.conversation_id, Role::User, text);
    let history = services.sessions.history(&ctx.conversation_id);

    let broker = services.broker.clone();
    let confirm_ctx = ctx.clone();
    let on_confirm: ConfirmFn = Arc::new(move |pending| {
        let broker = broker.clone();
        let ctx = confirm_ctx.clone();
        Box::pin(async move { broker.request_confirmation(&ctx, &pending).await })
    });

    let opts = TurnOptions {
        on_text_delta,
        on_confirm: Some(on_confirm),
        context: Some(ctx.clone()),
        model: None,
    };

    let reply = generate_response(services, history, &opts).await?;
    append_turn(
        &services.sessions,
        &ctx.conversation_id,
        Role::Assistant,
        &reply,
    );
    Ok(reply)
}

fn append_turn(sessions: &SessionStore, conversation_id: &str, role: Role, content: &str) {
    sessions.append(conversation_id, role, content);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
