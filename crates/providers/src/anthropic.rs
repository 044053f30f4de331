//! Anthropic Messages API adapter.
//!
//! Translates the runtime's provider-agnostic requests into the
//! Messages wire format: system blocks travel in the top-level `system`
//! array (with `cache_control` on blocks flagged cacheable), tool
//! results are user messages carrying `tool_result` content blocks, and
//! streaming responses are assembled from SSE content-block events.

use serde_json::Value;

use valet_domain::config::LlmConfig;
use valet_domain::error::{Error, Result};
use valet_domain::stream::{BoxStream, StreamEvent};
use valet_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};

use crate::sse::sse_event_stream;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider, SystemBlock};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROVIDER_ID: &str = "anthropic";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    default_model: String,
    default_max_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(cfg: &LlmConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: cfg.default_model.clone(),
            default_max_tokens: cfg.max_tokens,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let messages: Vec<Value> = req.messages.iter().map(message_to_wire).collect();
        let max_tokens = if req.max_tokens == 0 {
            self.default_max_tokens
        } else {
            req.max_tokens
        };

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": max_tokens,
            "messages": messages,
            "stream": stream,
        });

        if !req.system.is_empty() {
            body["system"] = Value::Array(req.system.iter().map(system_block_to_wire).collect());
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_wire).collect());
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        body
    }

    fn provider_error(&self, status: u16, body: &str) -> Error {
        Error::Provider {
            provider: PROVIDER_ID.into(),
            message: format!("HTTP {status} - {body}"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn system_block_to_wire(block: &SystemBlock) -> Value {
    if block.cache {
        serde_json::json!({
            "type": "text",
            "text": block.text,
            "cache_control": { "type": "ephemeral" },
        })
    } else {
        serde_json::json!({ "type": "text", "text": block.text })
    }
}

fn message_to_wire(msg: &Message) -> Value {
    let role = match msg.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let content = match &msg.content {
        MessageContent::Text(t) => Value::String(t.clone()),
        MessageContent::Parts(parts) => {
            Value::Array(parts.iter().map(part_to_wire).collect())
        }
    };
    serde_json::json!({ "role": role, "content": content })
}

fn part_to_wire(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => serde_json::json!({ "type": "text", "text": text }),
        ContentPart::ToolUse { id, name, input } => serde_json::json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        }),
        ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_response(body: &Value) -> ChatResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    if let Some(blocks) = body.get("content").and_then(Value::as_array) {
        for block in blocks {
            match block.get("type").and_then(Value::as_str).unwrap_or("") {
                "text" => {
                    if let Some(t) = block.get("text").and_then(Value::as_str) {
                        text.push_str(t);
                    }
                }
                "tool_use" => tool_calls.push(ToolCall {
                    call_id: str_field(block, "id"),
                    tool_name: str_field(block, "name"),
                    arguments: block
                        .get("input")
                        .cloned()
                        .unwrap_or_else(|| Value::Object(Default::default())),
                }),
                _ => {}
            }
        }
    }

    ChatResponse {
        content: text,
        tool_calls,
        stop_reason: body
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(String::from),
    }
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key).and_then(Value::as_str).unwrap_or("").to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assembly state for tool-use blocks arriving across SSE events,
/// keyed by content-block index.
#[derive(Default)]
struct StreamState {
    open_tool_blocks: std::collections::HashMap<u64, (String, String, String)>,
    done_emitted: bool,
}

fn parse_sse_payload(data: &str, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    match v.get("type").and_then(Value::as_str).unwrap_or("") {
        "content_block_start" => {
            let idx = v.get("index").and_then(Value::as_u64).unwrap_or(0);
            if let Some(block) = v.get("content_block") {
                if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                    let call_id = str_field(block, "id");
                    let name = str_field(block, "name");
                    events.push(Ok(StreamEvent::ToolCallStarted {
                        call_id: call_id.clone(),
                        tool_name: name.clone(),
                    }));
                    state
                        .open_tool_blocks
                        .insert(idx, (call_id, name, String::new()));
                }
            }
        }

        "content_block_delta" => {
            let idx = v.get("index").and_then(Value::as_u64).unwrap_or(0);
            let Some(delta) = v.get("delta") else {
                return events;
            };
            match delta.get("type").and_then(Value::as_str).unwrap_or("") {
                "text_delta" => {
                    if let Some(text) = delta.get("text").and_then(Value::as_str) {
                        if !text.is_empty() {
                            events.push(Ok(StreamEvent::Token { text: text.into() }));
                        }
                    }
                }
                "input_json_delta" => {
                    if let Some(partial) = delta.get("partial_json").and_then(Value::as_str) {
                        if let Some((call_id, _, args)) = state.open_tool_blocks.get_mut(&idx) {
                            args.push_str(partial);
                            events.push(Ok(StreamEvent::ToolCallDelta {
                                call_id: call_id.clone(),
                                delta: partial.into(),
                            }));
                        }
                    }
                }
                _ => {}
            }
        }

        "content_block_stop" => {
            let idx = v.get("index").and_then(Value::as_u64).unwrap_or(0);
            if let Some((call_id, tool_name, args)) = state.open_tool_blocks.remove(&idx) {
                let arguments: Value = serde_json::from_str(&args)
                    .unwrap_or_else(|_| Value::Object(Default::default()));
                events.push(Ok(StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                }));
            }
        }

        "message_delta" => {
            let stop_reason = v
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(Value::as_str)
                .map(String::from);
            if stop_reason.is_some() {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done { stop_reason }));
            }
        }

        "message_stop" => {
            if !state.done_emitted {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done { stop_reason: None }));
            }
        }

        "error" => {
            let message = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown streaming error")
                .to_string();
            events.push(Err(Error::Provider {
                provider: PROVIDER_ID.into(),
                message,
            }));
        }

        // message_start, ping, unknown event types.
        _ => {}
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&req, false);

        tracing::debug!(url = %url, "anthropic chat request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(self.provider_error(status.as_u16(), &text));
        }

        let json: Value = serde_json::from_str(&text)?;
        Ok(parse_response(&json))
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&req, true);

        tracing::debug!(url = %url, "anthropic stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
            return Err(self.provider_error(status.as_u16(), &text));
        }

        let mut state = StreamState::default();
        Ok(sse_event_stream(resp, move |data| {
            parse_sse_payload(data, &mut state)
        }))
    }

    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new(&LlmConfig::default(), "test-key".into()).unwrap()
    }

    #[test]
    fn system_blocks_carry_cache_control() {
        let req = ChatRequest {
            system: vec![
                SystemBlock::cached("persona"),
                SystemBlock::plain("memories"),
            ],
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let body = provider().build_body(&req, false);
        let system = body["system"].as_array().unwrap();
        assert_eq!(system[0]["cache_control"]["type"], "ephemeral");
        assert!(system[1].get("cache_control").is_none());
    }

    #[test]
    fn tool_results_become_user_content_blocks() {
        let req = ChatRequest {
            messages: vec![Message::user_parts(vec![ContentPart::ToolResult {
                tool_use_id: "tu_1".into(),
                content: r#"{"ok":true}"#.into(),
                is_error: false,
            }])],
            ..Default::default()
        };
        let body = provider().build_body(&req, false);
        let msg = &body["messages"][0];
        assert_eq!(msg["role"], "user");
        assert_eq!(msg["content"][0]["type"], "tool_result");
        assert_eq!(msg["content"][0]["tool_use_id"], "tu_1");
    }

    #[test]
    fn tools_are_exported_with_input_schema() {
        let req = ChatRequest {
            messages: vec![Message::user("hi")],
            tools: vec![ToolDefinition {
                name: "list_scheduled_tasks".into(),
                description: "List tasks".into(),
                input_schema: serde_json::json!({"type": "object", "properties": {}}),
            }],
            ..Default::default()
        };
        let body = provider().build_body(&req, true);
        assert_eq!(body["tools"][0]["name"], "list_scheduled_tasks");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn non_streaming_response_parses_text_and_tool_use() {
        let body = serde_json::json!({
            "content": [
                { "type": "text", "text": "Let me check." },
                { "type": "tool_use", "id": "tu_9", "name": "list_scheduled_tasks", "input": {} },
            ],
            "stop_reason": "tool_use",
        });
        let resp = parse_response(&body);
        assert_eq!(resp.content, "Let me check.");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].call_id, "tu_9");
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn sse_text_deltas_become_tokens() {
        let mut state = StreamState::default();
        let events = parse_sse_payload(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
            &mut state,
        );
        assert!(matches!(
            events.as_slice(),
            [Ok(StreamEvent::Token { text })] if text == "hi"
        ));
    }

    #[test]
    fn sse_tool_use_assembles_across_events() {
        let mut state = StreamState::default();
        let mut events = Vec::new();
        for payload in [
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"tu_1","name":"schedule_task"}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"name\":"}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"water\"}"}}"#,
            r#"{"type":"content_block_stop","index":1}"#,
        ] {
            events.extend(parse_sse_payload(payload, &mut state));
        }

        let finished = events
            .into_iter()
            .filter_map(|e| match e {
                Ok(StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                }) => Some((call_id, tool_name, arguments)),
                _ => None,
            })
            .next()
            .expect("tool call should finish");
        assert_eq!(finished.0, "tu_1");
        assert_eq!(finished.1, "schedule_task");
        assert_eq!(finished.2["name"], "water");
    }

    #[test]
    fn sse_stop_reason_propagates() {
        let mut state = StreamState::default();
        let events = parse_sse_payload(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":4}}"#,
            &mut state,
        );
        assert!(matches!(
            events.as_slice(),
            [Ok(StreamEvent::Done { stop_reason: Some(r) })] if r == "end_turn"
        ));

        // message_stop after an emitted Done is silent.
        let events = parse_sse_payload(r#"{"type":"message_stop"}"#, &mut state);
        assert!(events.is_empty());
    }

    #[test]
    fn sse_error_event_is_a_provider_error() {
        let mut state = StreamState::default();
        let events = parse_sse_payload(
            r#"{"type":"error","error":{"type":"invalid_request_error","message":"Output blocked by content filtering policy"}}"#,
            &mut state,
        );
        match events.as_slice() {
            [Err(e)] => assert!(e.is_content_filter()),
            other => panic!("expected one error event, got {other:?}"),
        }
    }
}
