//! Tool registry: the catalogue of everything the LLM may invoke.
//!
//! Tools are values carrying an erased async handler plus a JSON-Schema
//! descriptor derived from their parameter struct. The registry
//! validates arguments against the schema before the handler runs,
//! converts handler failures into error envelopes (never exceptions
//! across the turn-loop boundary), and answers confirmation-policy
//! lookups with the live policy file.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use valet_domain::context::MessageContext;
use valet_domain::error::Result;
use valet_domain::tool::{BoxFuture, ToolDefinition, ToolResult};

use crate::policy::ConfirmationPolicy;

/// Erased tool handler: validated JSON arguments plus the routing
/// context of the turn that triggered the call.
pub type ToolHandler =
    Arc<dyn Fn(Value, Option<MessageContext>) -> BoxFuture<'static, Result<ToolResult>> + Send + Sync>;

/// Derive the LLM-facing JSON Schema for a parameter struct.
pub fn params_schema<T: schemars::JsonSchema>() -> Value {
    let root = schemars::gen::SchemaGenerator::default().into_root_schema_for::<T>();
    serde_json::to_value(root.schema)
        .unwrap_or_else(|_| serde_json::json!({ "type": "object", "properties": {} }))
}

/// Schema for tools that take no arguments.
pub fn empty_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool descriptor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A registered tool. Immutable once registered.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub category: String,
    pub input_schema: Value,
    /// Declared confirmation default; the policy file can override it.
    pub requires_confirmation: bool,
    handler: ToolHandler,
}

impl Tool {
    /// Build a tool from an async handler. Confirmation defaults to
    /// required (fail-safe); opt out with [`Tool::without_confirmation`].
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        category: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value, Option<MessageContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            category: category.into(),
            input_schema,
            requires_confirmation: true,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }

    pub fn without_confirmation(mut self) -> Self {
        self.requires_confirmation = false;
        self
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("requires_confirmation", &self.requires_confirmation)
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Central tool catalogue. Append-mostly during startup, read-only
/// afterwards.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Tool>>,
    policy: ConfirmationPolicy,
}

impl ToolRegistry {
    pub fn new(policy: ConfirmationPolicy) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// Register a tool. Registering the same name again replaces the
    /// previous entry.
    pub fn register(&self, tool: Tool) {
        let mut tools = self.tools.write();
        if tools.insert(tool.name.clone(), tool.clone()).is_some() {
            tracing::warn!(tool = %tool.name, "replacing previously registered tool");
        }
    }

    pub fn get(&self, name: &str) -> Option<Tool> {
        self.tools.read().get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool definitions for the LLM request, sorted by name for a
    /// stable catalogue (stable ordering keeps prompt caching warm).
    pub fn schemas(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read();
        let mut defs: Vec<ToolDefinition> = tools.values().map(Tool::definition).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Whether invoking this tool needs user approval right now.
    ///
    /// The policy file wins when it lists the tool; otherwise the
    /// descriptor's declared flag applies; unknown tools require
    /// confirmation.
    pub fn requires_confirmation(&self, name: &str) -> bool {
        if let Some(value) = self.policy.lookup(name) {
            return value;
        }
        self.tools
            .read()
            .get(name)
            .map_or(true, |t| t.requires_confirmation)
    }

    /// Execute a tool by name. Arguments are validated against the
    /// schema first; any handler failure becomes a generic error
    /// envelope (full detail goes to the log, not the LLM).
    pub async fn execute(
        &self,
        name: &str,
        arguments: Value,
        ctx: Option<&MessageContext>,
    ) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };

        if let Err(reason) = validate_arguments(&tool.input_schema, &arguments) {
            tracing::debug!(tool = name, %reason, "argument validation failed");
            return ToolResult::error(format!("Invalid arguments for '{name}': {reason}"));
        }

        match (tool.handler)(arguments, ctx.cloned()).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(tool = name, error = %e, "tool execution failed");
                ToolResult::error(format!("Tool '{name}' failed. Check logs for details."))
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Argument validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Check required fields and primitive types against the schema.
/// Reports the first offending field; handlers deserialize into their
/// typed parameter structs afterwards.
fn validate_arguments(schema: &Value, arguments: &Value) -> std::result::Result<(), String> {
    let Some(args) = arguments.as_object() else {
        return Err("arguments must be a JSON object".into());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(field) || args[field].is_null() {
                return Err(format!("missing required field '{field}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in args {
            let Some(prop) = properties.get(key) else {
                // Unknown keys are tolerated; handlers ignore them.
                continue;
            };
            if !type_allows(prop.get("type"), value) {
                return Err(format!(
                    "field '{key}' has the wrong type (expected {})",
                    prop.get("type").map(Value::to_string).unwrap_or_default()
                ));
            }
        }
    }

    Ok(())
}

/// Match a JSON value against a schema `type` entry (a string, an array
/// of strings for nullable fields, or absent).
fn type_allows(expected: Option<&Value>, value: &Value) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    match expected {
        Value::String(t) => matches_type(t, value),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| matches_type(t, value)),
        _ => true,
    }
}

fn matches_type(t: &str, value: &Value) -> bool {
    match t {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}
