//! Tool calling: definitions, calls, results and the providers that serve them.
//!
//! A backend may answer a round with tool-call requests instead of a final
//! result. The executor resolves each call through a [`ToolIndex`] built
//! from the instance's [`ToolProvider`]s, appends the results to the
//! conversation and asks again.
//!
//! [`ToolSet`] is the stock provider: register [`Tool`] implementors or
//! closure-based [`FnTool`]s and it handles argument validation, timeouts
//! and result truncation.

pub mod core;
pub mod provider;

pub use self::core::{
    DEFAULT_MAX_RESULT_BYTES, FnTool, Tool, ToolFuture, ToolSet, truncate_result,
    validate_tool_arguments,
};
pub use provider::{ProviderFuture, ToolIndex, ToolProvider};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool advertised to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool's arguments.
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// A definition whose input schema is generated from `A`.
    pub fn for_args<A: JsonSchema>(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, crate::json_schema_for::<A>())
    }
}

/// A backend's request to invoke a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The answer to a [`ToolCall`], correlated by `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}
