use crate::tools::{ToolCall, ToolResult};
use serde::{Deserialize, Serialize};

/// Who authored a turn in the conversation history.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A role-tagged turn in a prompt context's history.
///
/// An assistant turn may carry tool-call requests; the tool turn that
/// follows carries every result for that round, correlated by call id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
}

impl Message {
    fn text(role: Role, content: String) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content.into())
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content.into())
    }

    /// An assistant turn requesting tool invocations, with any text the
    /// backend produced alongside them.
    pub fn assistant_tool_calls(calls: Vec<ToolCall>, content: Option<String>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: calls,
            tool_results: Vec::new(),
        }
    }

    /// One turn carrying every tool result of a round.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::Tool,
            content: None,
            tool_calls: Vec::new(),
            tool_results: results,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
